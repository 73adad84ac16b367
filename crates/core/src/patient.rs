//! Patient identifiers and per-patient input files.

use crate::validation::validate_patient_id;
use crate::RegistrationResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier of a patient, taken from the name of the patient directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(String);

impl PatientId {
    pub fn new(value: impl Into<String>) -> RegistrationResult<Self> {
        let value = value.into();
        validate_patient_id(&value)?;
        Ok(Self(value))
    }

    /// Uses the final component of `dir` as the identifier.
    pub fn from_directory(dir: &Path) -> RegistrationResult<Self> {
        let name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PatientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// MRI sequence of an input volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Adc,
    T2w,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Adc => write!(f, "ADC"),
            Modality::T2w => write!(f, "T2W"),
        }
    }
}

/// A patient whose ADC and T2W volumes are both present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientCase {
    pub id: PatientId,
    pub directory: PathBuf,
    pub adc_path: PathBuf,
    pub t2w_path: PathBuf,
}

impl PatientCase {
    /// Directory holding the ADC volume; transformix writes its result here.
    pub fn adc_dir(&self) -> &Path {
        self.adc_path.parent().unwrap_or(&self.directory)
    }
}
