//! Patient discovery.
//!
//! A cohort is a directory with one sub-directory per patient. Each patient
//! directory is expected to hold `<id>_adc.nii.gz` and `<id>_t2w.nii.gz`;
//! a few looser naming conventions are accepted as fallbacks.

use crate::paths::patient::{AdcImageFile, T2wImageFile};
use crate::patient::{Modality, PatientCase, PatientId};
use crate::{RegistrationError, RegistrationResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Fallback `(t2w, adc)` file-name suffixes, tried in order.
const FALLBACK_SUFFIXES: [(&str, &str); 3] = [
    ("_t2w.nii.gz", "_adc.nii.gz"),
    ("_T2W.nii.gz", "_ADC.nii.gz"),
    ("t2.nii.gz", "adc.nii.gz"),
];

/// A required input that is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingInput {
    pub modality: Modality,
    /// The exact-name path that was expected.
    pub path: PathBuf,
}

impl From<MissingInput> for RegistrationError {
    fn from(missing: MissingInput) -> Self {
        RegistrationError::MissingInput {
            modality: missing.modality,
            path: missing.path,
        }
    }
}

/// A patient directory and whether both inputs were found in it.
#[derive(Debug, Clone)]
pub struct PatientEntry {
    pub id: PatientId,
    pub directory: PathBuf,
    pub files: Result<PatientCase, MissingInput>,
}

impl PatientEntry {
    pub fn is_complete(&self) -> bool {
        self.files.is_ok()
    }
}

/// Lists patient directories directly under `base_dir`, sorted by name.
///
/// Hidden entries (including macOS `._*` and `.DS_Store` files) are skipped.
pub fn discover_patients(base_dir: &Path) -> RegistrationResult<Vec<PatientEntry>> {
    if !base_dir.is_dir() {
        return Err(RegistrationError::InvalidInput(format!(
            "patient data directory not found: {}",
            base_dir.display()
        )));
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(base_dir).map_err(RegistrationError::FileRead)? {
        let entry = entry.map_err(RegistrationError::FileRead)?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_dir() {
            continue;
        }
        dirs.push(path);
    }
    dirs.sort();

    let mut patients = Vec::with_capacity(dirs.len());
    for directory in dirs {
        let id = match PatientId::from_directory(&directory) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("skipping {}: {e}", directory.display());
                continue;
            }
        };
        let files = locate_inputs(&directory, &id);
        if let Err(missing) = &files {
            tracing::debug!("{id}: missing {} file", missing.modality);
        }
        patients.push(PatientEntry {
            id,
            directory,
            files,
        });
    }

    tracing::info!("found {} patient directories", patients.len());
    Ok(patients)
}

/// Finds the ADC and T2W volumes of one patient.
///
/// Exact names win; otherwise the first fallback convention with both files
/// present is used. When nothing matches, the missing ADC is reported before
/// the missing T2W.
pub fn locate_inputs(directory: &Path, id: &PatientId) -> Result<PatientCase, MissingInput> {
    let exact_adc = directory.join(AdcImageFile::name(id));
    let exact_t2w = directory.join(T2wImageFile::name(id));

    let case = |adc_path: PathBuf, t2w_path: PathBuf| PatientCase {
        id: id.clone(),
        directory: directory.to_path_buf(),
        adc_path,
        t2w_path,
    };

    if exact_adc.is_file() && exact_t2w.is_file() {
        return Ok(case(exact_adc, exact_t2w));
    }

    let names = file_names(directory);
    for (t2w_suffix, adc_suffix) in FALLBACK_SUFFIXES {
        let t2w = names.iter().find(|n| n.ends_with(t2w_suffix));
        let adc = names.iter().find(|n| n.ends_with(adc_suffix));
        if let (Some(t2w), Some(adc)) = (t2w, adc) {
            return Ok(case(directory.join(adc), directory.join(t2w)));
        }
    }

    if !exact_adc.is_file() {
        return Err(MissingInput {
            modality: Modality::Adc,
            path: exact_adc,
        });
    }
    Err(MissingInput {
        modality: Modality::T2w,
        path: exact_t2w,
    })
}

fn file_names(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(directory)
        .into_iter()
        .flatten()
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}
