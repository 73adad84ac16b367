//! Per-patient input and output file names.

use crate::patient::PatientId;
use std::path::{Path, PathBuf};

/// `<id>_adc.nii.gz`
pub struct AdcImageFile;

impl AdcImageFile {
    pub const SUFFIX: &'static str = "_adc.nii.gz";

    pub fn name(id: &PatientId) -> String {
        format!("{id}{}", Self::SUFFIX)
    }
}

/// `<id>_t2w.nii.gz`
pub struct T2wImageFile;

impl T2wImageFile {
    pub const SUFFIX: &'static str = "_t2w.nii.gz";

    pub fn name(id: &PatientId) -> String {
        format!("{id}{}", Self::SUFFIX)
    }
}

/// Registered ADC written next to the input ADC: `<id>_adc_reg.nii.gz`.
pub struct RegisteredAdcFile;

impl RegisteredAdcFile {
    pub const SUFFIX: &'static str = "_adc_reg.nii.gz";

    pub fn path(adc_dir: &Path, id: &PatientId) -> PathBuf {
        adc_dir.join(format!("{id}{}", Self::SUFFIX))
    }
}

/// Per-patient output directory, `<output_root>/<id>`.
pub fn patient_output_dir(output_root: &Path, id: &PatientId) -> PathBuf {
    output_root.join(id.as_str())
}

/// Effective parameter file copied into the output directory: `<kind>_parameters.txt`.
pub fn parameter_file_name(kind: impl std::fmt::Display) -> String {
    format!("{kind}_parameters.txt")
}
