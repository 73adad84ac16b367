//! Batch-level report files and preprocessing artefacts.

/// CSV log of per-patient failures.
pub struct ErrorLogFile;

impl ErrorLogFile {
    pub const NAME: &'static str = "registration_errors.csv";
}

/// JSON summary of a batch run.
pub struct SummaryReportFile;

impl SummaryReportFile {
    pub const NAME: &'static str = "registration_summary_report.json";
}

/// CSV with one row per patient.
pub struct BatchResultsFile;

impl BatchResultsFile {
    pub const NAME: &'static str = "batch_results.csv";
}

/// Cohort Nyul model trained during preprocessing.
pub struct NyulParametersFile;

impl NyulParametersFile {
    pub const NAME: &'static str = "nyul_parameters.json";
}

/// Files written into each patient directory by the preprocessing mode.
pub struct PreprocessedFiles;

impl PreprocessedFiles {
    pub const T2W_STANDARDIZED: &'static str = "t2w_standardized.nii.gz";
    pub const ADC_STANDARDIZED: &'static str = "adc_standardized.nii.gz";
    pub const SEGMENTATION: &'static str = "prostate_segmentation.nii.gz";
    pub const T2W_ROI: &'static str = "t2w_roi.nii.gz";
    pub const ADC_ROI: &'static str = "adc_roi.nii.gz";
    pub const MASK_ROI: &'static str = "mask_roi.nii.gz";
    pub const REGISTERED_ADC: &'static str = "registered_adc.nii.gz";
}
