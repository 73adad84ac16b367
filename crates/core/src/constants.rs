//! Constants used throughout the mrireg core crate.
//!
//! Environment variable names, defaults and time limits live here so that the
//! binaries and the library agree on them.

use std::time::Duration;

/// Default directory holding one sub-directory per patient.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default directory for registration outputs and reports.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Environment variable naming the patient data directory.
pub const DATA_DIR_ENV: &str = "MRIREG_DATA_DIR";
/// Environment variable naming the output directory.
pub const OUTPUT_DIR_ENV: &str = "MRIREG_OUTPUT_DIR";
/// Environment variable naming the elastix installation directory.
pub const ELASTIX_HOME_ENV: &str = "ELASTIX_HOME";
/// Environment variable selecting the transform kind.
pub const TRANSFORM_ENV: &str = "MRIREG_TRANSFORM";
/// Environment variable pointing at a custom elastix parameter file.
pub const PARAMETER_FILE_ENV: &str = "MRIREG_PARAMETER_FILE";
pub const ELASTIX_TIMEOUT_ENV: &str = "MRIREG_ELASTIX_TIMEOUT_SECS";
pub const TRANSFORMIX_TIMEOUT_ENV: &str = "MRIREG_TRANSFORMIX_TIMEOUT_SECS";
/// Environment variable enabling the standardization + ROI mode.
pub const PREPROCESS_ENV: &str = "MRIREG_PREPROCESS";

/// Upper bound on a single elastix run.
pub const ELASTIX_TIMEOUT: Duration = Duration::from_secs(1800);
/// Upper bound on a single transformix run.
pub const TRANSFORMIX_TIMEOUT: Duration = Duration::from_secs(900);
/// Upper bound on `elastix --help` during installation checks.
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Pipeline name recorded in summary reports.
pub const PIPELINE_NAME: &str = "ProstateADCRegistrationPipeline";

/// Number of T2W volumes used to train the cohort Nyul model.
pub const NYUL_TRAINING_LIMIT: usize = 20;

/// Default ROI padding in voxels.
pub const DEFAULT_ROI_PADDING: usize = 10;
