//! # mrireg core
//!
//! Orchestration of elastix/transformix for ADC to T2W prostate MRI registration.
//!
//! This crate contains the pipeline logic and filesystem layout:
//! - Patient discovery under a cohort data directory
//! - Elastix parameter files per transform kind, with scalar overrides
//! - Subprocess invocation of `elastix` / `transformix` with timeouts
//! - Sequential batch processing with a CSV error log and JSON summary report
//! - Optional standardization and ROI preprocessing (via `mrireg-imaging`)
//!
//! **No registration numerics**: optimisation, pyramids and transforms are
//! entirely elastix's job.

pub mod batch;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod elastix;
mod error;
pub mod parameters;
pub mod paths;
pub mod patient;
pub mod preprocess;
pub mod registration;
pub mod report;
pub mod tool;
pub mod validation;

#[cfg(test)]
mod testing;

pub use batch::{BatchMode, BatchProcessor, BatchRun, BatchSettings, ErrorLog};
pub use config::CoreConfig;
pub use discovery::{discover_patients, locate_inputs, PatientEntry};
pub use elastix::ElastixInstallation;
pub use error::{FailureKind, RegistrationError, RegistrationResult};
pub use parameters::{ElastixParameters, ParameterOverrides, TransformKind};
pub use patient::{Modality, PatientCase, PatientId};
pub use preprocess::{PreprocessSettings, Preprocessor};
pub use registration::{
    RegistrationOutcome, RegistrationRequest, RegistrationService, RegistrationSettings,
    ToolTimeouts,
};
pub use report::{write_results_csv, write_summary_report, BatchSummary, SummaryReport};
pub use tool::{ProcessRunner, Tool, ToolRunner};
