use crate::patient::Modality;
use crate::tool::Tool;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{modality} file not found: {path}", path = path.display())]
    MissingInput { modality: Modality, path: PathBuf },

    #[error("parameter file not found: {}", .0.display())]
    ParameterFileNotFound(PathBuf),
    #[error("invalid parameter file (line {line}): {message}")]
    ParameterParse { line: usize, message: String },

    #[error("elastix installation not found (searched: {searched})")]
    InstallationNotFound { searched: String },
    #[error("elastix not found or not executable at {path}: {reason}", path = path.display())]
    ToolNotExecutable { path: PathBuf, reason: String },
    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: Tool,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} failed with exit code {exit_code}: {stderr}")]
    ToolFailed {
        tool: Tool,
        exit_code: i32,
        stderr: String,
    },
    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: Tool, timeout_secs: u64 },

    #[error("transform parameters not found: {}", .0.display())]
    TransformParametersNotFound(PathBuf),
    #[error("registration result file not found: {}", .0.display())]
    ResultNotFound(PathBuf),

    #[error("failed to create directory {path}: {source}", path = path.display())]
    DirCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write file: {0}")]
    FileWrite(std::io::Error),
    #[error(
        "failed to move {from} to {to}: {source}",
        from = from.display(),
        to = to.display()
    )]
    FileMove {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to serialize report: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize YAML: {0}")]
    YamlDeserialization(serde_yaml::Error),

    #[error("imaging error: {0}")]
    Imaging(#[from] mrireg_imaging::ImagingError),
}

impl RegistrationError {
    /// Classification used in reports and the error log.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RegistrationError::MissingInput { .. } => FailureKind::MissingInput,
            RegistrationError::Spawn { .. }
            | RegistrationError::ToolFailed { .. }
            | RegistrationError::Timeout { .. }
            | RegistrationError::ToolNotExecutable { .. } => FailureKind::SubprocessError,
            _ => FailureKind::UnexpectedError,
        }
    }
}

/// The failure taxonomy exposed in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingInput,
    SubprocessError,
    UnexpectedError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::MissingInput => write!(f, "missing_input"),
            FailureKind::SubprocessError => write!(f, "subprocess_error"),
            FailureKind::UnexpectedError => write!(f, "unexpected_error"),
        }
    }
}

pub type RegistrationResult<T> = std::result::Result<T, RegistrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprocess_failures_are_classified_together() {
        let failed = RegistrationError::ToolFailed {
            tool: Tool::Elastix,
            exit_code: 1,
            stderr: "itk::ExceptionObject".into(),
        };
        let timeout = RegistrationError::Timeout {
            tool: Tool::Transformix,
            timeout_secs: 900,
        };
        assert_eq!(failed.failure_kind(), FailureKind::SubprocessError);
        assert_eq!(timeout.failure_kind(), FailureKind::SubprocessError);
        assert_eq!(
            failed.to_string(),
            "elastix failed with exit code 1: itk::ExceptionObject"
        );
    }

    #[test]
    fn missing_files_are_classified_by_stage() {
        let missing = RegistrationError::MissingInput {
            modality: Modality::Adc,
            path: PathBuf::from("p1/p1_adc.nii.gz"),
        };
        assert_eq!(missing.failure_kind(), FailureKind::MissingInput);
        assert_eq!(missing.to_string(), "ADC file not found: p1/p1_adc.nii.gz");

        let result = RegistrationError::ResultNotFound(PathBuf::from("p1/result.nii.gz"));
        assert_eq!(result.failure_kind(), FailureKind::UnexpectedError);
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::SubprocessError).unwrap();
        assert_eq!(json, "\"subprocess_error\"");
    }
}
