//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the
//! batch processor. Library code never reads process-wide environment
//! variables itself; binaries hand a lookup function to
//! [`CoreConfig::from_lookup`] instead, which keeps tests independent of the
//! real environment.

use crate::batch::{BatchMode, BatchSettings};
use crate::constants::{
    DATA_DIR_ENV, DEFAULT_DATA_DIR, DEFAULT_OUTPUT_DIR, ELASTIX_HOME_ENV, ELASTIX_TIMEOUT,
    ELASTIX_TIMEOUT_ENV, OUTPUT_DIR_ENV, PARAMETER_FILE_ENV, PREPROCESS_ENV, TRANSFORMIX_TIMEOUT,
    TRANSFORMIX_TIMEOUT_ENV, TRANSFORM_ENV,
};
use crate::elastix::ElastixInstallation;
use crate::parameters::TransformKind;
use crate::validation::validate_distinct_dirs;
use crate::{RegistrationError, RegistrationResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    output_dir: PathBuf,
    elastix_home: Option<PathBuf>,
    batch: BatchSettings,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(
        data_dir: PathBuf,
        output_dir: PathBuf,
        elastix_home: Option<PathBuf>,
        batch: BatchSettings,
    ) -> RegistrationResult<Self> {
        if data_dir.as_os_str().is_empty() || output_dir.as_os_str().is_empty() {
            return Err(RegistrationError::InvalidInput(
                "data and output directories cannot be empty".into(),
            ));
        }
        validate_distinct_dirs(&data_dir, &output_dir)?;
        batch.validate()?;

        Ok(Self {
            data_dir,
            output_dir,
            elastix_home,
            batch,
        })
    }

    /// Builds the configuration from `MRIREG_*` / `ELASTIX_HOME` values
    /// supplied by `lookup`. Unset and blank values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RegistrationResult<Self> {
        let value = |name: &str| non_empty(lookup(name));

        let data_dir = value(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.into());
        let output_dir = value(OUTPUT_DIR_ENV).unwrap_or_else(|| DEFAULT_OUTPUT_DIR.into());

        let batch = BatchSettings {
            transform: transform_kind_from_env_value(value(TRANSFORM_ENV))?,
            parameter_file: value(PARAMETER_FILE_ENV).map(PathBuf::from),
            elastix_timeout_secs: timeout_from_env_value(
                ELASTIX_TIMEOUT_ENV,
                value(ELASTIX_TIMEOUT_ENV),
                ELASTIX_TIMEOUT,
            )?
            .as_secs(),
            transformix_timeout_secs: timeout_from_env_value(
                TRANSFORMIX_TIMEOUT_ENV,
                value(TRANSFORMIX_TIMEOUT_ENV),
                TRANSFORMIX_TIMEOUT,
            )?
            .as_secs(),
            mode: if flag_from_env_value(PREPROCESS_ENV, value(PREPROCESS_ENV))? {
                BatchMode::Preprocess
            } else {
                BatchMode::Registration
            },
            ..BatchSettings::default()
        };

        Self::new(
            data_dir.into(),
            output_dir.into(),
            value(ELASTIX_HOME_ENV).map(PathBuf::from),
            batch,
        )
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn elastix_home(&self) -> Option<&Path> {
        self.elastix_home.as_deref()
    }

    pub fn batch(&self) -> &BatchSettings {
        &self.batch
    }

    /// Locates elastix under `ELASTIX_HOME`, or in the platform defaults.
    pub fn resolve_elastix_installation(&self) -> RegistrationResult<ElastixInstallation> {
        ElastixInstallation::resolve(self.elastix_home.as_deref())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the transform kind from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns rigid.
pub fn transform_kind_from_env_value(value: Option<String>) -> RegistrationResult<TransformKind> {
    let parsed = non_empty(value)
        .map(|v| v.parse::<TransformKind>())
        .transpose()?;
    Ok(parsed.unwrap_or_default())
}

/// Parse a timeout in whole seconds, falling back to `default` when unset.
pub fn timeout_from_env_value(
    name: &str,
    value: Option<String>,
    default: Duration,
) -> RegistrationResult<Duration> {
    let Some(value) = non_empty(value) else {
        return Ok(default);
    };
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(RegistrationError::InvalidInput(format!(
            "{name} must be a positive number of seconds, got '{value}'"
        ))),
    }
}

/// Parse a boolean switch (`1/true/yes/on`, `0/false/no/off`); unset is false.
pub fn flag_from_env_value(name: &str, value: Option<String>) -> RegistrationResult<bool> {
    let Some(value) = non_empty(value) else {
        return Ok(false);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RegistrationError::InvalidInput(format!(
            "{name} must be a boolean, got '{value}'"
        ))),
    }
}
