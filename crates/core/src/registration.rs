//! ADC to T2W registration through elastix and transformix.

use crate::constants::{ELASTIX_TIMEOUT, TRANSFORMIX_TIMEOUT};
use crate::elastix::ElastixInstallation;
use crate::parameters::{ElastixParameters, ParameterOverrides, TransformKind};
use crate::paths::elastix::{ResultImageFile, TransformParametersFile, TransformixLogFile};
use crate::paths::patient::{parameter_file_name, patient_output_dir, RegisteredAdcFile};
use crate::patient::{PatientCase, PatientId};
use crate::tool::{ProcessRunner, Tool, ToolRunner};
use crate::{FailureKind, RegistrationError, RegistrationResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolTimeouts {
    pub elastix: Duration,
    pub transformix: Duration,
}

impl ToolTimeouts {
    /// Rejects a zero time limit for either tool.
    pub fn validate(&self) -> RegistrationResult<()> {
        for (tool, limit) in [(Tool::Elastix, self.elastix), (Tool::Transformix, self.transformix)] {
            if limit.is_zero() {
                return Err(RegistrationError::InvalidInput(format!(
                    "{tool} timeout must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            elastix: ELASTIX_TIMEOUT,
            transformix: TRANSFORMIX_TIMEOUT,
        }
    }
}

/// How registrations are parameterised.
#[derive(Debug, Clone, Default)]
pub struct RegistrationSettings {
    pub kind: TransformKind,
    /// Replaces the embedded default parameter file for `kind`.
    pub parameter_file: Option<PathBuf>,
    pub overrides: ParameterOverrides,
    pub timeouts: ToolTimeouts,
}

impl RegistrationSettings {
    /// The parameter map handed to elastix: the base file with overrides applied.
    pub fn effective_parameters(&self) -> RegistrationResult<ElastixParameters> {
        let mut parameters = match &self.parameter_file {
            Some(path) => ElastixParameters::load(path)?,
            None => self.kind.default_parameters()?,
        };
        parameters.apply_overrides(&self.overrides, self.kind)?;
        Ok(parameters)
    }
}

/// One elastix + transformix run.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub patient_id: PatientId,
    pub fixed: PathBuf,
    pub moving: PathBuf,
    /// Receives the parameter file, elastix output and `transformix.log`.
    pub output_dir: PathBuf,
    /// Where transformix writes `result.nii.gz`.
    pub resample_dir: PathBuf,
    /// Final location of the resampled moving image.
    pub registered_path: PathBuf,
    pub fixed_mask: Option<PathBuf>,
}

/// Files and logs of a successful registration.
#[derive(Debug, Clone)]
pub struct RegistrationArtifacts {
    pub registered_path: PathBuf,
    pub transform_parameters_path: PathBuf,
    pub output_dir: PathBuf,
    pub parameter_file: PathBuf,
    pub parameter_file_sha256: String,
    pub elastix_log: String,
    pub transformix_log: String,
}

/// Result of a standalone transformix run.
#[derive(Debug, Clone)]
pub struct TransformixRun {
    pub result_path: PathBuf,
    pub log: String,
}

/// Per-patient record written to the reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub patient_id: PatientId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_adc_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_parameters_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastix_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformix_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<FailureKind>,
    #[serde(default)]
    pub outputs_saved: Vec<PathBuf>,
    pub execution_time_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_file_sha256: Option<String>,
}

impl RegistrationOutcome {
    pub fn succeeded(patient_id: PatientId, artifacts: RegistrationArtifacts, elapsed: Duration) -> Self {
        Self {
            patient_id,
            success: true,
            outputs_saved: vec![
                artifacts.registered_path.clone(),
                artifacts.transform_parameters_path.clone(),
                artifacts.parameter_file,
            ],
            registered_adc_path: Some(artifacts.registered_path),
            transform_parameters_path: Some(artifacts.transform_parameters_path),
            output_directory: Some(artifacts.output_dir),
            elastix_log: Some(artifacts.elastix_log),
            transformix_log: Some(artifacts.transformix_log),
            error: None,
            error_type: None,
            execution_time_secs: elapsed.as_secs_f64(),
            parameter_file_sha256: Some(artifacts.parameter_file_sha256),
        }
    }

    pub fn failed(patient_id: PatientId, error: &RegistrationError, elapsed: Duration) -> Self {
        let kind = error.failure_kind();
        let message = match kind {
            FailureKind::MissingInput => error.to_string(),
            FailureKind::SubprocessError => format!("Registration failed for {patient_id}: {error}"),
            FailureKind::UnexpectedError => format!("Unexpected error for {patient_id}: {error}"),
        };
        Self {
            patient_id,
            success: false,
            registered_adc_path: None,
            transform_parameters_path: None,
            output_directory: None,
            elastix_log: None,
            transformix_log: None,
            error: Some(message),
            error_type: Some(kind),
            outputs_saved: Vec::new(),
            execution_time_secs: elapsed.as_secs_f64(),
            parameter_file_sha256: None,
        }
    }
}

/// Runs registrations with a fixed installation and parameter map.
pub struct RegistrationService<R: ToolRunner = ProcessRunner> {
    installation: ElastixInstallation,
    runner: R,
    kind: TransformKind,
    parameters: ElastixParameters,
    timeouts: ToolTimeouts,
}

impl<R: ToolRunner> RegistrationService<R> {
    /// Resolves the effective parameter map up front so invalid settings fail
    /// before any patient is processed.
    pub fn new(
        installation: ElastixInstallation,
        runner: R,
        settings: &RegistrationSettings,
    ) -> RegistrationResult<Self> {
        settings.timeouts.validate()?;
        Ok(Self {
            installation,
            runner,
            kind: settings.kind,
            parameters: settings.effective_parameters()?,
            timeouts: settings.timeouts,
        })
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn parameters(&self) -> &ElastixParameters {
        &self.parameters
    }

    pub fn installation(&self) -> &ElastixInstallation {
        &self.installation
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn register(&self, request: &RegistrationRequest) -> RegistrationResult<RegistrationArtifacts> {
        let output_dir = &request.output_dir;
        create_dir(output_dir)?;
        remove_stale(&TransformParametersFile::in_dir(output_dir))?;
        remove_stale(&request.registered_path)?;

        let parameter_file = output_dir.join(parameter_file_name(self.kind));
        let rendered = self.parameters.render();
        fs::write(&parameter_file, &rendered).map_err(RegistrationError::FileWrite)?;
        let parameter_file_sha256 = hex::encode(Sha256::digest(rendered.as_bytes()));

        let elastix = self.installation.elastix_command(
            &request.fixed,
            &request.moving,
            &parameter_file,
            output_dir,
            request.fixed_mask.as_deref(),
            self.timeouts.elastix,
        );
        let elastix_output = self.runner.run_checked(&elastix)?;

        let transform_parameters_path = TransformParametersFile::in_dir(output_dir);
        let transformix =
            self.apply_transform(&request.moving, &transform_parameters_path, &request.resample_dir)?;

        if transformix.result_path != request.registered_path {
            move_file(&transformix.result_path, &request.registered_path)?;
        }

        if request.resample_dir != *output_dir {
            let log = TransformixLogFile::in_dir(&request.resample_dir);
            if log.is_file() {
                move_file(&log, &TransformixLogFile::in_dir(output_dir))?;
            }
        }

        Ok(RegistrationArtifacts {
            registered_path: request.registered_path.clone(),
            transform_parameters_path,
            output_dir: output_dir.clone(),
            parameter_file,
            parameter_file_sha256,
            elastix_log: elastix_output.stdout,
            transformix_log: transformix.log,
        })
    }

    /// Applies an existing transform to `moving`, writing `result.nii.gz` into `output_dir`.
    pub fn apply_transform(
        &self,
        moving: &Path,
        transform_parameters: &Path,
        output_dir: &Path,
    ) -> RegistrationResult<TransformixRun> {
        if !transform_parameters.is_file() {
            return Err(RegistrationError::TransformParametersNotFound(
                transform_parameters.to_path_buf(),
            ));
        }
        create_dir(output_dir)?;
        let result_path = ResultImageFile::in_dir(output_dir);
        remove_stale(&result_path)?;

        let invocation = self.installation.transformix_command(
            moving,
            output_dir,
            transform_parameters,
            self.timeouts.transformix,
        );
        let output = self.runner.run_checked(&invocation)?;

        if !result_path.is_file() {
            return Err(RegistrationError::ResultNotFound(result_path));
        }
        Ok(TransformixRun {
            result_path,
            log: output.stdout,
        })
    }

    /// Registers the patient's ADC (moving) onto its T2W (fixed).
    ///
    /// Elastix output goes to `<output_root>/<id>/`; the registered image is
    /// written next to the input ADC as `<id>_adc_reg.nii.gz`. Failures are
    /// captured in the returned outcome.
    pub fn register_adc_to_t2w(&self, case: &PatientCase, output_root: &Path) -> RegistrationOutcome {
        let started = Instant::now();
        tracing::info!("starting ADC-T2W {} registration for patient {}", self.kind, case.id);

        let adc_dir = case.adc_dir().to_path_buf();
        let request = RegistrationRequest {
            patient_id: case.id.clone(),
            fixed: case.t2w_path.clone(),
            moving: case.adc_path.clone(),
            output_dir: patient_output_dir(output_root, &case.id),
            registered_path: RegisteredAdcFile::path(&adc_dir, &case.id),
            resample_dir: adc_dir,
            fixed_mask: None,
        };

        match self.register(&request) {
            Ok(artifacts) => {
                tracing::info!("registered ADC to T2W for patient {}", case.id);
                RegistrationOutcome::succeeded(case.id.clone(), artifacts, started.elapsed())
            }
            Err(e) => {
                let outcome = RegistrationOutcome::failed(case.id.clone(), &e, started.elapsed());
                tracing::error!("{}", outcome.error.as_deref().unwrap_or_default());
                outcome
            }
        }
    }
}

pub(crate) fn create_dir(path: &Path) -> RegistrationResult<()> {
    fs::create_dir_all(path).map_err(|source| RegistrationError::DirCreation {
        path: path.to_path_buf(),
        source,
    })
}

/// Deletes an output left behind by an earlier run; a missing file is fine.
fn remove_stale(path: &Path) -> RegistrationResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RegistrationError::FileWrite(e)),
    }
}

/// Renames `from` to `to`, copying when they are on different filesystems.
pub(crate) fn move_file(from: &Path, to: &Path) -> RegistrationResult<()> {
    let move_error = |source: std::io::Error| RegistrationError::FileMove {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(move_error)?;
    fs::remove_file(from).map_err(move_error)
}
