//! Sequential cohort processing.
//!
//! Patients are handled one at a time. A failure is recorded in the error log
//! and the outcome list, and the loop moves on to the next patient.

use crate::discovery::discover_patients;
use crate::parameters::{ParameterOverrides, TransformKind};
use crate::paths::output::ErrorLogFile;
use crate::patient::PatientId;
use crate::preprocess::{PreprocessSettings, Preprocessor};
use crate::registration::{
    create_dir, RegistrationOutcome, RegistrationService, RegistrationSettings, ToolTimeouts,
};
use crate::report::BatchSummary;
use crate::tool::{ProcessRunner, ToolRunner};
use crate::validation::{validate_distinct_dirs, validate_timeout_secs};
use crate::{RegistrationError, RegistrationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// What happens to each patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Register the raw ADC onto the raw T2W.
    #[default]
    Registration,
    /// Standardize, crop to the prostate ROI, then register.
    Preprocess,
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::Registration => write!(f, "registration"),
            BatchMode::Preprocess => write!(f, "preprocess"),
        }
    }
}

/// Batch options, as read from the environment or a YAML file.
///
/// ```yaml
/// transform: bspline
/// overrides:
///   maximum_iterations: 500
/// mode: preprocess
/// preprocess:
///   standardization: z_score
///   roi_padding: 15
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub transform: TransformKind,
    pub parameter_file: Option<PathBuf>,
    pub overrides: ParameterOverrides,
    pub elastix_timeout_secs: u64,
    pub transformix_timeout_secs: u64,
    pub mode: BatchMode,
    pub preprocess: PreprocessSettings,
}

impl Default for BatchSettings {
    fn default() -> Self {
        let timeouts = ToolTimeouts::default();
        Self {
            transform: TransformKind::default(),
            parameter_file: None,
            overrides: ParameterOverrides::default(),
            elastix_timeout_secs: timeouts.elastix.as_secs(),
            transformix_timeout_secs: timeouts.transformix.as_secs(),
            mode: BatchMode::default(),
            preprocess: PreprocessSettings::default(),
        }
    }
}

impl BatchSettings {
    pub fn load_yaml(path: &Path) -> RegistrationResult<Self> {
        let text = std::fs::read_to_string(path).map_err(RegistrationError::FileRead)?;
        let settings: Self =
            serde_yaml::from_str(&text).map_err(RegistrationError::YamlDeserialization)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects zero tool timeouts.
    pub fn validate(&self) -> RegistrationResult<()> {
        validate_timeout_secs("elastix_timeout_secs", self.elastix_timeout_secs)?;
        validate_timeout_secs("transformix_timeout_secs", self.transformix_timeout_secs)
    }

    pub fn registration_settings(&self) -> RegistrationSettings {
        RegistrationSettings {
            kind: self.transform,
            parameter_file: self.parameter_file.clone(),
            overrides: self.overrides.clone(),
            timeouts: ToolTimeouts {
                elastix: Duration::from_secs(self.elastix_timeout_secs),
                transformix: Duration::from_secs(self.transformix_timeout_secs),
            },
        }
    }
}

/// `registration_errors.csv`: one row per failed patient, flushed as written.
pub struct ErrorLog<W: Write = File> {
    path: PathBuf,
    writer: csv::Writer<W>,
}

impl ErrorLog {
    pub fn create(path: PathBuf) -> RegistrationResult<Self> {
        let file = File::create(&path).map_err(RegistrationError::FileWrite)?;
        Self::from_writer(path, file)
    }
}

impl<W: Write> ErrorLog<W> {
    pub const HEADER: [&'static str; 3] = ["PatientID", "Error", "Timestamp"];

    /// Writes the header to `writer`; `path` is only reported.
    pub fn from_writer(path: PathBuf, writer: W) -> RegistrationResult<Self> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(Self::HEADER)?;
        writer.flush().map_err(RegistrationError::FileWrite)?;
        Ok(Self { path, writer })
    }

    pub fn record(&mut self, patient_id: &PatientId, message: &str) -> RegistrationResult<()> {
        let timestamp = Utc::now().to_rfc3339();
        self.writer
            .write_record([patient_id.as_str(), message, timestamp.as_str()])?;
        self.writer.flush().map_err(RegistrationError::FileWrite)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Everything a batch run produced, ready for reporting.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub summary: BatchSummary,
    pub outcomes: Vec<RegistrationOutcome>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub mode: BatchMode,
    pub kind: TransformKind,
}

pub struct BatchProcessor<R: ToolRunner = ProcessRunner> {
    service: RegistrationService<R>,
    mode: BatchMode,
    preprocess: PreprocessSettings,
}

impl<R: ToolRunner> BatchProcessor<R> {
    pub fn new(service: RegistrationService<R>, settings: &BatchSettings) -> Self {
        Self {
            service,
            mode: settings.mode,
            preprocess: settings.preprocess.clone(),
        }
    }

    pub fn service(&self) -> &RegistrationService<R> {
        &self.service
    }

    /// Processes every patient directory under `data_dir`.
    ///
    /// Only setup problems (unreadable data directory, unwritable output or
    /// error log) abort the run; per-patient failures end up in the outcomes.
    pub fn run(&self, data_dir: &Path, output_dir: &Path) -> RegistrationResult<BatchRun> {
        let started_at = Utc::now();
        let started = Instant::now();

        validate_distinct_dirs(data_dir, output_dir)?;
        let patients = discover_patients(data_dir)?;
        create_dir(output_dir)?;
        let mut error_log = ErrorLog::create(output_dir.join(ErrorLogFile::NAME))?;

        let preprocessor = match self.mode {
            BatchMode::Preprocess => Some(Preprocessor::prepare(
                &patients,
                output_dir,
                self.preprocess.clone(),
            )?),
            BatchMode::Registration => None,
        };

        tracing::info!(
            "processing {} patient(s) in {} mode with {} registration",
            patients.len(),
            self.mode,
            self.service.kind()
        );

        let mut outcomes = Vec::with_capacity(patients.len());
        for (index, patient) in patients.iter().enumerate() {
            tracing::info!("[{}/{}] patient {}", index + 1, patients.len(), patient.id);

            let outcome = match &patient.files {
                Err(missing) => {
                    let error = RegistrationError::from(missing.clone());
                    tracing::warn!("{}: {error}", patient.id);
                    RegistrationOutcome::failed(patient.id.clone(), &error, Duration::ZERO)
                }
                Ok(case) => match &preprocessor {
                    Some(pre) => pre.process(&self.service, case, output_dir),
                    None => self.service.register_adc_to_t2w(case, output_dir),
                },
            };

            log_failure(&mut error_log, &outcome);
            outcomes.push(outcome);
        }

        let summary = BatchSummary::from_outcomes(&outcomes, error_log.path());
        tracing::info!(
            "batch finished: {}/{} succeeded ({:.1}%)",
            summary.successful_count,
            summary.total_patients,
            summary.success_rate * 100.0
        );

        Ok(BatchRun {
            summary,
            outcomes,
            started_at,
            elapsed: started.elapsed(),
            mode: self.mode,
            kind: self.service.kind(),
        })
    }
}

/// Appends a failed outcome to the error log. A log write failure is reported
/// but does not stop the batch.
fn log_failure<W: Write>(error_log: &mut ErrorLog<W>, outcome: &RegistrationOutcome) {
    let Some(message) = &outcome.error else {
        return;
    };
    if let Err(e) = error_log.record(&outcome.patient_id, message) {
        tracing::error!(
            "{}: could not append to {}: {e}",
            outcome.patient_id,
            error_log.path().display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elastix::ElastixInstallation;
    use crate::testing::{write_patient, FakeElastix};
    use crate::FailureKind;
    use tempfile::TempDir;

    fn processor<'a>(fake: &'a FakeElastix, settings: &BatchSettings) -> BatchProcessor<&'a FakeElastix> {
        let install = ElastixInstallation::new("elastix".into(), "transformix".into(), None);
        let service =
            RegistrationService::new(install, fake, &settings.registration_settings()).unwrap();
        BatchProcessor::new(service, settings)
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn failures_are_logged_and_processing_continues() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let output = temp.path().join("output");
        write_patient(&data, "p1", true, true);
        write_patient(&data, "p2", false, true);
        write_patient(&data, "p3", true, true);
        write_patient(&data, "p4", true, true);

        let fake = FakeElastix {
            fail_moving: Some("p3_adc".into()),
            ..Default::default()
        };
        let run = processor(&fake, &BatchSettings::default())
            .run(&data, &output)
            .unwrap();

        let ids = |ok: bool| -> Vec<&str> {
            run.outcomes
                .iter()
                .filter(|o| o.success == ok)
                .map(|o| o.patient_id.as_str())
                .collect()
        };
        assert_eq!(ids(true), vec!["p1", "p4"]);
        assert_eq!(ids(false), vec!["p2", "p3"]);
        assert_eq!(run.summary.total_patients, 4);
        assert_eq!(run.summary.successful_count, 2);
        assert_eq!(run.summary.failed_count, 2);
        assert!((run.summary.success_rate - 0.5).abs() < 1e-12);

        assert_eq!(run.outcomes[1].error_type, Some(FailureKind::MissingInput));
        assert_eq!(run.outcomes[2].error_type, Some(FailureKind::SubprocessError));

        let log = output.join("registration_errors.csv");
        let mut reader = csv::Reader::from_path(&log).unwrap();
        assert_eq!(
            reader.headers().unwrap(),
            vec!["PatientID", "Error", "Timestamp"]
        );
        let rows = read_rows(&log);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "p2");
        assert!(rows[0][1].starts_with("ADC file not found"));
        assert_eq!(rows[1][0], "p3");
        assert!(rows[1][1].starts_with("Registration failed for p3"));
        assert!(DateTime::parse_from_rfc3339(&rows[1][2]).is_ok());

        // Missing input never reaches elastix.
        assert_eq!(fake.calls_for(crate::tool::Tool::Elastix).len(), 3);
    }

    #[test]
    fn empty_cohort_has_zero_success_rate() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let fake = FakeElastix::default();
        let run = processor(&fake, &BatchSettings::default())
            .run(&data, &temp.path().join("out"))
            .unwrap();

        assert_eq!(run.summary.total_patients, 0);
        assert_eq!(run.summary.success_rate, 0.0);
        assert!(temp.path().join("out").join("registration_errors.csv").is_file());
    }

    #[test]
    fn missing_data_directory_aborts_the_run() {
        let temp = TempDir::new().unwrap();
        let fake = FakeElastix::default();
        let result = processor(&fake, &BatchSettings::default())
            .run(&temp.path().join("missing"), &temp.path().join("out"));
        assert!(matches!(result, Err(RegistrationError::InvalidInput(_))));
    }

    #[test]
    fn yaml_settings_fill_in_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.yaml");
        std::fs::write(
            &path,
            "transform: bspline\noverrides:\n  maximum_iterations: 250\nmode: preprocess\npreprocess:\n  standardization: z_score\n  roi_padding: 4\n",
        )
        .unwrap();

        let settings = BatchSettings::load_yaml(&path).unwrap();
        assert_eq!(settings.transform, TransformKind::BSpline);
        assert_eq!(settings.mode, BatchMode::Preprocess);
        assert_eq!(settings.overrides.maximum_iterations, Some(250));
        assert_eq!(settings.preprocess.roi_padding, 4);
        assert!(settings.preprocess.segmentation);
        assert_eq!(settings.elastix_timeout_secs, 1800);

        let registration = settings.registration_settings();
        assert_eq!(registration.kind, TransformKind::BSpline);
        assert_eq!(registration.timeouts.transformix, Duration::from_secs(900));
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.yaml");
        std::fs::write(&path, "transform: demons\n").unwrap();
        assert!(matches!(
            BatchSettings::load_yaml(&path),
            Err(RegistrationError::YamlDeserialization(_))
        ));
    }

    #[test]
    fn zero_timeouts_in_yaml_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("batch.yaml");
        std::fs::write(&path, "transform: affine\nelastix_timeout_secs: 0\n").unwrap();
        assert!(matches!(
            BatchSettings::load_yaml(&path),
            Err(RegistrationError::InvalidInput(msg)) if msg.contains("elastix_timeout_secs")
        ));

        std::fs::write(&path, "transformix_timeout_secs: 0\n").unwrap();
        assert!(matches!(
            BatchSettings::load_yaml(&path),
            Err(RegistrationError::InvalidInput(msg)) if msg.contains("transformix_timeout_secs")
        ));
    }

    #[test]
    fn transformix_failure_is_logged_without_a_registered_image() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let output = temp.path().join("output");
        write_patient(&data, "p1", true, true);

        let fake = FakeElastix {
            transformix_exit: 1,
            ..Default::default()
        };
        let run = processor(&fake, &BatchSettings::default())
            .run(&data, &output)
            .unwrap();

        let outcome = &run.outcomes[0];
        assert!(!outcome.success);
        assert_eq!(outcome.error_type, Some(FailureKind::SubprocessError));
        assert!(!data.join("p1").join("p1_adc_reg.nii.gz").exists());

        let rows = read_rows(&output.join("registration_errors.csv"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "p1");
        assert!(
            rows[0][1].contains("transformix failed with exit code 1"),
            "{}",
            rows[0][1]
        );
    }

    #[test]
    fn output_dir_equal_to_data_dir_is_rejected() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        write_patient(&data, "p1", true, true);

        let fake = FakeElastix::default();
        let result = processor(&fake, &BatchSettings::default()).run(&data, &data);

        assert!(matches!(result, Err(RegistrationError::InvalidInput(_))));
        assert!(!data.join("registration_errors.csv").exists());
        assert!(fake.calls.borrow().is_empty());
    }

    /// Accepts the header, then fails every write while `broken` is set.
    struct BrokenDisk {
        broken: std::rc::Rc<std::cell::Cell<bool>>,
        written: std::rc::Rc<std::cell::RefCell<Vec<u8>>>,
    }

    impl Write for BrokenDisk {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.broken.get() {
                return Err(std::io::Error::other("disk full"));
            }
            self.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn error_log_write_failure_does_not_abort() {
        let broken = std::rc::Rc::new(std::cell::Cell::new(false));
        let written = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let disk = BrokenDisk {
            broken: broken.clone(),
            written: written.clone(),
        };
        let mut log = ErrorLog::from_writer(PathBuf::from("registration_errors.csv"), disk).unwrap();
        let header_len = written.borrow().len();

        let failed = RegistrationOutcome::failed(
            PatientId::new("p1").unwrap(),
            &RegistrationError::InvalidInput("bad input".into()),
            Duration::ZERO,
        );
        broken.set(true);
        log_failure(&mut log, &failed);

        assert_eq!(written.borrow().len(), header_len);
    }
}
