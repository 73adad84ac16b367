//! Batch summaries and report files.

use crate::batch::{BatchMode, BatchRun};
use crate::constants::PIPELINE_NAME;
use crate::parameters::TransformKind;
use crate::paths::output::{BatchResultsFile, SummaryReportFile};
use crate::patient::PatientId;
use crate::registration::{create_dir, RegistrationOutcome};
use crate::{RegistrationError, RegistrationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Counts over one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_patients: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    /// Successful over discovered patient directories; 0.0 for an empty cohort.
    pub success_rate: f64,
    pub successful_patients: Vec<PatientId>,
    pub failed_patients: Vec<PatientId>,
    pub error_log_path: PathBuf,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[RegistrationOutcome], error_log_path: &Path) -> Self {
        let (ok, failed): (Vec<_>, Vec<_>) = outcomes.iter().partition(|o| o.success);
        let total = outcomes.len();
        let success_rate = if total == 0 {
            0.0
        } else {
            ok.len() as f64 / total as f64
        };

        Self {
            total_patients: total,
            successful_count: ok.len(),
            failed_count: failed.len(),
            success_rate,
            successful_patients: ok.iter().map(|o| o.patient_id.clone()).collect(),
            failed_patients: failed.iter().map(|o| o.patient_id.clone()).collect(),
            error_log_path: error_log_path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub pipeline_name: String,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_execution_time_secs: f64,
    pub registration_type: TransformKind,
    pub mode: BatchMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_patients: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub success_rate: f64,
    pub error_log_path: PathBuf,
}

/// Contents of `registration_summary_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub pipeline_info: PipelineInfo,
    pub processing_summary: ProcessingSummary,
    pub successful_patients: Vec<PatientId>,
    pub failed_patients: Vec<PatientId>,
    pub detailed_results: BTreeMap<PatientId, RegistrationOutcome>,
}

impl SummaryReport {
    /// Builds the report for `run` under a fresh run id.
    pub fn from_run(run: &BatchRun) -> Self {
        let summary = &run.summary;
        Self {
            pipeline_info: PipelineInfo {
                pipeline_name: PIPELINE_NAME.to_string(),
                run_id: Uuid::new_v4(),
                timestamp: run.started_at,
                total_execution_time_secs: run.elapsed.as_secs_f64(),
                registration_type: run.kind,
                mode: run.mode,
            },
            processing_summary: ProcessingSummary {
                total_patients: summary.total_patients,
                successful_count: summary.successful_count,
                failed_count: summary.failed_count,
                success_rate: summary.success_rate,
                error_log_path: summary.error_log_path.clone(),
            },
            successful_patients: summary.successful_patients.clone(),
            failed_patients: summary.failed_patients.clone(),
            detailed_results: run
                .outcomes
                .iter()
                .map(|o| (o.patient_id.clone(), o.clone()))
                .collect(),
        }
    }
}

/// Writes `registration_summary_report.json` and returns its path.
pub fn write_summary_report(output_dir: &Path, report: &SummaryReport) -> RegistrationResult<PathBuf> {
    create_dir(output_dir)?;
    let path = output_dir.join(SummaryReportFile::NAME);
    let json = serde_json::to_string_pretty(report).map_err(RegistrationError::Serialization)?;
    std::fs::write(&path, json).map_err(RegistrationError::FileWrite)?;
    tracing::info!("summary report written to {}", path.display());
    Ok(path)
}

/// Writes `batch_results.csv`, one row per patient, and returns its path.
pub fn write_results_csv(
    output_dir: &Path,
    outcomes: &[RegistrationOutcome],
) -> RegistrationResult<PathBuf> {
    create_dir(output_dir)?;
    let path = output_dir.join(BatchResultsFile::NAME);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["PatientID", "Status", "ExecutionTime", "OutputsSaved", "Error"])?;

    for outcome in outcomes {
        let outputs = outcome
            .outputs_saved
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(",");
        let seconds = format!("{:.2}", outcome.execution_time_secs);
        writer.write_record([
            outcome.patient_id.as_str(),
            if outcome.success { "Success" } else { "Failed" },
            seconds.as_str(),
            outputs.as_str(),
            outcome.error.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush().map_err(RegistrationError::FileWrite)?;
    Ok(path)
}
