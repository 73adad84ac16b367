use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mrireg_core::{
    write_results_csv, write_summary_report, BatchProcessor, CoreConfig, ProcessRunner,
    RegistrationService, SummaryReport,
};

/// Main entry point for the batch registration runner
///
/// Registers every patient under the data directory and writes the error log,
/// the per-patient results CSV and the JSON summary report to the output
/// directory.
///
/// # Environment Variables
/// - `MRIREG_DATA_DIR`: patient data directory (default: "data")
/// - `MRIREG_OUTPUT_DIR`: output directory (default: "output")
/// - `ELASTIX_HOME`: elastix installation directory (default: platform search)
/// - `MRIREG_TRANSFORM`: rigid, affine, bspline or nonrigid (default: rigid)
/// - `MRIREG_PARAMETER_FILE`: custom elastix parameter file
/// - `MRIREG_ELASTIX_TIMEOUT_SECS` / `MRIREG_TRANSFORMIX_TIMEOUT_SECS`: per-run limits
/// - `MRIREG_PREPROCESS`: standardize and crop to the prostate ROI first
///
/// # Returns
/// * `Ok(())` - If the batch ran, whatever the per-patient results
/// * `Err(anyhow::Error)` - If configuration, elastix discovery or report writing fails
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("mrireg=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoreConfig::from_lookup(|name| std::env::var(name).ok())?;

    let installation = config.resolve_elastix_installation()?;
    let runner = ProcessRunner::new();
    installation.verify(&runner)?;
    tracing::info!("++ Using elastix at {}", installation.elastix().display());

    let settings = config.batch();
    let service = RegistrationService::new(installation, runner, &settings.registration_settings())?;

    tracing::info!(
        "++ Registering patients from {} into {}",
        config.data_dir().display(),
        config.output_dir().display()
    );
    let run = BatchProcessor::new(service, settings).run(config.data_dir(), config.output_dir())?;

    let report = SummaryReport::from_run(&run);
    let report_path = write_summary_report(config.output_dir(), &report)?;
    let results_path = write_results_csv(config.output_dir(), &run.outcomes)?;

    let summary = &run.summary;
    tracing::info!(
        "Batch {} finished in {:.1}s: {} succeeded, {} failed",
        report.pipeline_info.run_id,
        run.elapsed.as_secs_f64(),
        summary.successful_count,
        summary.failed_count
    );
    if !summary.failed_patients.is_empty() {
        tracing::warn!("Failed patients: {}", serde_json::to_string(&summary.failed_patients)?);
    }
    tracing::info!(
        "Reports: {}, {}, {}",
        report_path.display(),
        results_path.display(),
        summary.error_log_path.display()
    );

    Ok(())
}
