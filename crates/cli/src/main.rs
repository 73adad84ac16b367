use clap::{Args, Parser, Subcommand};
use mrireg_core::{
    discover_patients, locate_inputs, write_results_csv, write_summary_report, BatchMode,
    BatchProcessor, BatchSettings, ElastixInstallation, PatientId, ProcessRunner,
    RegistrationError, RegistrationService, SummaryReport,
};
use mrireg_core::constants::ELASTIX_HOME_ENV;
use mrireg_imaging::{
    extract_bounding_box, load_parameters, save_parameters, segment_prostate,
    standardizer_from_parameters, IntensityStandardizer, NyulStandardizer, StandardizationMethod,
    Volume, ZScoreStandardizer,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mrireg")]
#[command(about = "ADC to T2W prostate MRI registration with elastix")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate elastix/transformix and check they run
    Check {
        /// Elastix installation directory (defaults to ELASTIX_HOME, then platform paths)
        #[arg(long)]
        elastix_home: Option<PathBuf>,
    },
    /// List patient directories and whether both images are present
    Discover {
        /// Directory with one sub-directory per patient
        data_dir: PathBuf,
    },
    /// Print the effective elastix parameter file
    Params {
        /// rigid, affine or bspline
        #[arg(default_value = "rigid")]
        kind: String,
        #[command(flatten)]
        overrides: OverrideArgs,
        /// Base parameter file instead of the built-in default
        #[arg(long)]
        parameter_file: Option<PathBuf>,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Register one patient's ADC onto its T2W
    Register {
        /// Patient directory holding <id>_adc.nii.gz and <id>_t2w.nii.gz
        patient_dir: PathBuf,
        /// Output root; results go to <output_dir>/<id>/
        output_dir: PathBuf,
        #[command(flatten)]
        registration: RegistrationArgs,
    },
    /// Apply an existing transform with transformix
    Apply {
        /// Image to resample
        image: PathBuf,
        /// TransformParameters.0.txt from a previous registration
        transform_parameters: PathBuf,
        /// Directory receiving result.nii.gz and transformix.log
        output_dir: PathBuf,
        #[arg(long)]
        elastix_home: Option<PathBuf>,
    },
    /// Register every patient under a data directory
    Batch {
        data_dir: PathBuf,
        output_dir: PathBuf,
        /// YAML batch settings; command-line flags take precedence
        #[arg(long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        registration: RegistrationArgs,
        /// Standardize and crop to the prostate ROI before registering
        #[arg(long)]
        preprocess: bool,
        /// T2W standardization for --preprocess: nyul or zscore
        #[arg(long)]
        standardization: Option<String>,
        /// Skip the fallback prostate mask and ROI crop
        #[arg(long)]
        no_segmentation: bool,
        /// ROI padding in voxels
        #[arg(long)]
        padding: Option<usize>,
    },
    /// Train a Nyul standardizer on T2W volumes
    TrainNyul {
        /// JSON file receiving the trained parameters
        output: PathBuf,
        /// Training volumes
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Standardize the intensities of one volume
    Standardize {
        input: PathBuf,
        output: PathBuf,
        /// Saved standardizer parameters; per-image z-score when omitted
        #[arg(long)]
        parameters: Option<PathBuf>,
        /// Mean/std instead of median/MAD for per-image z-score
        #[arg(long)]
        classic: bool,
    },
    /// Crop a volume to the padded bounding box of a mask
    Roi {
        image: PathBuf,
        output: PathBuf,
        /// Binary mask on the image grid; the fallback segmentation is used when omitted
        #[arg(long)]
        mask: Option<PathBuf>,
        #[arg(long, default_value_t = 10)]
        padding: usize,
        /// Also write the cropped mask here
        #[arg(long)]
        mask_output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct OverrideArgs {
    /// MaximumNumberOfIterations
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Metric name, e.g. AdvancedNormalizedCorrelation
    #[arg(long)]
    metric: Option<String>,
    /// FinalGridSpacingInPhysicalUnits (bspline only)
    #[arg(long)]
    grid_spacing: Option<f64>,
    /// NumberOfResolutions
    #[arg(long)]
    resolutions: Option<u32>,
}

#[derive(Args)]
struct RegistrationArgs {
    /// rigid, affine or bspline
    #[arg(long)]
    transform: Option<String>,
    #[arg(long)]
    parameter_file: Option<PathBuf>,
    #[command(flatten)]
    overrides: OverrideArgs,
    #[arg(long)]
    elastix_home: Option<PathBuf>,
    /// Elastix time limit in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    elastix_timeout: Option<u64>,
    /// Transformix time limit in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    transformix_timeout: Option<u64>,
}

impl RegistrationArgs {
    /// Layers the flags over `settings`.
    fn apply(&self, settings: &mut BatchSettings) -> Result<(), RegistrationError> {
        if let Some(kind) = &self.transform {
            settings.transform = kind.parse()?;
        }
        if let Some(path) = &self.parameter_file {
            settings.parameter_file = Some(path.clone());
        }
        if let Some(secs) = self.elastix_timeout {
            settings.elastix_timeout_secs = secs;
        }
        if let Some(secs) = self.transformix_timeout {
            settings.transformix_timeout_secs = secs;
        }
        let o = &self.overrides;
        let target = &mut settings.overrides;
        target.maximum_iterations = o.max_iterations.or(target.maximum_iterations);
        target.metric = o.metric.clone().or(target.metric.take());
        target.final_grid_spacing = o.grid_spacing.or(target.final_grid_spacing);
        target.number_of_resolutions = o.resolutions.or(target.number_of_resolutions);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mrireg=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Check { elastix_home }) => {
            let installation = resolve_installation(elastix_home.as_deref())?;
            println!("elastix:     {}", installation.elastix().display());
            println!("transformix: {}", installation.transformix().display());
            match installation.library_dir() {
                Some(lib) => println!("libraries:   {}", lib.display()),
                None => println!("libraries:   (none)"),
            }
        }
        Some(Commands::Discover { data_dir }) => {
            let patients = discover_patients(&data_dir)?;
            if patients.is_empty() {
                println!("No patient directories found.");
            }
            for patient in patients {
                match patient.files {
                    Ok(_) => println!("{}: ready", patient.id),
                    Err(missing) => println!(
                        "{}: missing {} ({})",
                        patient.id,
                        missing.modality,
                        missing.path.display()
                    ),
                }
            }
        }
        Some(Commands::Params {
            kind,
            overrides,
            parameter_file,
            output,
        }) => {
            let mut settings = BatchSettings::default();
            RegistrationArgs {
                transform: Some(kind),
                parameter_file,
                overrides,
                elastix_home: None,
                elastix_timeout: None,
                transformix_timeout: None,
            }
            .apply(&mut settings)?;
            let parameters = settings.registration_settings().effective_parameters()?;
            match output {
                Some(path) => {
                    parameters.write_to(&path)?;
                    println!("Wrote {} parameters to {}", settings.transform, path.display());
                }
                None => print!("{}", parameters.render()),
            }
        }
        Some(Commands::Register {
            patient_dir,
            output_dir,
            registration,
        }) => {
            let mut settings = BatchSettings::default();
            registration.apply(&mut settings)?;
            let installation = resolve_installation(registration.elastix_home.as_deref())?;
            let service = RegistrationService::new(
                installation,
                ProcessRunner::new(),
                &settings.registration_settings(),
            )?;

            let id = PatientId::from_directory(&patient_dir)?;
            let case = locate_inputs(&patient_dir, &id).map_err(RegistrationError::from)?;
            let outcome = service.register_adc_to_t2w(&case, &output_dir);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if let Some(error) = outcome.error {
                return Err(error.into());
            }
        }
        Some(Commands::Apply {
            image,
            transform_parameters,
            output_dir,
            elastix_home,
        }) => {
            let installation = resolve_installation(elastix_home.as_deref())?;
            let settings = BatchSettings::default().registration_settings();
            let service = RegistrationService::new(installation, ProcessRunner::new(), &settings)?;
            let run = service.apply_transform(&image, &transform_parameters, &output_dir)?;
            println!("Resampled image written to {}", run.result_path.display());
        }
        Some(Commands::Batch {
            data_dir,
            output_dir,
            config,
            registration,
            preprocess,
            standardization,
            no_segmentation,
            padding,
        }) => {
            let mut settings = match &config {
                Some(path) => BatchSettings::load_yaml(path)?,
                None => BatchSettings::default(),
            };
            registration.apply(&mut settings)?;
            if preprocess {
                settings.mode = BatchMode::Preprocess;
            }
            if let Some(method) = standardization {
                settings.preprocess.standardization = method.parse::<StandardizationMethod>()?;
            }
            if no_segmentation {
                settings.preprocess.segmentation = false;
            }
            if let Some(padding) = padding {
                settings.preprocess.roi_padding = padding;
            }

            let installation = resolve_installation(registration.elastix_home.as_deref())?;
            let service = RegistrationService::new(
                installation,
                ProcessRunner::new(),
                &settings.registration_settings(),
            )?;
            let run = BatchProcessor::new(service, &settings).run(&data_dir, &output_dir)?;

            let report = write_summary_report(&output_dir, &SummaryReport::from_run(&run))?;
            let results = write_results_csv(&output_dir, &run.outcomes)?;
            let summary = &run.summary;
            println!(
                "Registered {}/{} patients ({:.1}%)",
                summary.successful_count,
                summary.total_patients,
                summary.success_rate * 100.0
            );
            if !summary.failed_patients.is_empty() {
                let failed: Vec<&str> =
                    summary.failed_patients.iter().map(PatientId::as_str).collect();
                println!("Failed: {}", failed.join(", "));
            }
            println!("Summary: {}", report.display());
            println!("Results: {}", results.display());
            println!("Errors:  {}", summary.error_log_path.display());
        }
        Some(Commands::TrainNyul { output, images }) => {
            let volumes = images
                .iter()
                .map(Volume::read)
                .collect::<Result<Vec<_>, _>>()?;
            let data: Vec<_> = volumes.iter().map(Volume::data).collect();
            let mut nyul = NyulStandardizer::new();
            nyul.train(&data)?;
            if let Some(parameters) = nyul.parameters() {
                save_parameters(&output, &parameters)?;
            }
            println!(
                "Trained Nyul standardizer on {} volume(s): {}",
                nyul.training_samples(),
                output.display()
            );
        }
        Some(Commands::Standardize {
            input,
            output,
            parameters,
            classic,
        }) => {
            let volume = Volume::read(&input)?;
            let standardizer: Box<dyn IntensityStandardizer> = match parameters {
                Some(path) => standardizer_from_parameters(load_parameters(path)?)?,
                None => Box::new(ZScoreStandardizer::new(!classic)),
            };
            let data = standardizer.transform(volume.data())?;
            volume.with_data(data)?.write(&output)?;
            println!(
                "Standardized ({}) {} -> {}",
                standardizer.method(),
                input.display(),
                output.display()
            );
        }
        Some(Commands::Roi {
            image,
            output,
            mask,
            padding,
            mask_output,
        }) => {
            let volume = Volume::read(&image)?;
            let mask = match mask {
                Some(path) => Volume::read(path)?,
                None => volume.with_data(segment_prostate(volume.data())?)?,
            };
            let (roi, roi_mask) = extract_bounding_box(&volume, &mask, padding)?;
            roi.write(&output)?;
            if let Some(path) = mask_output {
                roi_mask.write(path)?;
            }
            println!("ROI {:?} written to {}", roi.shape(), output.display());
        }
        None => {
            println!("Use 'mrireg --help' for commands");
        }
    }

    Ok(())
}

/// Resolves the installation and runs `elastix --help` once.
fn resolve_installation(
    elastix_home: Option<&Path>,
) -> Result<ElastixInstallation, RegistrationError> {
    let home = elastix_home
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(ELASTIX_HOME_ENV).map(PathBuf::from));
    let installation = ElastixInstallation::resolve(home.as_deref())?;
    installation.verify(&ProcessRunner::new())?;
    Ok(installation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_settings(args: &[&str]) -> Result<BatchSettings, clap::Error> {
        let cli = Cli::try_parse_from(args)?;
        let Some(Commands::Batch { registration, .. }) = cli.command else {
            panic!("expected the batch command");
        };
        let mut settings = BatchSettings::default();
        registration.apply(&mut settings).unwrap();
        Ok(settings)
    }

    #[test]
    fn zero_timeout_flags_are_rejected() {
        assert!(batch_settings(&["mrireg", "batch", "data", "out", "--elastix-timeout", "0"]).is_err());
        assert!(
            batch_settings(&["mrireg", "batch", "data", "out", "--transformix-timeout", "0"]).is_err()
        );
    }

    #[test]
    fn timeout_flags_override_settings() {
        let settings = batch_settings(&[
            "mrireg",
            "batch",
            "data",
            "out",
            "--elastix-timeout",
            "120",
            "--transformix-timeout",
            "30",
        ])
        .unwrap();
        assert_eq!(settings.elastix_timeout_secs, 120);
        assert_eq!(settings.transformix_timeout_secs, 30);
    }
}
