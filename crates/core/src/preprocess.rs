//! Standardization and ROI extraction ahead of registration.
//!
//! In preprocessing mode every patient goes through:
//!
//! 1. T2W standardization with the cohort Nyul model (or per-image Z-score),
//!    ADC standardization with per-image Z-score
//! 2. optionally, a fallback prostate mask on the standardized T2W and a
//!    padded ROI crop of T2W, mask and (when it shares the T2W grid) ADC
//! 3. elastix registration of the standardized ADC onto the standardized T2W,
//!    restricted to the cropped mask
//!
//! All artefacts are written to the patient's output directory.

use crate::constants::{DEFAULT_ROI_PADDING, NYUL_TRAINING_LIMIT};
use crate::discovery::PatientEntry;
use crate::paths::output::{NyulParametersFile, PreprocessedFiles};
use crate::paths::patient::patient_output_dir;
use crate::patient::PatientCase;
use crate::registration::{
    create_dir, RegistrationArtifacts, RegistrationOutcome, RegistrationRequest,
    RegistrationService,
};
use crate::tool::ToolRunner;
use crate::RegistrationResult;
use mrireg_imaging::{
    extract_bounding_box, save_parameters, segment_prostate, IntensityStandardizer,
    NyulStandardizer, StandardizationMethod, Volume, ZScoreStandardizer,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessSettings {
    /// Method for T2W; ADC always uses per-image Z-score.
    pub standardization: StandardizationMethod,
    pub segmentation: bool,
    pub roi_padding: usize,
    pub nyul_training_limit: usize,
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            standardization: StandardizationMethod::Nyul,
            segmentation: true,
            roi_padding: DEFAULT_ROI_PADDING,
            nyul_training_limit: NYUL_TRAINING_LIMIT,
        }
    }
}

/// Per-patient preprocessing with an optional cohort-trained T2W model.
pub struct Preprocessor {
    settings: PreprocessSettings,
    t2w_model: Option<NyulStandardizer>,
}

impl Preprocessor {
    /// Trains the cohort Nyul model when requested and saves it to
    /// `<output_dir>/nyul_parameters.json`.
    ///
    /// Training uses the first readable T2W volumes of complete patients, up to
    /// the configured limit. With no readable volume, T2W falls back to
    /// per-image Z-score.
    pub fn prepare(
        patients: &[PatientEntry],
        output_dir: &Path,
        settings: PreprocessSettings,
    ) -> RegistrationResult<Self> {
        if settings.standardization != StandardizationMethod::Nyul {
            return Ok(Self {
                settings,
                t2w_model: None,
            });
        }

        let mut volumes = Vec::new();
        for case in patients.iter().filter_map(|p| p.files.as_ref().ok()) {
            if volumes.len() >= settings.nyul_training_limit {
                break;
            }
            match Volume::read(&case.t2w_path) {
                Ok(volume) => volumes.push(volume),
                Err(e) => tracing::warn!("{}: T2W not usable for Nyul training: {e}", case.id),
            }
        }

        if volumes.is_empty() {
            tracing::warn!("no readable T2W volumes, using per-image z-score for T2W");
            return Ok(Self {
                settings,
                t2w_model: None,
            });
        }

        tracing::info!("training Nyul standardizer on {} T2W volume(s)", volumes.len());
        let training: Vec<_> = volumes.iter().map(Volume::data).collect();
        let mut nyul = NyulStandardizer::new();
        if let Err(e) = nyul.train(&training) {
            tracing::warn!("Nyul training failed ({e}), using per-image z-score for T2W");
            return Ok(Self {
                settings,
                t2w_model: None,
            });
        }

        if let Some(parameters) = nyul.parameters() {
            create_dir(output_dir)?;
            save_parameters(output_dir.join(NyulParametersFile::NAME), &parameters)?;
        }

        Ok(Self {
            settings,
            t2w_model: Some(nyul),
        })
    }

    pub fn settings(&self) -> &PreprocessSettings {
        &self.settings
    }

    pub fn has_cohort_model(&self) -> bool {
        self.t2w_model.is_some()
    }

    /// Preprocesses and registers one patient. Failures are captured in the outcome.
    pub fn process<R: ToolRunner>(
        &self,
        service: &RegistrationService<R>,
        case: &PatientCase,
        output_root: &Path,
    ) -> RegistrationOutcome {
        let started = Instant::now();
        tracing::info!("preprocessing patient {}", case.id);

        match self.run(service, case, output_root) {
            Ok((artifacts, mut saved)) => {
                let mut outcome =
                    RegistrationOutcome::succeeded(case.id.clone(), artifacts, started.elapsed());
                saved.append(&mut outcome.outputs_saved);
                outcome.outputs_saved = saved;
                tracing::info!(
                    "preprocessed and registered patient {} ({} outputs)",
                    case.id,
                    outcome.outputs_saved.len()
                );
                outcome
            }
            Err(e) => {
                let outcome = RegistrationOutcome::failed(case.id.clone(), &e, started.elapsed());
                tracing::error!("{}", outcome.error.as_deref().unwrap_or_default());
                outcome
            }
        }
    }

    fn run<R: ToolRunner>(
        &self,
        service: &RegistrationService<R>,
        case: &PatientCase,
        output_root: &Path,
    ) -> RegistrationResult<(RegistrationArtifacts, Vec<PathBuf>)> {
        let out = patient_output_dir(output_root, &case.id);
        create_dir(&out)?;
        let mut saved = Vec::new();
        let mut write = |volume: &Volume, name: &str| -> RegistrationResult<PathBuf> {
            let path = out.join(name);
            volume.write(&path)?;
            saved.push(path.clone());
            Ok(path)
        };

        let t2w = Volume::read(&case.t2w_path)?;
        let adc = Volume::read(&case.adc_path)?;

        let t2w_values = match &self.t2w_model {
            Some(nyul) => nyul.transform(t2w.data())?,
            None => ZScoreStandardizer::default().transform(t2w.data())?,
        };
        let t2w_std = t2w.with_data(t2w_values)?;
        let adc_std = adc.with_data(ZScoreStandardizer::default().transform(adc.data())?)?;
        let t2w_std_path = write(&t2w_std, PreprocessedFiles::T2W_STANDARDIZED)?;
        let adc_std_path = write(&adc_std, PreprocessedFiles::ADC_STANDARDIZED)?;

        let (fixed, moving, fixed_mask) = if self.settings.segmentation {
            let padding = self.settings.roi_padding;
            let mask = t2w_std.with_data(segment_prostate(t2w_std.data())?)?;
            write(&mask, PreprocessedFiles::SEGMENTATION)?;

            let (t2w_roi, mask_roi) = extract_bounding_box(&t2w_std, &mask, padding)?;
            let fixed = write(&t2w_roi, PreprocessedFiles::T2W_ROI)?;
            let mask_path = write(&mask_roi, PreprocessedFiles::MASK_ROI)?;

            let moving = if adc_std.same_grid(&t2w_std) {
                let (adc_roi, _) = extract_bounding_box(&adc_std, &mask, padding)?;
                write(&adc_roi, PreprocessedFiles::ADC_ROI)?
            } else {
                tracing::warn!(
                    "{}: ADC grid differs from T2W, registering the uncropped ADC",
                    case.id
                );
                adc_std_path
            };
            (fixed, moving, Some(mask_path))
        } else {
            (t2w_std_path, adc_std_path, None)
        };

        let request = RegistrationRequest {
            patient_id: case.id.clone(),
            fixed,
            moving,
            output_dir: out.clone(),
            resample_dir: out.clone(),
            registered_path: out.join(PreprocessedFiles::REGISTERED_ADC),
            fixed_mask,
        };
        let artifacts = service.register(&request)?;
        Ok((artifacts, saved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::discover_patients;
    use crate::elastix::ElastixInstallation;
    use crate::registration::RegistrationSettings;
    use crate::testing::FakeElastix;
    use crate::tool::Tool;
    use mrireg_imaging::load_parameters;
    use ndarray::{s, Array3};
    use tempfile::TempDir;

    fn write_volumes(data: &Path, id: &str, adc_shape: (usize, usize, usize)) {
        let dir = data.join(id);
        // Gland at mid intensity, brighter tissue in a slab at the far end.
        let mut t2w = Array3::<f32>::from_elem((64, 40, 40), 10.0);
        t2w.slice_mut(s![8..24, 6..34, 6..34]).fill(60.0);
        t2w.slice_mut(s![46..64, .., ..]).fill(100.0);
        Volume::from_array(t2w)
            .write(dir.join(format!("{id}_t2w.nii.gz")))
            .unwrap();
        let adc = Array3::from_shape_fn(adc_shape, |(x, y, z)| (x + y + z + 1) as f32);
        Volume::from_array(adc)
            .write(dir.join(format!("{id}_adc.nii.gz")))
            .unwrap();
    }

    fn service(fake: &FakeElastix) -> RegistrationService<&FakeElastix> {
        let install = ElastixInstallation::new("elastix".into(), "transformix".into(), None);
        RegistrationService::new(install, fake, &RegistrationSettings::default()).unwrap()
    }

    #[test]
    fn cohort_model_is_trained_and_saved() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let output = temp.path().join("output");
        write_volumes(&data, "p1", (64, 40, 40));
        write_volumes(&data, "p2", (64, 40, 40));

        let patients = discover_patients(&data).unwrap();
        let pre = Preprocessor::prepare(&patients, &output, PreprocessSettings::default()).unwrap();

        assert!(pre.has_cohort_model());
        let params = load_parameters(output.join("nyul_parameters.json")).unwrap();
        assert_eq!(params.method(), StandardizationMethod::Nyul);
    }

    #[test]
    fn roi_pipeline_registers_cropped_images_with_mask() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let output = temp.path().join("output");
        write_volumes(&data, "p1", (64, 40, 40));

        let patients = discover_patients(&data).unwrap();
        let pre = Preprocessor::prepare(&patients, &output, PreprocessSettings::default()).unwrap();
        let fake = FakeElastix::default();
        let case = patients[0].files.as_ref().unwrap();

        let outcome = pre.process(&service(&fake), case, &output);

        assert!(outcome.success, "{:?}", outcome.error);
        let out = output.join("p1");
        for name in [
            PreprocessedFiles::T2W_STANDARDIZED,
            PreprocessedFiles::ADC_STANDARDIZED,
            PreprocessedFiles::SEGMENTATION,
            PreprocessedFiles::T2W_ROI,
            PreprocessedFiles::ADC_ROI,
            PreprocessedFiles::MASK_ROI,
            PreprocessedFiles::REGISTERED_ADC,
        ] {
            assert!(out.join(name).is_file(), "{name} missing");
            assert!(outcome.outputs_saved.contains(&out.join(name)), "{name} not listed");
        }

        let elastix = fake.calls_for(Tool::Elastix);
        assert_eq!(
            elastix[0].flag_value("-f"),
            Some(out.join(PreprocessedFiles::T2W_ROI).as_os_str())
        );
        assert_eq!(
            elastix[0].flag_value("-m"),
            Some(out.join(PreprocessedFiles::ADC_ROI).as_os_str())
        );
        assert_eq!(
            elastix[0].flag_value("-fMask"),
            Some(out.join(PreprocessedFiles::MASK_ROI).as_os_str())
        );

        // Gland box x 8..24 plus 10 voxels of padding, clipped at the volume
        // border along y and z.
        let roi = Volume::read(out.join(PreprocessedFiles::T2W_ROI)).unwrap();
        assert_eq!(roi.shape(), [34, 40, 40]);
    }

    #[test]
    fn adc_on_a_different_grid_is_not_cropped() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let output = temp.path().join("output");
        write_volumes(&data, "p1", (12, 12, 12));

        let patients = discover_patients(&data).unwrap();
        let settings = PreprocessSettings {
            standardization: StandardizationMethod::ZScore,
            ..Default::default()
        };
        let pre = Preprocessor::prepare(&patients, &output, settings).unwrap();
        assert!(!pre.has_cohort_model());

        let fake = FakeElastix::default();
        let outcome = pre.process(&service(&fake), patients[0].files.as_ref().unwrap(), &output);

        assert!(outcome.success, "{:?}", outcome.error);
        let out = output.join("p1");
        assert!(!out.join(PreprocessedFiles::ADC_ROI).exists());
        assert_eq!(
            fake.calls_for(Tool::Elastix)[0].flag_value("-m"),
            Some(out.join(PreprocessedFiles::ADC_STANDARDIZED).as_os_str())
        );
    }

    #[test]
    fn unreadable_images_fail_the_patient() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        crate::testing::write_patient(&data, "p1", true, true);

        let patients = discover_patients(&data).unwrap();
        let pre = Preprocessor::prepare(&patients, temp.path(), PreprocessSettings::default())
            .unwrap();
        assert!(!pre.has_cohort_model());

        let fake = FakeElastix::default();
        let outcome = pre.process(&service(&fake), patients[0].files.as_ref().unwrap(), temp.path());
        assert!(!outcome.success);
        assert_eq!(outcome.error_type, Some(crate::FailureKind::UnexpectedError));
        assert!(fake.calls.borrow().is_empty());
    }
}
