//! Intensity standardization.
//!
//! MRI intensities have no absolute unit, so volumes from different scanners or
//! sessions are mapped onto a common scale before registration. Two methods are
//! provided:
//!
//! - [`NyulStandardizer`]: histogram landmark matching trained on a cohort
//! - [`ZScoreStandardizer`]: foreground normalisation, either per image or with
//!   cohort statistics
//!
//! Trained models are persisted as JSON, tagged by method, so that the same
//! mapping can be applied later with [`load_parameters`] and
//! [`standardizer_from_parameters`].

mod nyul;
pub(crate) mod stats;
mod zscore;

pub use nyul::NyulStandardizer;
pub use zscore::ZScoreStandardizer;

use crate::{ImagingError, ImagingResult};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Added to the denominator of every Z-score.
pub const EPSILON: f64 = 1e-8;

/// Available standardization methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardizationMethod {
    Nyul,
    ZScore,
}

impl fmt::Display for StandardizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StandardizationMethod::Nyul => write!(f, "nyul"),
            StandardizationMethod::ZScore => write!(f, "zscore"),
        }
    }
}

impl FromStr for StandardizationMethod {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nyul" => Ok(StandardizationMethod::Nyul),
            "zscore" | "z_score" | "z-score" => Ok(StandardizationMethod::ZScore),
            other => Err(ImagingError::UnknownMethod(other.to_string())),
        }
    }
}

/// Serialisable state of a trained standardizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum StandardizationParameters {
    Nyul {
        landmark_percentiles: Vec<f64>,
        standard_scale: [f64; 2],
        standard_landmarks: Vec<f64>,
        training_samples: usize,
    },
    ZScore {
        center: f64,
        scale: f64,
        robust: bool,
    },
}

impl StandardizationParameters {
    pub fn method(&self) -> StandardizationMethod {
        match self {
            StandardizationParameters::Nyul { .. } => StandardizationMethod::Nyul,
            StandardizationParameters::ZScore { .. } => StandardizationMethod::ZScore,
        }
    }
}

/// Common interface of the standardization methods.
pub trait IntensityStandardizer {
    fn method(&self) -> StandardizationMethod;

    /// Learns method parameters from a set of volumes.
    fn train(&mut self, volumes: &[&Array3<f32>]) -> ImagingResult<()>;

    /// Maps a volume onto the standard scale.
    fn transform(&self, volume: &Array3<f32>) -> ImagingResult<Array3<f32>>;

    fn is_trained(&self) -> bool;

    /// Trained state, or `None` before training.
    fn parameters(&self) -> Option<StandardizationParameters>;

    fn fit_transform(&mut self, volume: &Array3<f32>) -> ImagingResult<Array3<f32>> {
        self.train(&[volume])?;
        self.transform(volume)
    }
}

/// Writes trained parameters as pretty JSON.
pub fn save_parameters(
    path: impl AsRef<Path>,
    parameters: &StandardizationParameters,
) -> ImagingResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(parameters)?;
    std::fs::write(path, json)?;
    tracing::info!(
        "saved {} parameters to {}",
        parameters.method(),
        path.display()
    );
    Ok(())
}

pub fn load_parameters(path: impl AsRef<Path>) -> ImagingResult<StandardizationParameters> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&text)?)
}

/// Rebuilds a trained standardizer from persisted parameters.
pub fn standardizer_from_parameters(
    parameters: StandardizationParameters,
) -> ImagingResult<Box<dyn IntensityStandardizer>> {
    Ok(match parameters {
        StandardizationParameters::Nyul {
            landmark_percentiles,
            standard_scale,
            standard_landmarks,
            training_samples,
        } => Box::new(NyulStandardizer::from_landmarks(
            landmark_percentiles,
            standard_scale,
            standard_landmarks,
            training_samples,
        )?),
        StandardizationParameters::ZScore {
            center,
            scale,
            robust,
        } => Box::new(ZScoreStandardizer::with_statistics(center, scale, robust)),
    })
}
