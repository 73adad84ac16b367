use super::stats::{mad, mean_std, median, sorted_foreground, MAD_TO_STD};
use super::{IntensityStandardizer, StandardizationMethod, StandardizationParameters, EPSILON};
use crate::{ImagingError, ImagingResult};
use ndarray::Array3;

/// Foreground Z-score normalisation.
///
/// The robust variant (the default) uses the median and the scaled median
/// absolute deviation; the classic variant uses mean and standard deviation.
/// An untrained standardizer computes statistics per image, a trained one
/// applies the cohort statistics to every image.
#[derive(Debug, Clone)]
pub struct ZScoreStandardizer {
    robust: bool,
    statistics: Option<(f64, f64)>,
}

impl Default for ZScoreStandardizer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ZScoreStandardizer {
    pub fn new(robust: bool) -> Self {
        Self {
            robust,
            statistics: None,
        }
    }

    pub fn with_statistics(center: f64, scale: f64, robust: bool) -> Self {
        Self {
            robust,
            statistics: Some((center, scale)),
        }
    }

    pub fn robust(&self) -> bool {
        self.robust
    }

    fn statistics_of(&self, sorted: &[f64]) -> (f64, f64) {
        if self.robust {
            let center = median(sorted);
            (center, mad(sorted, center) * MAD_TO_STD)
        } else {
            mean_std(sorted)
        }
    }
}

impl IntensityStandardizer for ZScoreStandardizer {
    fn method(&self) -> StandardizationMethod {
        StandardizationMethod::ZScore
    }

    fn train(&mut self, volumes: &[&Array3<f32>]) -> ImagingResult<()> {
        let mut pooled = Vec::new();
        for volume in volumes {
            match sorted_foreground(volume) {
                Ok(values) => pooled.extend(values),
                Err(ImagingError::EmptyForeground) => continue,
                Err(e) => return Err(e),
            }
        }
        if pooled.is_empty() {
            return Err(ImagingError::EmptyForeground);
        }
        pooled.sort_by(f64::total_cmp);

        let (center, scale) = self.statistics_of(&pooled);
        tracing::debug!("z-score statistics: center={center:.4} scale={scale:.4}");
        self.statistics = Some((center, scale));
        Ok(())
    }

    fn transform(&self, volume: &Array3<f32>) -> ImagingResult<Array3<f32>> {
        let sorted = sorted_foreground(volume)?;
        let (center, scale) = match self.statistics {
            Some(stats) => stats,
            None => self.statistics_of(&sorted),
        };
        let denom = scale + EPSILON;

        Ok(volume.mapv(|v| {
            if v > 0.0 {
                ((f64::from(v) - center) / denom) as f32
            } else {
                0.0
            }
        }))
    }

    fn is_trained(&self) -> bool {
        self.statistics.is_some()
    }

    fn parameters(&self) -> Option<StandardizationParameters> {
        self.statistics
            .map(|(center, scale)| StandardizationParameters::ZScore {
                center,
                scale,
                robust: self.robust,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(values: &[f32]) -> Array3<f32> {
        Array3::from_shape_fn((values.len(), 1, 1), |(x, _, _)| values[x])
    }

    #[test]
    fn robust_per_image_uses_median_and_scaled_mad() {
        let volume = line(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let z = ZScoreStandardizer::default();
        assert!(!z.is_trained());

        let out = z.transform(&volume).unwrap();
        // median 3, MAD 1 -> scale 1.4826
        assert_eq!(out[[0, 0, 0]], 0.0);
        assert!(out[[3, 0, 0]].abs() < 1e-6);
        assert!((out[[5, 0, 0]] - (2.0 / 1.4826) as f32).abs() < 1e-5);
    }

    #[test]
    fn classic_variant_uses_mean_and_std() {
        let volume = line(&[0.0, 2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let z = ZScoreStandardizer::new(false);
        let out = z.transform(&volume).unwrap();
        assert!((out[[8, 0, 0]] - 2.0).abs() < 1e-5);
        assert!((out[[1, 0, 0]] + 1.5).abs() < 1e-5);
    }

    #[test]
    fn trained_statistics_apply_to_other_volumes() {
        let cohort = line(&[10.0, 20.0, 30.0]);
        let mut z = ZScoreStandardizer::new(false);
        z.train(&[&cohort]).unwrap();

        let Some(StandardizationParameters::ZScore { center, .. }) = z.parameters() else {
            panic!("expected z-score parameters");
        };
        assert!((center - 20.0).abs() < 1e-9);

        let other = line(&[0.0, 20.0]);
        let out = z.transform(&other).unwrap();
        assert!(out[[1, 0, 0]].abs() < 1e-6);
    }

    #[test]
    fn empty_foreground_is_an_error() {
        let z = ZScoreStandardizer::default();
        assert!(matches!(
            z.transform(&Array3::zeros((2, 2, 2))),
            Err(ImagingError::EmptyForeground)
        ));
    }
}
