use super::stats::{percentile, sorted_foreground};
use super::{IntensityStandardizer, StandardizationMethod, StandardizationParameters};
use crate::{ImagingError, ImagingResult};
use ndarray::Array3;

const DEFAULT_SCALE: [f64; 2] = [0.0, 100.0];

/// Nyul-Udupa piecewise-linear histogram standardization.
///
/// Training records intensity landmarks (by default the deciles of the
/// foreground histogram) for every training volume. The standard landmarks are
/// spaced evenly over the standard scale, so a transformed volume has its
/// landmarks at fixed positions whatever the cohort's histogram shape.
/// Transforming a volume maps its own landmarks onto those standard landmarks
/// and interpolates linearly in between.
#[derive(Debug, Clone)]
pub struct NyulStandardizer {
    landmark_percentiles: Vec<f64>,
    standard_scale: [f64; 2],
    standard_landmarks: Option<Vec<f64>>,
    training_samples: usize,
}

impl Default for NyulStandardizer {
    fn default() -> Self {
        Self::new()
    }
}

impl NyulStandardizer {
    /// Deciles 0, 10, ..., 100 onto the scale `[0, 100]`.
    pub fn new() -> Self {
        Self {
            landmark_percentiles: (0..=10).map(|i| f64::from(i) * 10.0).collect(),
            standard_scale: DEFAULT_SCALE,
            standard_landmarks: None,
            training_samples: 0,
        }
    }

    /// Fails unless there are at least two strictly increasing percentiles in `[0, 100]`.
    pub fn with_percentiles(
        landmark_percentiles: Vec<f64>,
        standard_scale: [f64; 2],
    ) -> ImagingResult<Self> {
        validate_percentiles(&landmark_percentiles)?;
        Ok(Self {
            landmark_percentiles,
            standard_scale,
            standard_landmarks: None,
            training_samples: 0,
        })
    }

    /// An already-trained standardizer.
    ///
    /// Fails when the percentiles are invalid or when there is not exactly one
    /// standard landmark per percentile.
    pub fn from_landmarks(
        landmark_percentiles: Vec<f64>,
        standard_scale: [f64; 2],
        standard_landmarks: Vec<f64>,
        training_samples: usize,
    ) -> ImagingResult<Self> {
        validate_percentiles(&landmark_percentiles)?;
        if standard_landmarks.len() != landmark_percentiles.len() {
            return Err(ImagingError::InvalidParameters(format!(
                "{} standard landmarks for {} percentiles",
                standard_landmarks.len(),
                landmark_percentiles.len()
            )));
        }
        Ok(Self {
            landmark_percentiles,
            standard_scale,
            standard_landmarks: Some(standard_landmarks),
            training_samples,
        })
    }

    pub fn standard_landmarks(&self) -> Option<&[f64]> {
        self.standard_landmarks.as_deref()
    }

    pub fn training_samples(&self) -> usize {
        self.training_samples
    }

    fn landmarks(&self, sorted: &[f64]) -> Vec<f64> {
        self.landmark_percentiles
            .iter()
            .map(|p| percentile(sorted, *p))
            .collect()
    }

    fn linear_scale(&self) -> Vec<f64> {
        let [lo, hi] = self.standard_scale;
        let n = self.landmark_percentiles.len();
        if n < 2 {
            return vec![lo; n];
        }
        (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect()
    }
}

fn validate_percentiles(percentiles: &[f64]) -> ImagingResult<()> {
    if percentiles.len() < 2 {
        return Err(ImagingError::InvalidParameters(format!(
            "need at least 2 landmark percentiles, got {}",
            percentiles.len()
        )));
    }
    if percentiles.iter().any(|p| !(0.0..=100.0).contains(p)) {
        return Err(ImagingError::InvalidParameters(
            "landmark percentiles must lie in [0, 100]".to_string(),
        ));
    }
    if percentiles.windows(2).any(|w| w[1] <= w[0]) {
        return Err(ImagingError::InvalidParameters(
            "landmark percentiles must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// Piecewise-linear lookup of `v` on the `from` landmarks, onto `to`.
fn map_intensity(v: f64, from: &[f64], to: &[f64]) -> f64 {
    let n = from.len();
    if n < 2 {
        return to.first().copied().unwrap_or(0.0);
    }
    if v >= from[n - 1] {
        return to[n - 1];
    }
    let seg = from
        .partition_point(|lm| *lm <= v)
        .saturating_sub(1)
        .min(n - 2);
    let (x0, x1) = (from[seg], from[seg + 1]);
    let (y0, y1) = (to[seg], to[seg + 1]);
    let mapped = if x1 - x0 <= f64::EPSILON {
        y0
    } else {
        y0 + (v - x0) / (x1 - x0) * (y1 - y0)
    };
    mapped.clamp(to[0], to[n - 1])
}

impl IntensityStandardizer for NyulStandardizer {
    fn method(&self) -> StandardizationMethod {
        StandardizationMethod::Nyul
    }

    fn train(&mut self, volumes: &[&Array3<f32>]) -> ImagingResult<()> {
        let n = self.landmark_percentiles.len();
        let mut sums = vec![0.0; n];
        let mut used = 0usize;

        for (index, volume) in volumes.iter().enumerate() {
            let sorted = match sorted_foreground(volume) {
                Ok(sorted) => sorted,
                Err(ImagingError::EmptyForeground) => {
                    tracing::warn!("skipping training volume {index}: no foreground voxels");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for (sum, lm) in sums.iter_mut().zip(self.landmarks(&sorted)) {
                *sum += lm;
            }
            used += 1;
        }

        if used == 0 {
            return Err(ImagingError::EmptyForeground);
        }

        let mean: Vec<f64> = sums.iter().map(|s| s / used as f64).collect();
        tracing::debug!("mean training landmarks: {mean:?}");
        tracing::info!("trained Nyul standardizer on {used} volume(s)");
        self.standard_landmarks = Some(self.linear_scale());
        self.training_samples = used;
        Ok(())
    }

    fn transform(&self, volume: &Array3<f32>) -> ImagingResult<Array3<f32>> {
        let standard = self
            .standard_landmarks
            .as_deref()
            .ok_or(ImagingError::NotTrained)?;
        let sorted = sorted_foreground(volume)?;
        let own = self.landmarks(&sorted);

        Ok(volume.mapv(|v| {
            if v <= 0.0 {
                0.0
            } else {
                map_intensity(f64::from(v), &own, standard) as f32
            }
        }))
    }

    fn is_trained(&self) -> bool {
        self.standard_landmarks.is_some()
    }

    fn parameters(&self) -> Option<StandardizationParameters> {
        self.standard_landmarks
            .as_ref()
            .map(|standard| StandardizationParameters::Nyul {
                landmark_percentiles: self.landmark_percentiles.clone(),
                standard_scale: self.standard_scale,
                standard_landmarks: standard.clone(),
                training_samples: self.training_samples,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(values: &[f32]) -> Array3<f32> {
        Array3::from_shape_fn((values.len(), 1, 1), |(x, _, _)| values[x])
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn transform_before_training_is_an_error() {
        let nyul = NyulStandardizer::new();
        assert!(!nyul.is_trained());
        assert!(nyul.parameters().is_none());
        assert!(matches!(
            nyul.transform(&line(&[1.0, 2.0])),
            Err(ImagingError::NotTrained)
        ));
    }

    #[test]
    fn standard_landmarks_are_evenly_spaced_on_linear_data() {
        let a = line(&[0.0, 10.0, 20.0, 30.0, 40.0, 50.0]);
        let b = line(&[0.0, 100.0, 200.0, 300.0, 400.0, 500.0]);
        let mut nyul = NyulStandardizer::new();
        nyul.train(&[&a, &b]).unwrap();

        let standard = nyul.standard_landmarks().unwrap();
        assert_eq!(standard.len(), 11);
        for (i, lm) in standard.iter().enumerate() {
            assert!((lm - 10.0 * i as f64).abs() < 1e-9, "landmark {i} = {lm}");
        }
        assert_eq!(nyul.training_samples(), 2);
    }

    #[test]
    fn skewed_training_histograms_do_not_bend_the_standard_scale() {
        let cubic: Vec<f32> = (1..=100).map(|i| (i * i * i) as f32).collect();
        let mut nyul = NyulStandardizer::new();
        nyul.train(&[&line(&cubic)]).unwrap();

        let standard = nyul.standard_landmarks().unwrap();
        for (i, lm) in standard.iter().enumerate() {
            assert!((lm - 10.0 * i as f64).abs() < 1e-9, "landmark {i} = {lm}");
        }

        // The training volume's own median lands mid-scale.
        let out = nyul.transform(&line(&cubic)).unwrap();
        let median = out[[49, 0, 0]].max(out[[50, 0, 0]]);
        assert!((45.0..=55.0).contains(&median), "median mapped to {median}");
    }

    #[test]
    fn inconsistent_landmark_counts_are_rejected() {
        assert!(matches!(
            NyulStandardizer::from_landmarks(vec![0.0, 50.0, 100.0], DEFAULT_SCALE, vec![0.0, 100.0], 1),
            Err(ImagingError::InvalidParameters(_))
        ));
        assert!(matches!(
            NyulStandardizer::with_percentiles(vec![50.0], DEFAULT_SCALE),
            Err(ImagingError::InvalidParameters(_))
        ));
        assert!(matches!(
            NyulStandardizer::with_percentiles(vec![0.0, 60.0, 40.0, 100.0], DEFAULT_SCALE),
            Err(ImagingError::InvalidParameters(_))
        ));
        assert!(matches!(
            NyulStandardizer::with_percentiles(vec![0.0, 150.0], DEFAULT_SCALE),
            Err(ImagingError::InvalidParameters(_))
        ));

        let restored =
            NyulStandardizer::from_landmarks(vec![0.0, 50.0, 100.0], DEFAULT_SCALE, vec![0.0, 50.0, 100.0], 1)
                .unwrap();
        assert!(restored.is_trained());
    }

    #[test]
    fn transform_is_piecewise_linear_and_keeps_background() {
        let a = line(&[0.0, 10.0, 20.0, 30.0, 40.0, 50.0]);
        let mut nyul = NyulStandardizer::new();
        nyul.train(&[&a]).unwrap();

        let out = nyul.transform(&a).unwrap();
        assert_eq!(out[[0, 0, 0]], 0.0);
        assert!(approx(out[[1, 0, 0]], 0.0));
        assert!(approx(out[[3, 0, 0]], 50.0));
        assert!(approx(out[[5, 0, 0]], 100.0));

        // Same histogram shape at a different intensity range.
        let scaled = line(&[0.0, 1000.0, 2000.0, 3000.0, 4000.0, 5000.0]);
        let out = nyul.transform(&scaled).unwrap();
        assert!(approx(out[[2, 0, 0]], 25.0));
        assert!(approx(out[[4, 0, 0]], 75.0));
    }

    #[test]
    fn training_skips_empty_volumes() {
        let empty = Array3::<f32>::zeros((3, 1, 1));
        let a = line(&[0.0, 5.0, 10.0]);
        let mut nyul = NyulStandardizer::new();
        nyul.train(&[&empty, &a]).unwrap();
        assert_eq!(nyul.training_samples(), 1);

        let mut untrainable = NyulStandardizer::new();
        assert!(matches!(
            untrainable.train(&[&empty]),
            Err(ImagingError::EmptyForeground)
        ));
    }

    #[test]
    fn intensities_above_top_landmark_saturate() {
        let standard: Vec<f64> = (0..=10).map(|i| f64::from(i) * 10.0).collect();
        let own: Vec<f64> = (0..=10).map(|i| f64::from(i) * 2.0).collect();
        assert_eq!(map_intensity(25.0, &own, &standard), 100.0);
        assert_eq!(map_intensity(20.0, &own, &standard), 100.0);
        assert!((map_intensity(3.0, &own, &standard) - 15.0).abs() < 1e-9);
    }
}
