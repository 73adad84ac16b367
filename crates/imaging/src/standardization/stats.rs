//! Order statistics over foreground voxels.

use crate::{ImagingError, ImagingResult};
use ndarray::Array3;

/// Scale factor that makes the MAD a consistent estimator of the standard
/// deviation for normally distributed data.
pub const MAD_TO_STD: f64 = 1.4826;

/// Voxels strictly above zero, sorted ascending.
pub fn sorted_foreground(volume: &Array3<f32>) -> ImagingResult<Vec<f64>> {
    let mut values: Vec<f64> = volume
        .iter()
        .copied()
        .filter(|v| *v > 0.0)
        .map(f64::from)
        .collect();
    if values.is_empty() {
        return Err(ImagingError::EmptyForeground);
    }
    values.sort_by(f64::total_cmp);
    Ok(values)
}

/// Percentile (0..=100) of already sorted values, linearly interpolated
/// between the two nearest order statistics.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

pub fn median(sorted: &[f64]) -> f64 {
    percentile(sorted, 50.0)
}

/// Median absolute deviation around `center`.
pub fn mad(values: &[f64], center: f64) -> f64 {
    let mut deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    deviations.sort_by(f64::total_cmp);
    median(&deviations)
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
