//! Threshold-based fallback prostate mask.
//!
//! Used when no manual or model segmentation is available. On a T2W volume the
//! gland sits between dark background and bright fluid or fat, so the mask is
//! the middle class of a two-threshold Otsu split of the smoothed volume,
//! cleaned up morphologically and reduced to its largest connected region.

use crate::{ImagingError, ImagingResult};
use ndarray::{Array3, Axis, Zip};
use std::collections::VecDeque;

const HISTOGRAM_BINS: usize = 128;
/// Gaussian pre-smoothing, in voxels.
const SMOOTHING_SIGMA: f64 = 2.0;
const CLOSING_RADIUS: usize = 5;
const OPENING_RADIUS: usize = 3;

/// Binary mask (1.0 / 0.0) of the largest mid-intensity connected region.
pub fn segment_prostate(volume: &Array3<f32>) -> ImagingResult<Array3<f32>> {
    if !volume.iter().any(|v| *v > 0.0) {
        return Err(ImagingError::EmptyForeground);
    }

    let smoothed = gaussian_smooth(volume, SMOOTHING_SIGMA);
    let (lower, upper) = two_level_otsu(&smoothed).ok_or(ImagingError::EmptyMask)?;
    tracing::debug!("otsu thresholds {lower:.4} / {upper:.4}");

    let binary = smoothed.mapv(|v| v >= lower && v < upper);
    let closed = erode(&dilate(&binary, CLOSING_RADIUS), CLOSING_RADIUS);
    let opened = dilate(&erode(&closed, OPENING_RADIUS), OPENING_RADIUS);
    let largest = largest_component(&opened).ok_or(ImagingError::EmptyMask)?;

    Ok(largest.mapv(|inside| if inside { 1.0 } else { 0.0 }))
}

/// Separable Gaussian blur. Near the border the kernel is renormalised over
/// the voxels inside the volume.
fn gaussian_smooth(volume: &Array3<f32>, sigma: f64) -> Array3<f32> {
    let radius = (3.0 * sigma).ceil() as usize;
    let kernel: Vec<f64> = (0..=2 * radius)
        .map(|k| {
            let d = k as f64 - radius as f64;
            (-d * d / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    (0..3).fold(volume.clone(), |acc, axis| convolve_axis(&acc, axis, &kernel))
}

fn convolve_axis(volume: &Array3<f32>, axis: usize, kernel: &[f64]) -> Array3<f32> {
    let radius = kernel.len() / 2;
    let mut out = Array3::<f32>::zeros(volume.raw_dim());
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(volume.lanes(Axis(axis)))
        .for_each(|mut out_lane, in_lane| {
            let n = in_lane.len();
            for i in 0..n {
                let lo = i.saturating_sub(radius);
                let hi = (i + radius).min(n - 1);
                let (mut sum, mut weight) = (0.0f64, 0.0f64);
                for j in lo..=hi {
                    let w = kernel[j + radius - i];
                    sum += w * f64::from(in_lane[j]);
                    weight += w;
                }
                out_lane[i] = (sum / weight) as f32;
            }
        });
    out
}

/// Lower and upper thresholds splitting the histogram into three classes with
/// maximal between-class variance. `None` when fewer than three histogram
/// bins are populated.
fn two_level_otsu(volume: &Array3<f32>) -> Option<(f32, f32)> {
    let (min, max) = volume
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    if max - min <= f32::EPSILON {
        return None;
    }

    let width = (max - min) / HISTOGRAM_BINS as f32;
    let mut hist = [0u64; HISTOGRAM_BINS];
    for &v in volume.iter() {
        let bin = (((v - min) / width) as usize).min(HISTOGRAM_BINS - 1);
        hist[bin] += 1;
    }

    // Cumulative counts and first moments per bin.
    let mut count = [0u64; HISTOGRAM_BINS + 1];
    let mut moment = [0.0f64; HISTOGRAM_BINS + 1];
    for (bin, c) in hist.iter().enumerate() {
        count[bin + 1] = count[bin] + c;
        moment[bin + 1] = moment[bin] + bin as f64 * *c as f64;
    }
    let class_score = |from: usize, to: usize| -> Option<f64> {
        let weight = count[to] - count[from];
        if weight == 0 {
            return None;
        }
        let m = moment[to] - moment[from];
        Some(m * m / weight as f64)
    };

    let mut best: Option<(f64, usize, usize)> = None;
    for t1 in 0..HISTOGRAM_BINS - 2 {
        for t2 in t1 + 1..HISTOGRAM_BINS - 1 {
            let (Some(low), Some(mid), Some(high)) = (
                class_score(0, t1 + 1),
                class_score(t1 + 1, t2 + 1),
                class_score(t2 + 1, HISTOGRAM_BINS),
            ) else {
                continue;
            };
            let score = low + mid + high;
            if best.map_or(true, |(s, _, _)| score > s) {
                best = Some((score, t1, t2));
            }
        }
    }

    best.map(|(_, t1, t2)| {
        (
            min + (t1 + 1) as f32 * width,
            min + (t2 + 1) as f32 * width,
        )
    })
}

fn dilate(mask: &Array3<bool>, radius: usize) -> Array3<bool> {
    (0..3).fold(mask.clone(), |acc, axis| box_filter(&acc, axis, radius, false))
}

fn erode(mask: &Array3<bool>, radius: usize) -> Array3<bool> {
    (0..3).fold(mask.clone(), |acc, axis| box_filter(&acc, axis, radius, true))
}

/// One-dimensional max (dilation) or min (erosion) filter along `axis`.
/// Voxels outside the volume do not take part in the window.
fn box_filter(mask: &Array3<bool>, axis: usize, radius: usize, erode: bool) -> Array3<bool> {
    let mut out = Array3::from_elem(mask.raw_dim(), false);
    Zip::from(out.lanes_mut(Axis(axis)))
        .and(mask.lanes(Axis(axis)))
        .for_each(|mut out_lane, in_lane| {
            let n = in_lane.len();
            let mut prefix = vec![0usize; n + 1];
            for (i, v) in in_lane.iter().enumerate() {
                prefix[i + 1] = prefix[i] + usize::from(*v);
            }
            for i in 0..n {
                let lo = i.saturating_sub(radius);
                let hi = (i + radius).min(n - 1);
                let count = prefix[hi + 1] - prefix[lo];
                out_lane[i] = if erode {
                    count == hi - lo + 1
                } else {
                    count > 0
                };
            }
        });
    out
}

/// Largest 6-connected component, or `None` when the mask is empty.
fn largest_component(mask: &Array3<bool>) -> Option<Array3<bool>> {
    let (nx, ny, nz) = mask.dim();
    let mut labels = Array3::<u32>::zeros((nx, ny, nz));
    let mut queue = VecDeque::new();
    let mut best: Option<(u32, usize)> = None;
    let mut next = 0u32;

    for ((x, y, z), inside) in mask.indexed_iter() {
        if !*inside || labels[[x, y, z]] != 0 {
            continue;
        }
        next += 1;
        labels[[x, y, z]] = next;
        queue.push_back([x, y, z]);
        let mut size = 0usize;

        while let Some([cx, cy, cz]) = queue.pop_front() {
            size += 1;
            let neighbours = [
                (cx.wrapping_sub(1), cy, cz),
                (cx + 1, cy, cz),
                (cx, cy.wrapping_sub(1), cz),
                (cx, cy + 1, cz),
                (cx, cy, cz.wrapping_sub(1)),
                (cx, cy, cz + 1),
            ];
            for (px, py, pz) in neighbours {
                if px >= nx || py >= ny || pz >= nz {
                    continue;
                }
                if mask[[px, py, pz]] && labels[[px, py, pz]] == 0 {
                    labels[[px, py, pz]] = next;
                    queue.push_back([px, py, pz]);
                }
            }
        }

        if best.map_or(true, |(_, s)| size > s) {
            best = Some((next, size));
        }
    }

    best.map(|(label, _)| labels.mapv(|l| l == label))
}
