use crate::{ImagingError, ImagingResult};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Axis-aligned voxel region, `start` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub start: [usize; 3],
    pub size: [usize; 3],
}

impl BoundingBox {
    /// Tight box around every non-zero voxel of `mask`.
    pub fn from_mask(mask: &Array3<f32>) -> ImagingResult<Self> {
        let mut min = [usize::MAX; 3];
        let mut max = [0usize; 3];
        let mut any = false;

        for ((x, y, z), v) in mask.indexed_iter() {
            if *v == 0.0 {
                continue;
            }
            any = true;
            for (axis, idx) in [x, y, z].into_iter().enumerate() {
                min[axis] = min[axis].min(idx);
                max[axis] = max[axis].max(idx);
            }
        }

        if !any {
            return Err(ImagingError::EmptyMask);
        }
        Ok(Self {
            start: min,
            size: [
                max[0] - min[0] + 1,
                max[1] - min[1] + 1,
                max[2] - min[2] + 1,
            ],
        })
    }

    /// Grows the box by `padding` voxels on every side, clipped to `shape`.
    pub fn padded(&self, padding: usize, shape: [usize; 3]) -> Self {
        let mut start = [0; 3];
        let mut size = [0; 3];
        for axis in 0..3 {
            start[axis] = self.start[axis].saturating_sub(padding);
            size[axis] = (shape[axis] - start[axis]).min(self.size[axis] + 2 * padding);
        }
        Self { start, size }
    }

    /// Exclusive end index per axis.
    pub fn end(&self) -> [usize; 3] {
        [
            self.start[0] + self.size[0],
            self.start[1] + self.size[1],
            self.start[2] + self.size[2],
        ]
    }
}
