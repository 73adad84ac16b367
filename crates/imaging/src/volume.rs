//! 3D NIfTI volumes
//!
//! A [`Volume`] pairs voxel intensities with the NIfTI header they were read
//! with, so that derived images (standardized, cropped, masks) can be written
//! back out with the same geometry. Voxels are indexed `[x, y, z]` as stored on
//! disk.

use crate::{ImagingError, ImagingResult};
use ndarray::{s, Array3, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// A 3D scalar volume with its NIfTI header.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    header: NiftiHeader,
}

impl Volume {
    pub fn new(data: Array3<f32>, header: NiftiHeader) -> Self {
        Self { data, header }
    }

    /// Wraps an array with a unit-spacing, identity-orientation header.
    pub fn from_array(data: Array3<f32>) -> Self {
        let mut header = NiftiHeader::default();
        header.pixdim = [1.0; 8];
        header.qform_code = 0;
        header.sform_code = 1;
        header.srow_x = [1.0, 0.0, 0.0, 0.0];
        header.srow_y = [0.0, 1.0, 0.0, 0.0];
        header.srow_z = [0.0, 0.0, 1.0, 0.0];
        Self { data, header }
    }

    /// Reads a NIfTI-1 file. Gzip compression is detected from the extension.
    ///
    /// A trailing singleton fourth dimension is dropped; any other
    /// non-3D layout is rejected.
    pub fn read(path: impl AsRef<Path>) -> ImagingResult<Self> {
        let path = path.as_ref();
        let obj = ReaderOptions::new().read_file(path)?;
        let header = obj.header().clone();
        let array = obj.into_volume().into_ndarray::<f32>()?;

        let array = match array.ndim() {
            3 => array,
            4 if array.shape()[3] == 1 => array.index_axis_move(Axis(3), 0),
            n => return Err(ImagingError::NotVolume3D(n)),
        };
        let data = array
            .into_dimensionality::<Ix3>()
            .map_err(|_| ImagingError::NotVolume3D(3))?;

        tracing::debug!("read volume {} with shape {:?}", path.display(), data.shape());
        Ok(Self { data, header })
    }

    /// Writes the volume as float32, using its header as the reference header.
    pub fn write(&self, path: impl AsRef<Path>) -> ImagingResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        WriterOptions::new(path)
            .reference_header(&self.header)
            .write_nifti(&self.data)?;
        Ok(())
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn into_data(self) -> Array3<f32> {
        self.data
    }

    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.data.dim();
        [x, y, z]
    }

    /// Voxel spacing in millimetres, from `pixdim[1..=3]`.
    pub fn spacing(&self) -> [f64; 3] {
        [
            f64::from(self.header.pixdim[1]),
            f64::from(self.header.pixdim[2]),
            f64::from(self.header.pixdim[3]),
        ]
    }

    /// Returns a volume with the same geometry and new voxel values.
    pub fn with_data(&self, data: Array3<f32>) -> ImagingResult<Self> {
        let (x, y, z) = data.dim();
        let found = [x, y, z];
        if found != self.shape() {
            return Err(ImagingError::ShapeMismatch {
                expected: self.shape(),
                found,
            });
        }
        Ok(Self {
            data,
            header: self.header.clone(),
        })
    }

    /// Voxel-to-world affine, row major.
    ///
    /// Uses the sform when `sform_code > 0`, then the qform when
    /// `qform_code > 0`, and falls back to pixdim scaling.
    pub fn affine(&self) -> [[f64; 4]; 4] {
        let h = &self.header;
        if h.sform_code > 0 {
            let row = |r: [f32; 4]| r.map(f64::from);
            return [
                row(h.srow_x),
                row(h.srow_y),
                row(h.srow_z),
                [0.0, 0.0, 0.0, 1.0],
            ];
        }

        let [dx, dy, dz] = self.spacing();
        if h.qform_code > 0 {
            let (b, c, d) = (
                f64::from(h.quatern_b),
                f64::from(h.quatern_c),
                f64::from(h.quatern_d),
            );
            let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
            let qfac = if h.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            let dz = dz * qfac;
            return [
                [
                    (a * a + b * b - c * c - d * d) * dx,
                    (2.0 * b * c - 2.0 * a * d) * dy,
                    (2.0 * b * d + 2.0 * a * c) * dz,
                    f64::from(h.quatern_x),
                ],
                [
                    (2.0 * b * c + 2.0 * a * d) * dx,
                    (a * a + c * c - b * b - d * d) * dy,
                    (2.0 * c * d - 2.0 * a * b) * dz,
                    f64::from(h.quatern_y),
                ],
                [
                    (2.0 * b * d - 2.0 * a * c) * dx,
                    (2.0 * c * d + 2.0 * a * b) * dy,
                    (a * a + d * d - c * c - b * b) * dz,
                    f64::from(h.quatern_z),
                ],
                [0.0, 0.0, 0.0, 1.0],
            ];
        }

        [
            [dx, 0.0, 0.0, 0.0],
            [0.0, dy, 0.0, 0.0],
            [0.0, 0.0, dz, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// True when both volumes have the same shape and (nearly) the same affine.
    pub fn same_grid(&self, other: &Volume) -> bool {
        if self.shape() != other.shape() {
            return false;
        }
        let (a, b) = (self.affine(), other.affine());
        a.iter()
            .flatten()
            .zip(b.iter().flatten())
            .all(|(x, y)| (x - y).abs() < 1e-4)
    }

    /// Extracts a sub-volume and moves the world origin so the cropped voxels
    /// keep their physical position.
    pub fn crop(&self, start: [usize; 3], size: [usize; 3]) -> ImagingResult<Self> {
        let shape = self.shape();
        let fits = (0..3).all(|i| size[i] > 0 && start[i] + size[i] <= shape[i]);
        if !fits {
            return Err(ImagingError::RegionOutOfBounds { start, size, shape });
        }

        let data = self
            .data
            .slice(s![
                start[0]..start[0] + size[0],
                start[1]..start[1] + size[1],
                start[2]..start[2] + size[2]
            ])
            .to_owned();

        let affine = self.affine();
        let shift = |row: usize| -> f64 {
            (0..3)
                .map(|col| affine[row][col] * start[col] as f64)
                .sum()
        };
        let (sx, sy, sz) = (shift(0), shift(1), shift(2));

        let mut header = self.header.clone();
        if header.sform_code > 0 {
            header.srow_x[3] += sx as f32;
            header.srow_y[3] += sy as f32;
            header.srow_z[3] += sz as f32;
        }
        if header.qform_code > 0 {
            header.quatern_x += sx as f32;
            header.quatern_y += sy as f32;
            header.quatern_z += sz as f32;
        }

        Ok(Self { data, header })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ramp(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(x, y, z)| (x + 10 * y + 100 * z) as f32)
    }

    #[test]
    fn write_then_read_preserves_voxels_and_orientation() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("t2w.nii.gz");

        let volume = Volume::from_array(ramp((4, 5, 6)));
        volume.write(&path).unwrap();
        assert!(path.is_file());

        let loaded = Volume::read(&path).unwrap();
        assert_eq!(loaded.shape(), [4, 5, 6]);
        assert_eq!(loaded.data()[[3, 4, 5]], 3.0 + 40.0 + 500.0);
        assert_eq!(loaded.data()[[1, 0, 2]], 201.0);
        assert!(loaded.same_grid(&volume));
    }

    #[test]
    fn crop_shifts_sform_origin() {
        let mut volume = Volume::from_array(ramp((8, 8, 8)));
        volume.header.srow_x = [2.0, 0.0, 0.0, -10.0];
        volume.header.srow_y = [0.0, 2.0, 0.0, -20.0];
        volume.header.srow_z = [0.0, 0.0, 3.0, 5.0];

        let cropped = volume.crop([1, 2, 3], [3, 3, 2]).unwrap();

        assert_eq!(cropped.shape(), [3, 3, 2]);
        assert_eq!(cropped.data()[[0, 0, 0]], volume.data()[[1, 2, 3]]);
        let affine = cropped.affine();
        assert_eq!(affine[0][3], -8.0);
        assert_eq!(affine[1][3], -16.0);
        assert_eq!(affine[2][3], 14.0);
    }

    #[test]
    fn crop_rejects_region_outside_volume() {
        let volume = Volume::from_array(ramp((4, 4, 4)));
        let err = volume.crop([2, 0, 0], [3, 4, 4]).unwrap_err();
        assert!(matches!(err, ImagingError::RegionOutOfBounds { .. }));
    }

    #[test]
    fn with_data_requires_matching_shape() {
        let volume = Volume::from_array(ramp((4, 4, 4)));
        assert!(volume.with_data(Array3::zeros((4, 4, 4))).is_ok());
        assert!(matches!(
            volume.with_data(Array3::zeros((4, 4, 3))),
            Err(ImagingError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn affine_falls_back_to_pixdim() {
        let mut volume = Volume::from_array(ramp((2, 2, 2)));
        volume.header.sform_code = 0;
        volume.header.pixdim = [1.0, 0.5, 0.5, 3.0, 0.0, 0.0, 0.0, 0.0];
        let affine = volume.affine();
        assert_eq!(affine[0][0], 0.5);
        assert_eq!(affine[2][2], 3.0);
        assert_eq!(affine[0][3], 0.0);
    }
}
