//! MRI imaging helpers for the registration pipeline
//!
//! This crate holds the small amount of numeric work the pipeline does itself.
//! Registration is delegated to elastix; what remains here is:
//!
//! - reading and writing 3D NIfTI volumes (`.nii` / `.nii.gz`)
//! - intensity standardization (Nyul landmark matching and Z-score)
//! - ROI extraction around a binary mask, plus a threshold-based fallback mask
//!
//! ## Example Usage
//!
//! ```no_run
//! use mrireg_imaging::{extract_bounding_box, segment_prostate, Volume};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let t2w = Volume::read("patient_001/patient_001_t2w.nii.gz")?;
//! let mask = t2w.with_data(segment_prostate(t2w.data())?)?;
//! let (roi, _roi_mask) = extract_bounding_box(&t2w, &mask, 10)?;
//! roi.write("out/t2w_roi.nii.gz")?;
//! # Ok(())
//! # }
//! ```

pub mod roi;
pub mod standardization;
mod volume;

pub use roi::{extract_bounding_box, segment_prostate, BoundingBox};
pub use standardization::{
    load_parameters, save_parameters, standardizer_from_parameters, IntensityStandardizer,
    NyulStandardizer, StandardizationMethod, StandardizationParameters, ZScoreStandardizer,
};
pub use volume::Volume;

/// Errors that can occur while reading, transforming or writing volumes
#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    /// The NIfTI reader or writer failed
    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    /// The volume does not have exactly three spatial dimensions
    #[error("expected a 3D volume, found {0} dimensions")]
    NotVolume3D(usize),

    /// Two arrays that must share a grid do not
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        found: [usize; 3],
    },

    /// A crop region falls outside the volume
    #[error("region start {start:?} size {size:?} exceeds volume shape {shape:?}")]
    RegionOutOfBounds {
        start: [usize; 3],
        size: [usize; 3],
        shape: [usize; 3],
    },

    /// No voxel with intensity above zero was found
    #[error("volume has no foreground voxels")]
    EmptyForeground,

    /// A mask contains no labelled voxels
    #[error("mask has no labelled voxels")]
    EmptyMask,

    /// A standardizer was used before being trained or loaded
    #[error("standardizer must be trained before transform")]
    NotTrained,

    /// Persisted or requested standardizer settings are inconsistent
    #[error("invalid standardization parameters: {0}")]
    InvalidParameters(String),

    /// Unknown standardization method name
    #[error("unknown standardization method: {0}")]
    UnknownMethod(String),

    /// Standardization parameters could not be (de)serialized
    #[error("failed to (de)serialize standardization parameters: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ImagingResult<T> = std::result::Result<T, ImagingError>;
