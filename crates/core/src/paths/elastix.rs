//! Artefacts produced by elastix and transformix.
//!
//! These names are fixed by the tools and cannot be configured.

use std::path::{Path, PathBuf};

/// Transform parameters of the first (and only) registration stage.
pub struct TransformParametersFile;

impl TransformParametersFile {
    pub const NAME: &'static str = "TransformParameters.0.txt";

    pub fn in_dir(dir: &Path) -> PathBuf {
        dir.join(Self::NAME)
    }
}

/// Image resampled by transformix.
pub struct ResultImageFile;

impl ResultImageFile {
    pub const NAME: &'static str = "result.nii.gz";

    pub fn in_dir(dir: &Path) -> PathBuf {
        dir.join(Self::NAME)
    }
}

/// Log written by transformix next to its result.
pub struct TransformixLogFile;

impl TransformixLogFile {
    pub const NAME: &'static str = "transformix.log";

    pub fn in_dir(dir: &Path) -> PathBuf {
        dir.join(Self::NAME)
    }
}
