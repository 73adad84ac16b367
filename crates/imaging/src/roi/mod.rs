//! Region-of-interest extraction.

mod bbox;
mod segment;

pub use bbox::BoundingBox;
pub use segment::segment_prostate;

use crate::{ImagingError, ImagingResult, Volume};

/// Crops `volume` and `mask` to the mask's bounding box grown by `padding`
/// voxels per side. Both crops keep their world position.
pub fn extract_bounding_box(
    volume: &Volume,
    mask: &Volume,
    padding: usize,
) -> ImagingResult<(Volume, Volume)> {
    if volume.shape() != mask.shape() {
        return Err(ImagingError::ShapeMismatch {
            expected: volume.shape(),
            found: mask.shape(),
        });
    }

    let bbox = BoundingBox::from_mask(mask.data())?.padded(padding, volume.shape());
    tracing::debug!(
        "ROI start {:?} size {:?} (padding {padding})",
        bbox.start,
        bbox.size
    );

    Ok((
        volume.crop(bbox.start, bbox.size)?,
        mask.crop(bbox.start, bbox.size)?,
    ))
}
