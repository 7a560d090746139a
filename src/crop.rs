//! Bounding boxes of item content

use crate::types::Shape3;
use ndarray::ArrayView3;
use serde::{Deserialize, Serialize};

/// Center and half-size of the box enclosing an item's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropDescriptor {
    pub center: Shape3,
    pub half_size: Shape3,
}

/// Box around every voxel brighter than the item's darkest value.
///
/// Content is measured against the item minimum rather than zero: raw scans
/// keep air at about -1000 HU, so a nonzero test would select the whole
/// volume. For masks and normalized data, whose minimum is 0, both agree.
/// Empty and constant items have no content: the center is the middle of
/// the item and the half-size is zero.
pub fn crop_descriptor(item: ArrayView3<'_, f32>) -> CropDescriptor {
    let (z, y, x) = item.dim();
    let shape = [z, y, x];
    let background = item.iter().copied().fold(f32::INFINITY, f32::min);

    let mut lo = shape;
    let mut hi = [0usize; 3];
    let mut found = false;
    for ((iz, iy, ix), &value) in item.indexed_iter() {
        if value > background {
            found = true;
            for (axis, index) in [iz, iy, ix].into_iter().enumerate() {
                lo[axis] = lo[axis].min(index);
                hi[axis] = hi[axis].max(index);
            }
        }
    }

    if !found {
        return CropDescriptor {
            center: [z / 2, y / 2, x / 2],
            half_size: [0; 3],
        };
    }
    let mut center = [0; 3];
    let mut half_size = [0; 3];
    for axis in 0..3 {
        center[axis] = (lo[axis] + hi[axis]) / 2;
        half_size[axis] = (hi[axis] - lo[axis] + 1) / 2;
    }
    CropDescriptor { center, half_size }
}
