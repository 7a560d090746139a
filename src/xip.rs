//! Sliding-slab intensity projections (MIP / MinIP / average)

use crate::config::XipConfig;
use crate::types::{Shape3, XipReduction};
use ndarray::{s, Array2, Array3, ArrayView3, Axis};

/// Number of slabs of `depth` slices, `step` apart, that fit in `len`
pub fn slab_count(len: usize, step: usize, depth: usize) -> usize {
    if len < depth || step == 0 {
        0
    } else {
        (len - depth) / step + 1
    }
}

/// Shape of the projection of an item of shape `shape`
pub fn projected_shape(shape: Shape3, config: &XipConfig) -> Shape3 {
    let perm = config.projection.permutation();
    [
        slab_count(shape[perm[0]], config.step, config.depth),
        shape[perm[1]],
        shape[perm[2]],
    ]
}

fn reduce(slab: ArrayView3<'_, f32>, func: XipReduction) -> Array2<f32> {
    match func {
        XipReduction::Max => slab.fold_axis(Axis(0), f32::NEG_INFINITY, |acc, &v| acc.max(v)),
        XipReduction::Min => slab.fold_axis(Axis(0), f32::INFINITY, |acc, &v| acc.min(v)),
        XipReduction::Avg => slab.sum_axis(Axis(0)) / slab.len_of(Axis(0)) as f32,
    }
}

/// Project one item; axis 0 of the result runs over slabs.
///
/// Coronal and sagittal projections first bring their axis to the front,
/// so the result is laid out as (slab, z, x) and (slab, z, y).
pub fn xip_item(input: ArrayView3<'_, f32>, config: &XipConfig) -> Array3<f32> {
    let oriented = input.permuted_axes(config.projection.permutation());
    let (len, a, b) = oriented.dim();
    let count = slab_count(len, config.step, config.depth);

    let mut output = Array3::<f32>::zeros((count, a, b));
    for (k, mut plane) in output.outer_iter_mut().enumerate() {
        let start = k * config.step;
        let slab = oriented.slice(s![start..start + config.depth, .., ..]);
        plane.assign(&reduce(slab, config.func));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Projection;

    fn config(step: usize, depth: usize, func: XipReduction, projection: Projection) -> XipConfig {
        XipConfig {
            step,
            depth,
            func,
            projection,
        }
    }

    #[test]
    fn test_slab_count() {
        assert_eq!(slab_count(10, 2, 10), 1);
        assert_eq!(slab_count(20, 2, 10), 6);
        assert_eq!(slab_count(9, 2, 10), 0);
        assert_eq!(slab_count(5, 1, 1), 5);
    }

    #[test]
    fn test_axial_max_min_avg() {
        let volume = Array3::from_shape_fn((6, 2, 2), |(z, _, _)| z as f32);

        let max = xip_item(volume.view(), &config(2, 3, XipReduction::Max, Projection::Axial));
        assert_eq!(max.dim(), (2, 2, 2));
        assert_eq!(max[[0, 0, 0]], 2.0);
        assert_eq!(max[[1, 1, 1]], 4.0);

        let min = xip_item(volume.view(), &config(2, 3, XipReduction::Min, Projection::Axial));
        assert_eq!(min[[1, 0, 0]], 2.0);

        let avg = xip_item(volume.view(), &config(2, 3, XipReduction::Avg, Projection::Axial));
        assert_eq!(avg[[0, 0, 0]], 1.0);
        assert_eq!(avg[[1, 0, 1]], 3.0);
    }

    #[test]
    fn test_coronal_projection_layout() {
        let volume = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let cfg = config(1, 4, XipReduction::Max, Projection::Coronal);
        let out = xip_item(volume.view(), &cfg);
        assert_eq!(out.dim(), (1, 3, 5));
        assert_eq!(projected_shape([3, 4, 5], &cfg), [1, 3, 5]);
        // max over y picks y = 3
        assert_eq!(out[[0, 2, 4]], 234.0);
    }

    #[test]
    fn test_sagittal_projection_layout() {
        let volume = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let cfg = config(5, 5, XipReduction::Min, Projection::Sagittal);
        let out = xip_item(volume.view(), &cfg);
        assert_eq!(out.dim(), (1, 3, 4));
        assert_eq!(out[[0, 1, 2]], 120.0);
    }

    #[test]
    fn test_too_thin_item_projects_to_nothing() {
        let volume = Array3::<f32>::zeros((3, 2, 2));
        let out = xip_item(volume.view(), &XipConfig::default());
        assert_eq!(out.dim(), (0, 2, 2));
    }
}
