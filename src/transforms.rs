//! Per-item geometric kernels run by the rebuild framework
//!
//! Each kernel reads one item's view and writes its result into the
//! destination view handed out by `rebuild::rebuild_in_place`.

use crate::error::{BatchError, Result};
use crate::interpolation::resize_volume;
use crate::types::{PaddingMode, Shape3};
use ndarray::{s, Array3, ArrayView3, ArrayViewMut3};

fn check_output(output: &ArrayViewMut3<'_, f32>, expected: Shape3) -> Result<()> {
    let (z, y, x) = output.dim();
    if [z, y, x] != expected {
        return Err(BatchError::ShapeMismatch(format!(
            "destination view is {:?}, kernel produces {:?}",
            [z, y, x],
            expected
        )));
    }
    Ok(())
}

/// Spline-resize `input` into `output`, whose shape is the target
pub fn resize_item(
    input: ArrayView3<'_, f32>,
    mut output: ArrayViewMut3<'_, f32>,
    order: usize,
) -> Result<()> {
    let (z, y, x) = output.dim();
    if input.is_empty() {
        return Err(BatchError::ShapeMismatch(format!(
            "cannot resize an empty item of shape {:?} to {:?}",
            input.dim(),
            (z, y, x)
        )));
    }
    let resized = resize_volume(input, [z, y, x], order);
    output.assign(&resized);
    Ok(())
}

/// Resize toward `resized_shape`, then copy the window starting at `offset`
/// into `output`, padding where the window leaves the resized volume
pub fn unify_item(
    input: ArrayView3<'_, f32>,
    output: ArrayViewMut3<'_, f32>,
    resized_shape: Shape3,
    offset: [i64; 3],
    order: usize,
    padding: PaddingMode,
) -> Result<()> {
    if input.is_empty() {
        return Err(BatchError::ShapeMismatch(
            "cannot unify spacing of an empty item".to_string(),
        ));
    }
    let resized = resize_volume(input, resized_shape, order);
    crop_or_pad_into(resized.view(), output, offset, padding);
    Ok(())
}

/// Reverse the slice order of one item
pub fn flip_item(input: ArrayView3<'_, f32>, mut output: ArrayViewMut3<'_, f32>) -> Result<()> {
    let (z, y, x) = input.dim();
    check_output(&output, [z, y, x])?;
    output.assign(&input.slice(s![..;-1, .., ..]));
    Ok(())
}

/// Fill `output` with the window of `input` starting at `offset`.
///
/// Coordinates outside `input` are resolved by `padding`.
pub fn crop_or_pad_into(
    input: ArrayView3<'_, f32>,
    mut output: ArrayViewMut3<'_, f32>,
    offset: [i64; 3],
    padding: PaddingMode,
) {
    let (iz, iy, ix) = input.dim();
    let fill = padding.fill_value();
    let map = |axis: usize, len: usize, out_len: usize| -> Vec<Option<usize>> {
        (0..out_len)
            .map(|j| padding.source_index(j as isize + offset[axis] as isize, len))
            .collect()
    };
    let (oz, oy, ox) = output.dim();
    let zs = map(0, iz, oz);
    let ys = map(1, iy, oy);
    let xs = map(2, ix, ox);

    for ((z, y, x), value) in output.indexed_iter_mut() {
        *value = match (zs[z], ys[y], xs[x]) {
            (Some(sz), Some(sy), Some(sx)) => input[[sz, sy, sx]],
            _ => fill,
        };
    }
}

/// Pad `input` by `after` voxels at the end of each axis
pub fn pad_end(input: ArrayView3<'_, f32>, after: Shape3, padding: PaddingMode) -> Array3<f32> {
    let (z, y, x) = input.dim();
    if after == [0, 0, 0] {
        return input.to_owned();
    }
    let mut padded = Array3::zeros((z + after[0], y + after[1], x + after[2]));
    crop_or_pad_into(input, padded.view_mut(), [0, 0, 0], padding);
    padded
}
