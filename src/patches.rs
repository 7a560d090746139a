//! Sliding-window patch extraction and reassembly

use crate::config::{AssembleConfig, PatchConfig};
use crate::error::{BatchError, Result};
use crate::transforms::pad_end;
use crate::types::Shape3;
use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, ArrayViewMut3, Axis, Zip};

/// Padding appended to an axis of length `extent` so windows of `patch`
/// voxels, `stride` apart, tile it exactly
pub fn padding_for(extent: usize, patch: usize, stride: usize) -> usize {
    if extent <= patch {
        patch - extent
    } else {
        (stride - (extent - patch) % stride) % stride
    }
}

/// Padded extent and window count along each axis
fn tiling(shape: Shape3, patch: Shape3, stride: Shape3) -> (Shape3, Shape3) {
    let mut padded = [0; 3];
    let mut windows = [0; 3];
    for axis in 0..3 {
        padded[axis] = shape[axis] + padding_for(shape[axis], patch[axis], stride[axis]);
        windows[axis] = (padded[axis] - patch[axis]) / stride[axis] + 1;
    }
    (padded, windows)
}

/// Patches of a whole batch, item after item
#[derive(Debug, Clone, PartialEq)]
pub struct Patches {
    data: Array4<f32>,
    counts: Vec<usize>,
    offsets: Vec<usize>,
}

impl Patches {
    /// Wrap `data` holding `counts[i]` consecutive patches for item `i`
    pub fn new(data: Array4<f32>, counts: Vec<usize>) -> Result<Self> {
        let total: usize = counts.iter().sum();
        if total != data.len_of(Axis(0)) {
            return Err(BatchError::ShapeMismatch(format!(
                "patch counts add up to {}, array holds {} patches",
                total,
                data.len_of(Axis(0))
            )));
        }
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        offsets.push(0);
        for count in &counts {
            offsets.push(offsets[offsets.len() - 1] + count);
        }
        Ok(Self {
            data,
            counts,
            offsets,
        })
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Number of patches of each item
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Number of items the patches were taken from
    pub fn items(&self) -> usize {
        self.counts.len()
    }

    pub fn patch_shape(&self) -> Shape3 {
        let (_, z, y, x) = self.data.dim();
        [z, y, x]
    }

    /// Patches of item `pos`
    pub fn item(&self, pos: usize) -> ArrayView4<'_, f32> {
        self.data
            .slice(s![self.offsets[pos]..self.offsets[pos + 1], .., .., ..])
    }

    pub fn into_data(self) -> Array4<f32> {
        self.data
    }
}

/// Cut one item into windows in row-major window order
pub fn extract_item_patches(item: ArrayView3<'_, f32>, config: &PatchConfig) -> Array4<f32> {
    let (z, y, x) = item.dim();
    let patch = config.patch_shape;
    let stride = config.stride;
    let (padded_shape, windows) = tiling([z, y, x], patch, stride);
    let padded = pad_end(
        item,
        [padded_shape[0] - z, padded_shape[1] - y, padded_shape[2] - x],
        config.padding,
    );

    let total: usize = windows.iter().product();
    let mut out = Array4::<f32>::zeros((total, patch[0], patch[1], patch[2]));
    let mut next = 0;
    for i in 0..windows[0] {
        for j in 0..windows[1] {
            for k in 0..windows[2] {
                let (z0, y0, x0) = (i * stride[0], j * stride[1], k * stride[2]);
                out.index_axis_mut(Axis(0), next).assign(&padded.slice(s![
                    z0..z0 + patch[0],
                    y0..y0 + patch[1],
                    x0..x0 + patch[2]
                ]));
                next += 1;
            }
        }
    }
    out
}

/// Rebuild one item of `config.target_shape` from its windows.
///
/// Overlapping voxels take the mean of every window covering them; voxels no
/// window covers (stride larger than the patch) are zero.
pub fn assemble_item(
    patches: ArrayView4<'_, f32>,
    config: &AssembleConfig,
    mut output: ArrayViewMut3<'_, f32>,
) -> Result<()> {
    let target = config.target_shape;
    let stride = config.stride;
    let (oz, oy, ox) = output.dim();
    if [oz, oy, ox] != target {
        return Err(BatchError::ShapeMismatch(format!(
            "destination view is {:?}, target shape is {:?}",
            [oz, oy, ox],
            target
        )));
    }
    let (count, pz, py, px) = patches.dim();
    let patch = [pz, py, px];
    let (padded_shape, windows) = tiling(target, patch, stride);
    let expected: usize = windows.iter().product();
    if count != expected {
        return Err(BatchError::ShapeMismatch(format!(
            "{} patches of shape {:?} cannot tile {:?} with stride {:?}, expected {}",
            count, patch, target, stride, expected
        )));
    }

    let dims = (padded_shape[0], padded_shape[1], padded_shape[2]);
    let mut sum = Array3::<f32>::zeros(dims);
    let mut hits = Array3::<f32>::zeros(dims);
    let mut next = 0;
    for i in 0..windows[0] {
        for j in 0..windows[1] {
            for k in 0..windows[2] {
                let (z0, y0, x0) = (i * stride[0], j * stride[1], k * stride[2]);
                let window = s![z0..z0 + pz, y0..y0 + py, x0..x0 + px];
                sum.slice_mut(window)
                    .zip_mut_with(&patches.index_axis(Axis(0), next), |acc, &v| *acc += v);
                hits.slice_mut(window).mapv_inplace(|h| h + 1.0);
                next += 1;
            }
        }
    }

    let crop = s![..target[0], ..target[1], ..target[2]];
    Zip::from(&mut output)
        .and(sum.slice(crop))
        .and(hits.slice(crop))
        .for_each(|out, &total, &n| *out = if n > 0.0 { total / n } else { 0.0 });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaddingMode;

    #[test]
    fn test_padding_for() {
        assert_eq!(padding_for(10, 4, 3), 0);
        assert_eq!(padding_for(11, 4, 3), 2);
        assert_eq!(padding_for(3, 4, 2), 1);
        assert_eq!(padding_for(8, 4, 4), 0);
        assert_eq!(padding_for(9, 4, 4), 3);
    }

    #[test]
    fn test_window_order_is_row_major() {
        let item = Array3::from_shape_fn((2, 4, 4), |(z, y, x)| (z * 16 + y * 4 + x) as f32);
        let config = PatchConfig::new([2, 2, 2], [2, 2, 2]);
        let patches = extract_item_patches(item.view(), &config);
        assert_eq!(patches.dim(), (4, 2, 2, 2));
        // second window advances along x, third along y
        assert_eq!(patches[[1, 0, 0, 0]], 2.0);
        assert_eq!(patches[[2, 0, 0, 0]], 8.0);
        assert_eq!(patches[[3, 1, 1, 1]], 31.0);
    }

    #[test]
    fn test_round_trip_with_padding() {
        let item = Array3::from_shape_fn((5, 6, 7), |(z, y, x)| (z * 42 + y * 7 + x) as f32);
        let config = PatchConfig::new([2, 4, 4], [2, 4, 4]).with_padding(PaddingMode::Reflect);
        let patches = extract_item_patches(item.view(), &config);
        // padded to (6, 8, 8)
        assert_eq!(patches.len_of(Axis(0)), 3 * 2 * 2);

        let mut restored = Array3::zeros((5, 6, 7));
        let assemble = AssembleConfig::new([2, 4, 4], [5, 6, 7]);
        assemble_item(patches.view(), &assemble, restored.view_mut()).unwrap();
        assert_eq!(restored, item);
    }

    #[test]
    fn test_overlapping_round_trip() {
        let item = Array3::from_shape_fn((6, 6, 6), |(z, y, x)| (z + 2 * y + 3 * x) as f32);
        let config = PatchConfig::new([4, 4, 4], [2, 2, 2]);
        let patches = extract_item_patches(item.view(), &config);
        assert_eq!(patches.len_of(Axis(0)), 8);

        let mut restored = Array3::zeros((6, 6, 6));
        let assemble = AssembleConfig::new([2, 2, 2], [6, 6, 6]);
        assemble_item(patches.view(), &assemble, restored.view_mut()).unwrap();
        assert_eq!(restored, item);
    }

    #[test]
    fn test_wrong_patch_count_rejected() {
        let patches = Array4::<f32>::zeros((3, 2, 2, 2));
        let mut out = Array3::zeros((4, 4, 4));
        let assemble = AssembleConfig::new([2, 2, 2], [4, 4, 4]);
        assert!(matches!(
            assemble_item(patches.view(), &assemble, out.view_mut()),
            Err(BatchError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_patches_item_views() {
        let data = Array4::from_shape_fn((5, 1, 1, 1), |(n, _, _, _)| n as f32);
        let patches = Patches::new(data, vec![2, 0, 3]).unwrap();
        assert_eq!(patches.item(0).len_of(Axis(0)), 2);
        assert_eq!(patches.item(1).len_of(Axis(0)), 0);
        assert_eq!(patches.item(2)[[0, 0, 0, 0]], 2.0);
        assert!(Patches::new(Array4::zeros((4, 1, 1, 1)), vec![2, 1]).is_err());
    }
}
