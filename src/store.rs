//! Stacked-volume store: variable-length volumes concatenated along axis 0

use crate::error::{BatchError, Result};
use crate::types::Shape3;
use ndarray::{s, Array2, Array3, ArrayView3, ArrayViewMut3, Axis};

/// Skyscraper of N volumes sharing one slice shape
///
/// Item `i` occupies `buffer[bounds[i]..bounds[i + 1], .., ..]`.
#[derive(Debug, Clone, PartialEq)]
pub struct StackedVolumes {
    buffer: Array3<f32>,
    bounds: Vec<usize>,
}

impl StackedVolumes {
    /// Build a store after checking the bounds against the buffer
    pub fn new(buffer: Array3<f32>, bounds: Vec<usize>) -> Result<Self> {
        validate_bounds(&bounds, buffer.len_of(Axis(0)))?;
        Ok(Self { buffer, bounds })
    }

    /// Build a store whose bounds are already known to be consistent
    pub(crate) fn from_parts(buffer: Array3<f32>, bounds: Vec<usize>) -> Self {
        debug_assert!(validate_bounds(&bounds, buffer.len_of(Axis(0))).is_ok());
        Self { buffer, bounds }
    }

    /// Store of `items` zero-length volumes
    pub fn empty(items: usize) -> Self {
        Self {
            buffer: Array3::zeros((0, 0, 0)),
            bounds: vec![0; items + 1],
        }
    }

    /// Stack independent volumes in order
    pub fn stack(volumes: &[ArrayView3<'_, f32>]) -> Result<Self> {
        if volumes.is_empty() {
            return Ok(Self::empty(0));
        }
        let slice_shape = (volumes[0].dim().1, volumes[0].dim().2);
        if let Some((pos, _)) = volumes
            .iter()
            .enumerate()
            .find(|(_, v)| (v.dim().1, v.dim().2) != slice_shape)
        {
            return Err(BatchError::ShapeMismatch(format!(
                "item {} has slice shape {:?}, expected {:?}",
                pos,
                (volumes[pos].dim().1, volumes[pos].dim().2),
                slice_shape
            )));
        }

        let bounds = cumulative_bounds(volumes.iter().map(|v| v.len_of(Axis(0))));
        let buffer = ndarray::concatenate(Axis(0), volumes)
            .map_err(|e| BatchError::ShapeMismatch(e.to_string()))?;
        Ok(Self::from_parts(buffer, bounds))
    }

    /// Number of stacked items
    pub fn len(&self) -> usize {
        self.bounds.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buffer(&self) -> &Array3<f32> {
        &self.buffer
    }

    /// Mutable access for point-wise operations that keep the shape
    pub fn buffer_mut(&mut self) -> &mut Array3<f32> {
        &mut self.buffer
    }

    pub fn bounds(&self) -> &[usize] {
        &self.bounds
    }

    /// Shared (y, x) extent of every item
    pub fn slice_shape(&self) -> (usize, usize) {
        let (_, y, x) = self.buffer.dim();
        (y, x)
    }

    /// Row range occupied by item `pos`
    pub fn item_range(&self, pos: usize) -> std::ops::Range<usize> {
        self.bounds[pos]..self.bounds[pos + 1]
    }

    /// View of item `pos`; the caller has checked the range
    pub fn item(&self, pos: usize) -> ArrayView3<'_, f32> {
        let range = self.item_range(pos);
        self.buffer.slice(s![range, .., ..])
    }

    /// Mutable view of item `pos`; the caller has checked the range
    pub fn item_mut(&mut self, pos: usize) -> ArrayViewMut3<'_, f32> {
        let range = self.item_range(pos);
        self.buffer.slice_mut(s![range, .., ..])
    }

    /// Shape of item `pos` along (z, y, x)
    pub fn item_shape(&self, pos: usize) -> Shape3 {
        let (y, x) = self.slice_shape();
        [self.bounds[pos + 1] - self.bounds[pos], y, x]
    }

    /// Per-item shapes as an (N, 3) array
    pub fn shape_per_item(&self) -> Array2<usize> {
        let (y, x) = self.slice_shape();
        let mut shapes = Array2::zeros((self.len(), 3));
        for (pos, mut row) in shapes.rows_mut().into_iter().enumerate() {
            row[0] = self.bounds[pos + 1] - self.bounds[pos];
            row[1] = y;
            row[2] = x;
        }
        shapes
    }

    /// Views of every item, in order
    pub fn items(&self) -> Vec<ArrayView3<'_, f32>> {
        (0..self.len()).map(|pos| self.item(pos)).collect()
    }

    /// Decompose into buffer and bounds
    pub fn into_parts(self) -> (Array3<f32>, Vec<usize>) {
        (self.buffer, self.bounds)
    }
}

/// Cumulative offsets for a sequence of item lengths, starting at 0
pub(crate) fn cumulative_bounds(lengths: impl IntoIterator<Item = usize>) -> Vec<usize> {
    let mut bounds = vec![0];
    let mut total = 0;
    for len in lengths {
        total += len;
        bounds.push(total);
    }
    bounds
}

fn validate_bounds(bounds: &[usize], rows: usize) -> Result<()> {
    match bounds.first() {
        None => {
            return Err(BatchError::ShapeMismatch(
                "bounds must hold at least one entry".to_string(),
            ))
        }
        Some(&first) if first != 0 => {
            return Err(BatchError::ShapeMismatch(format!(
                "bounds must start at 0, got {}",
                first
            )))
        }
        _ => {}
    }
    if let Some(w) = bounds.windows(2).find(|w| w[1] < w[0]) {
        return Err(BatchError::ShapeMismatch(format!(
            "bounds must be non-decreasing, got {} after {}",
            w[1], w[0]
        )));
    }
    let last = bounds[bounds.len() - 1];
    if last != rows {
        return Err(BatchError::ShapeMismatch(format!(
            "bounds end at {} but buffer holds {} slices",
            last, rows
        )));
    }
    Ok(())
}
