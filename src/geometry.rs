//! Per-item world-coordinate metadata (origin and spacing)

use crate::error::{BatchError, Result};
use crate::types::{floor_div, Shape3, Vec3};
use ndarray::{Array2, ArrayView1};

/// Origin and spacing of every item, co-indexed with the stacked volumes
#[derive(Debug, Clone, PartialEq)]
pub struct ItemGeometry {
    origin: Array2<f64>,
    spacing: Array2<f64>,
}

/// Per-item plan produced by `ItemGeometry::plan_unify_spacing`
#[derive(Debug, Clone, PartialEq)]
pub struct UnifyPlan {
    /// Shape each item takes at the target spacing, before crop/pad
    pub resized_shapes: Vec<Shape3>,
    /// Offset of the output window inside the resized item; negative means padding
    pub offsets: Vec<[i64; 3]>,
    /// Metadata of the unified batch
    pub geometry: ItemGeometry,
}

impl ItemGeometry {
    /// Zero origin, unit spacing
    pub fn identity(items: usize) -> Self {
        Self {
            origin: Array2::zeros((items, 3)),
            spacing: Array2::ones((items, 3)),
        }
    }

    /// Build from (N, 3) arrays
    pub fn new(origin: Array2<f64>, spacing: Array2<f64>) -> Result<Self> {
        if origin.ncols() != 3 || origin.dim() != spacing.dim() {
            return Err(BatchError::ShapeMismatch(format!(
                "origin {:?} and spacing {:?} must both be (N, 3)",
                origin.dim(),
                spacing.dim()
            )));
        }
        Ok(Self { origin, spacing })
    }

    /// Build from per-item triples
    pub fn from_triples(origin: &[Vec3], spacing: &[Vec3]) -> Result<Self> {
        Self::new(triples_to_array(origin), triples_to_array(spacing))
    }

    pub fn len(&self) -> usize {
        self.origin.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn origin(&self) -> &Array2<f64> {
        &self.origin
    }

    pub fn spacing(&self) -> &Array2<f64> {
        &self.spacing
    }

    pub fn item_origin(&self, pos: usize) -> Vec3 {
        row_to_triple(self.origin.row(pos))
    }

    pub fn item_spacing(&self, pos: usize) -> Vec3 {
        row_to_triple(self.spacing.row(pos))
    }

    /// Spacing after every item is resized from its own shape to `new_shape`.
    ///
    /// The physical extent `shape * spacing` of each item is preserved.
    pub fn rescale(&self, old_shapes: &Array2<usize>, new_shape: Shape3) -> Array2<f64> {
        let mut spacing = self.spacing.clone();
        for ((pos, axis), value) in spacing.indexed_iter_mut() {
            *value *= old_shapes[[pos, axis]] as f64 / new_shape[axis] as f64;
        }
        spacing
    }

    /// Metadata after a uniform resize to `new_shape`; the origin is kept
    pub fn resized(&self, old_shapes: &Array2<usize>, new_shape: Shape3) -> Self {
        Self {
            origin: self.origin.clone(),
            spacing: self.rescale(old_shapes, new_shape),
        }
    }

    /// Plan a resample toward `target_spacing` followed by a centered
    /// crop/pad to `target_shape`.
    ///
    /// The origin is shifted by the window offset so the world position of
    /// every kept voxel is unchanged.
    pub fn plan_unify_spacing(
        &self,
        old_shapes: &Array2<usize>,
        target_spacing: Vec3,
        target_shape: Shape3,
    ) -> UnifyPlan {
        let items = self.len();
        let mut resized_shapes = Vec::with_capacity(items);
        let mut offsets = Vec::with_capacity(items);
        let mut origin = self.origin.clone();
        let mut spacing = self.spacing.clone();

        for pos in 0..items {
            let mut resized = [0usize; 3];
            let mut offset = [0i64; 3];
            for axis in 0..3 {
                let old_len = old_shapes[[pos, axis]];
                let old_spacing = self.spacing[[pos, axis]];
                let len = (old_len as f64 * old_spacing / target_spacing[axis]).round();
                // keep at least one voxel so non-empty items stay resampleable
                let len = if old_len == 0 { 0 } else { (len as usize).max(1) };

                let new_spacing = if len == 0 {
                    old_spacing
                } else {
                    old_spacing * old_len as f64 / len as f64
                };
                let shift = floor_div(len as i64 - target_shape[axis] as i64, 2);

                resized[axis] = len;
                offset[axis] = shift;
                spacing[[pos, axis]] = new_spacing;
                origin[[pos, axis]] += new_spacing * shift as f64;
            }
            resized_shapes.push(resized);
            offsets.push(offset);
        }

        UnifyPlan {
            resized_shapes,
            offsets,
            geometry: Self { origin, spacing },
        }
    }

    /// Convenience wrapper returning only the new metadata arrays
    pub fn recompute_for_unify_spacing(
        &self,
        old_shapes: &Array2<usize>,
        target_spacing: Vec3,
        target_shape: Shape3,
    ) -> (Array2<f64>, Array2<f64>) {
        let plan = self.plan_unify_spacing(old_shapes, target_spacing, target_shape);
        (plan.geometry.origin, plan.geometry.spacing)
    }

    /// Metadata of sliding-slab projections: axes reordered by
    /// `permutation`, slabs `step` slices apart along the new axis 0
    pub fn projected(&self, permutation: [usize; 3], step: usize) -> Self {
        let mut origin = Array2::zeros(self.origin.raw_dim());
        let mut spacing = Array2::zeros(self.spacing.raw_dim());
        for pos in 0..self.len() {
            for (dst, &src) in permutation.iter().enumerate() {
                origin[[pos, dst]] = self.origin[[pos, src]];
                spacing[[pos, dst]] = self.spacing[[pos, src]];
            }
            spacing[[pos, 0]] *= step as f64;
        }
        Self { origin, spacing }
    }
}

fn triples_to_array(triples: &[Vec3]) -> Array2<f64> {
    let mut array = Array2::zeros((triples.len(), 3));
    for (pos, triple) in triples.iter().enumerate() {
        for axis in 0..3 {
            array[[pos, axis]] = triple[axis];
        }
    }
    array
}

fn row_to_triple(row: ArrayView1<'_, f64>) -> Vec3 {
    [row[0], row[1], row[2]]
}
