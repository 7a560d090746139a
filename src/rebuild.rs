//! Fan-out/fan-in over batch items
//!
//! Two flavors:
//!
//! - **accumulate**: every task returns its own array, results are stacked
//!   in item order and bounds are the running sum of their lengths. Used
//!   when output lengths vary per item (loading, projections).
//! - **rebuild in place**: one destination buffer is allocated up front and
//!   split into disjoint mutable views derived from the new bounds; each
//!   task writes only into its own view. Used when the total output length
//!   is known before dispatch (resize, unify spacing, flip, masks).
//!
//! In both flavors a single failing task fails the whole dispatch with
//! `ParallelTaskFailure` before anything is assembled, so the source store is
//! never touched.

use crate::error::Result;
use crate::executor::{collect_outcomes, Executor};
use crate::store::{cumulative_bounds, StackedVolumes};
use crate::types::Shape3;
use ndarray::{Array3, ArrayView3, ArrayViewMut3, Axis};

/// Destination layout of a rebuild-in-place dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildTarget {
    /// Every item keeps its shape
    SameShape,
    /// Every item takes the given shape
    Uniform(Shape3),
}

/// Work descriptor handed to a rebuild-in-place worker
pub struct ItemTask<'a> {
    /// Position of the item in the batch
    pub position: usize,
    /// Read-only view of the item in the source store
    pub input: ArrayView3<'a, f32>,
    /// Write-only destination slice inside the shared buffer
    pub output: ArrayViewMut3<'a, f32>,
}

/// Split a buffer into consecutive, non-overlapping views along axis 0
pub(crate) fn split_by_bounds<'a>(
    mut view: ArrayViewMut3<'a, f32>,
    bounds: &[usize],
) -> Vec<ArrayViewMut3<'a, f32>> {
    debug_assert_eq!(bounds.last().copied(), Some(view.len_of(Axis(0))));
    let mut parts = Vec::with_capacity(bounds.len().saturating_sub(1));
    for window in bounds.windows(2) {
        let (head, tail) = view.split_at(Axis(0), window[1] - window[0]);
        parts.push(head);
        view = tail;
    }
    parts
}

/// Run `task` for every item and stack the returned volumes
pub fn accumulate<F>(executor: &Executor, ids: &[String], task: F) -> Result<StackedVolumes>
where
    F: Fn(usize) -> Result<Array3<f32>> + Sync,
{
    let positions: Vec<usize> = (0..ids.len()).collect();
    let outcomes = executor.map_cpu(positions, task);
    let volumes = collect_outcomes(ids, outcomes)?;
    stack_results(volumes)
}

/// Stack per-item results produced by either execution strategy
pub(crate) fn stack_results(volumes: Vec<Array3<f32>>) -> Result<StackedVolumes> {
    let views: Vec<ArrayView3<'_, f32>> = volumes.iter().map(|v| v.view()).collect();
    let stacked = StackedVolumes::stack(&views)?;
    tracing::debug!(
        items = stacked.len(),
        slices = stacked.bounds().last().copied().unwrap_or(0),
        "accumulated item results"
    );
    Ok(stacked)
}

/// Run `task` once per item, each writing into its own slice of a freshly
/// allocated buffer shaped by `target`
pub fn rebuild_in_place<F>(
    executor: &Executor,
    source: &StackedVolumes,
    ids: &[String],
    target: RebuildTarget,
    task: F,
) -> Result<StackedVolumes>
where
    F: Fn(ItemTask<'_>) -> Result<()> + Sync,
{
    let items = source.len();
    let (bounds, slice_shape) = match target {
        RebuildTarget::SameShape => (source.bounds().to_vec(), source.slice_shape()),
        RebuildTarget::Uniform([z, y, x]) => {
            (cumulative_bounds(std::iter::repeat(z).take(items)), (y, x))
        }
    };
    let total = bounds.last().copied().unwrap_or(0);
    let mut buffer = Array3::<f32>::zeros((total, slice_shape.0, slice_shape.1));

    {
        let outputs = split_by_bounds(buffer.view_mut(), &bounds);
        let tasks: Vec<ItemTask<'_>> = outputs
            .into_iter()
            .enumerate()
            .map(|(position, output)| ItemTask {
                position,
                input: source.item(position),
                output,
            })
            .collect();

        let outcomes = executor.map_cpu(tasks, |task_input| task(task_input));
        collect_outcomes(ids, outcomes)?;
    }

    tracing::debug!(items, slices = total, ?target, "rebuilt batch in place");
    Ok(StackedVolumes::from_parts(buffer, bounds))
}
