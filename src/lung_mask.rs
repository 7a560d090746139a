//! Binary lung segmentation of a single item
//!
//! The mask is built in four passes over one volume:
//!
//! 1. threshold: voxels below `threshold_hu` are air or lung candidates
//! 2. drop candidates 6-connected to the in-plane border (air around the body)
//! 3. label the remaining 6-connected components and keep the large ones
//! 4. erode with a cubic structuring element of `erosion_radius`

use crate::config::LungMaskConfig;
use crate::error::{BatchError, Result};
use ndarray::{Array3, ArrayView3, ArrayViewMut3, Axis, Zip};
use std::collections::VecDeque;

const NEIGHBOURS: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

type Voxel = (usize, usize, usize);

fn step(dim: Voxel, at: Voxel, d: [isize; 3]) -> Option<Voxel> {
    let z = at.0.checked_add_signed(d[0])?;
    let y = at.1.checked_add_signed(d[1])?;
    let x = at.2.checked_add_signed(d[2])?;
    (z < dim.0 && y < dim.1 && x < dim.2).then_some((z, y, x))
}

/// Breadth-first fill from `seeds`, clearing every reached voxel of `region`
fn flood(region: &mut Array3<bool>, seeds: Vec<Voxel>) {
    let dim = region.dim();
    let mut queue = VecDeque::new();
    for seed in seeds {
        if region[seed] {
            region[seed] = false;
            queue.push_back(seed);
        }
    }
    while let Some(at) = queue.pop_front() {
        for d in NEIGHBOURS {
            if let Some(next) = step(dim, at, d) {
                if region[next] {
                    region[next] = false;
                    queue.push_back(next);
                }
            }
        }
    }
}

/// Clear candidates reachable from the y/x border faces
fn clear_border_connected(candidates: &mut Array3<bool>) {
    let (nz, ny, nx) = candidates.dim();
    let mut seeds = Vec::new();
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let on_border = y == 0 || x == 0 || y + 1 == ny || x + 1 == nx;
                if on_border && candidates[(z, y, x)] {
                    seeds.push((z, y, x));
                }
            }
        }
    }
    flood(candidates, seeds);
}

/// Label 6-connected components; returns labels (0 = background) and sizes
/// indexed by `label - 1`
fn label_components(mask: &Array3<bool>) -> (Array3<u32>, Vec<usize>) {
    let dim = mask.dim();
    let mut labels = Array3::<u32>::zeros(dim);
    let mut sizes = Vec::new();
    let mut queue = VecDeque::new();

    for (start, &set) in mask.indexed_iter() {
        if !set || labels[start] != 0 {
            continue;
        }
        let label = sizes.len() as u32 + 1;
        labels[start] = label;
        queue.push_back(start);
        let mut size = 0;
        while let Some(at) = queue.pop_front() {
            size += 1;
            for d in NEIGHBOURS {
                if let Some(next) = step(dim, at, d) {
                    if mask[next] && labels[next] == 0 {
                        labels[next] = label;
                        queue.push_back(next);
                    }
                }
            }
        }
        sizes.push(size);
    }
    (labels, sizes)
}

/// Morphological erosion with a (2r+1)^3 cube; voxels outside the volume
/// do not erode
fn erode(mask: Array3<bool>, radius: usize) -> Array3<bool> {
    if radius == 0 {
        return mask;
    }
    let mut current = mask;
    for axis in 0..3 {
        let mut next = Array3::from_elem(current.raw_dim(), false);
        Zip::from(current.lanes(Axis(axis)))
            .and(next.lanes_mut(Axis(axis)))
            .for_each(|src, mut dst| {
                let n = src.len();
                // holes[i] = unset voxels in src[..i]
                let mut holes = Vec::with_capacity(n + 1);
                holes.push(0usize);
                for &v in src.iter() {
                    holes.push(holes[holes.len() - 1] + usize::from(!v));
                }
                for (i, out) in dst.iter_mut().enumerate() {
                    let lo = i.saturating_sub(radius);
                    let hi = (i + radius + 1).min(n);
                    *out = holes[hi] == holes[lo];
                }
            });
        current = next;
    }
    current
}

/// Compute the lung mask of `input` as 0/1 values into `output`
pub fn lung_mask_item(
    input: ArrayView3<'_, f32>,
    mut output: ArrayViewMut3<'_, f32>,
    config: &LungMaskConfig,
) -> Result<()> {
    if output.dim() != input.dim() {
        return Err(BatchError::ShapeMismatch(format!(
            "mask destination is {:?}, item is {:?}",
            output.dim(),
            input.dim()
        )));
    }
    if input.is_empty() {
        return Ok(());
    }

    let mut candidates = input.mapv(|v| v < config.threshold_hu);
    clear_border_connected(&mut candidates);

    let (labels, sizes) = label_components(&candidates);
    let largest = sizes.iter().copied().max().unwrap_or(0);
    let min_size = (largest as f64 * config.min_component_fraction).ceil() as usize;
    let keep: Vec<bool> = sizes.iter().map(|&s| s >= min_size.max(1)).collect();
    let mask = labels.mapv(|label| label != 0 && keep[label as usize - 1]);

    let mask = erode(mask, config.erosion_radius);
    Zip::from(&mut output)
        .and(&mask)
        .for_each(|out, &set| *out = if set { 1.0 } else { 0.0 });
    Ok(())
}
