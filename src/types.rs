//! Core data types shared across batch operations

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Voxel extent of a volume along (z, y, x)
pub type Shape3 = [usize; 3];

/// Physical triple along (z, y, x), used for origin and spacing
pub type Vec3 = [f64; 3];

/// Radiodensity assigned to air by scanners that mark out-of-field voxels
pub const AIR_HU: f32 = -2000.0;

/// Radiodensity written outside the lung mask by `segment`
pub const DARK_HU: f32 = -2000.0;

/// Padding modes for crop/pad and patch extraction
///
/// Mirrors the usual array padding conventions: `Constant` fills with a fixed
/// value, `Edge` repeats the border voxel, `Reflect` mirrors without repeating
/// the border, `Symmetric` mirrors including the border, `Wrap` is periodic.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingMode {
    Constant(f32),
    #[default]
    Edge,
    Reflect,
    Symmetric,
    Wrap,
}

impl PaddingMode {
    /// Map a possibly out-of-range coordinate onto `0..len`.
    ///
    /// Returns `None` for `Constant` padding when `index` falls outside.
    pub fn source_index(&self, index: isize, len: usize) -> Option<usize> {
        let n = len as isize;
        if (0..n).contains(&index) {
            return Some(index as usize);
        }
        if len == 0 {
            return None;
        }
        let mapped = match self {
            PaddingMode::Constant(_) => return None,
            PaddingMode::Edge => index.clamp(0, n - 1),
            PaddingMode::Reflect => {
                if n == 1 {
                    0
                } else {
                    let period = 2 * n - 2;
                    let k = index.rem_euclid(period);
                    if k >= n {
                        period - k
                    } else {
                        k
                    }
                }
            }
            PaddingMode::Symmetric => {
                let period = 2 * n;
                let k = index.rem_euclid(period);
                if k >= n {
                    period - 1 - k
                } else {
                    k
                }
            }
            PaddingMode::Wrap => index.rem_euclid(n),
        };
        Some(mapped as usize)
    }

    /// Fill value used where `source_index` yields `None`
    pub fn fill_value(&self) -> f32 {
        match self {
            PaddingMode::Constant(value) => *value,
            _ => 0.0,
        }
    }
}

/// Axis along which intensity projections are taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Slabs of axial slices, axes stay (z, y, x)
    #[default]
    Axial,
    /// Slabs along y, axes become (y, z, x)
    Coronal,
    /// Slabs along x, axes become (x, z, y)
    Sagittal,
}

impl Projection {
    /// Axis permutation that brings the projection axis to the front
    pub fn permutation(&self) -> [usize; 3] {
        match self {
            Projection::Axial => [0, 1, 2],
            Projection::Coronal => [1, 0, 2],
            Projection::Sagittal => [2, 0, 1],
        }
    }
}

/// Reduction applied over each slab of an intensity projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XipReduction {
    #[default]
    Max,
    Min,
    Avg,
}

/// Per-item file written to or read from an archive directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Data,
    Origin,
    Spacing,
    Attrs,
}

impl Component {
    /// File name of the component inside an item directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Component::Data => "data.blk",
            Component::Origin => "origin.bin",
            Component::Spacing => "spacing.bin",
            Component::Attrs => "attrs.json",
        }
    }

    /// Every component, in dump order
    pub fn all() -> Vec<Component> {
        vec![
            Component::Data,
            Component::Origin,
            Component::Spacing,
            Component::Attrs,
        ]
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Kind of source handed to `CtBatch::load`, reported in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFormat {
    /// In-memory skyscraper plus bounds
    Ndarray,
    /// Per-item decoder collaborator (dicom, raw/mhd, ...)
    Decoded,
    /// Compressed per-item directories written by `dump`
    Archive,
}

impl fmt::Display for LoadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadFormat::Ndarray => "ndarray",
            LoadFormat::Decoded => "decoded",
            LoadFormat::Archive => "archive",
        };
        f.write_str(name)
    }
}

/// Target formats understood by `CtBatch::dump`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DumpFormat {
    #[default]
    Archive,
}

impl FromStr for DumpFormat {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "archive" | "blosc" => Ok(DumpFormat::Archive),
            other => Err(BatchError::UnsupportedFormat(format!(
                "dump to '{}' is not implemented",
                other
            ))),
        }
    }
}

impl TryFrom<String> for DumpFormat {
    type Error = BatchError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DumpFormat> for String {
    fn from(_: DumpFormat) -> Self {
        "archive".to_string()
    }
}

/// Floor division matching the sign convention of centered crop/pad offsets
pub(crate) fn floor_div(value: i64, divisor: i64) -> i64 {
    value.div_euclid(divisor)
}
