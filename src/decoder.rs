//! Seam for per-item file decoders
//!
//! Decoding scan formats (DICOM series, MetaImage) lives outside this crate.
//! A decoder turns one item source into voxels plus physical metadata and
//! the batch stacks the results.

use crate::error::Result;
use crate::types::Vec3;
use ndarray::Array3;
use std::path::PathBuf;

/// Item handed to a decoder
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSource {
    pub position: usize,
    pub id: String,
    /// Location resolved through the batch index, when it has a base path
    pub path: Option<PathBuf>,
}

/// Voxels of one item with origin and spacing along (z, y, x)
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedVolume {
    pub data: Array3<f32>,
    pub origin: Vec3,
    pub spacing: Vec3,
}

impl DecodedVolume {
    /// Volume with zero origin and unit spacing
    pub fn from_data(data: Array3<f32>) -> Self {
        Self {
            data,
            origin: [0.0; 3],
            spacing: [1.0; 3],
        }
    }
}

/// Decodes one item; called concurrently from the CPU pool
pub trait VolumeDecoder: Send + Sync {
    fn decode(&self, item: &ItemSource) -> Result<DecodedVolume>;
}

impl<F> VolumeDecoder for F
where
    F: Fn(&ItemSource) -> Result<DecodedVolume> + Send + Sync,
{
    fn decode(&self, item: &ItemSource) -> Result<DecodedVolume> {
        self(item)
    }
}
