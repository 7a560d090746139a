//! On-disk layout of dumped items
//!
//! Every item lives in its own directory named after its identifier:
//!
//! ```text
//! <id>/data.blk     magic + bincode(VolumeBlock)
//! <id>/origin.bin   bincode([f64; 3])
//! <id>/spacing.bin  bincode([f64; 3])
//! <id>/attrs.json   ItemAttrs
//! ```

use crate::compression::{CompressionLevel, SampleCodec};
use crate::error::{BatchError, Result};
use crate::types::{Component, Shape3, Vec3};
use crate::ARCHIVE_MAGIC;
use chrono::{DateTime, Utc};
use ndarray::{Array3, ArrayView3};
use serde::{Deserialize, Serialize};

/// Compressed volume as stored in `data.blk`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeBlock {
    pub codec: SampleCodec,
    pub shape: Shape3,
    /// Encoded f32 samples in row-major order
    pub payload: Vec<u8>,
}

impl VolumeBlock {
    /// Compress a volume view
    pub fn pack(
        volume: ArrayView3<'_, f32>,
        codec: SampleCodec,
        level: CompressionLevel,
    ) -> Result<Self> {
        let (z, y, x) = volume.dim();
        let samples: Vec<f32> = volume.iter().copied().collect();
        Ok(Self {
            codec,
            shape: [z, y, x],
            payload: codec.encode(&samples, level)?,
        })
    }

    /// Decompress back into an owned volume
    pub fn unpack(&self) -> Result<Array3<f32>> {
        let count = self.shape.iter().product::<usize>();
        let samples = self.codec.decode(&self.payload, count)?;
        Array3::from_shape_vec((self.shape[0], self.shape[1], self.shape[2]), samples)
            .map_err(|e| BatchError::InvalidArchive(e.to_string()))
    }

    /// Serialize with the leading magic bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = ARCHIVE_MAGIC.to_vec();
        bytes.extend(bincode::serialize(self)?);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = bytes.strip_prefix(ARCHIVE_MAGIC.as_slice()).ok_or_else(|| {
            BatchError::InvalidArchive("missing volume block magic".to_string())
        })?;
        Ok(bincode::deserialize(body)?)
    }
}

/// Human-readable summary written as `attrs.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAttrs {
    pub id: String,
    pub shape: Shape3,
    pub origin: Vec3,
    pub spacing: Vec3,
    pub dumped_at: DateTime<Utc>,
    pub version: String,
}

impl ItemAttrs {
    pub fn new(id: impl Into<String>, shape: Shape3, origin: Vec3, spacing: Vec3) -> Self {
        Self {
            id: id.into(),
            shape,
            origin,
            spacing,
            dumped_at: Utc::now(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Relative path of a component file for item `id`
pub fn component_path(id: &str, component: Component) -> String {
    format!("{}/{}", id, component.file_name())
}

pub fn encode_triple(triple: &Vec3) -> Result<Vec<u8>> {
    Ok(bincode::serialize(triple)?)
}

pub fn decode_triple(bytes: &[u8]) -> Result<Vec3> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionMethod;

    #[test]
    fn test_volume_block_round_trip() {
        let volume = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let codec = SampleCodec::new(CompressionMethod::Zstd);
        let block = VolumeBlock::pack(volume.view(), codec, CompressionLevel::fast()).unwrap();
        let bytes = block.to_bytes().unwrap();
        assert!(bytes.starts_with(ARCHIVE_MAGIC));

        let restored = VolumeBlock::from_bytes(&bytes).unwrap().unpack().unwrap();
        assert_eq!(restored, volume);
    }

    #[test]
    fn test_pack_non_contiguous_view() {
        let volume = Array3::from_shape_fn((4, 2, 2), |(z, _, _)| z as f32);
        let flipped = volume.slice(ndarray::s![..;-1, .., ..]);
        let codec = SampleCodec::new(CompressionMethod::None).with_shuffle(false);
        let block = VolumeBlock::pack(flipped, codec, CompressionLevel::fast()).unwrap();
        let restored = block.unpack().unwrap();
        assert_eq!(restored[[0, 0, 0]], 3.0);
        assert_eq!(restored[[3, 1, 1]], 0.0);
    }

    #[test]
    fn test_rejects_missing_magic() {
        assert!(matches!(
            VolumeBlock::from_bytes(b"PK\x03\x04"),
            Err(BatchError::InvalidArchive(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let block = VolumeBlock {
            codec: SampleCodec::new(CompressionMethod::None),
            shape: [2, 2, 2],
            payload: vec![0u8; 12],
        };
        assert!(matches!(block.unpack(), Err(BatchError::InvalidArchive(_))));
    }

    #[test]
    fn test_component_paths() {
        assert_eq!(component_path("p1", Component::Data), "p1/data.blk");
        let triple = [1.5, -2.0, 0.25];
        let decoded = decode_triple(&encode_triple(&triple).unwrap()).unwrap();
        assert_eq!(decoded, triple);
    }
}
