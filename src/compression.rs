//! Codecs for archived voxel payloads
//!
//! Samples are byte-shuffled before compression: byte `k` of every f32 is
//! stored next to byte `k` of its neighbours. Sign and exponent bytes of CT
//! data barely change across a scan, so they end up in long compressible runs.

use crate::error::{BatchError, Result};
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::io::Read;

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Entropy coder applied after the shuffle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionMethod {
    None,
    Deflate,
    Zstd,
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::fast()
    }
}

/// How a `data.blk` payload was produced, stored next to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCodec {
    pub method: CompressionMethod,
    pub shuffle: bool,
}

impl SampleCodec {
    /// Shuffled samples under `method`
    pub fn new(method: CompressionMethod) -> Self {
        Self {
            method,
            shuffle: true,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Encode samples in the order given
    pub fn encode(&self, samples: &[f32], level: CompressionLevel) -> Result<Vec<u8>> {
        if self.shuffle {
            compress_bytes(self.method, &shuffle(samples), level)
        } else {
            compress_bytes(self.method, bytemuck::cast_slice(samples), level)
        }
    }

    /// Decode a payload that must hold exactly `count` samples
    pub fn decode(&self, payload: &[u8], count: usize) -> Result<Vec<f32>> {
        let expected = count * SAMPLE_BYTES;
        let raw = decompress_bytes(self.method, payload, expected)?;
        if raw.len() != expected {
            return Err(BatchError::InvalidArchive(format!(
                "payload holds {} bytes, {} samples need {}",
                raw.len(),
                count,
                expected
            )));
        }
        Ok(if self.shuffle {
            unshuffle(&raw)
        } else {
            raw.chunks_exact(SAMPLE_BYTES)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect()
        })
    }
}

/// Group byte `k` of every sample into the `k`-th plane
pub fn shuffle(samples: &[f32]) -> Vec<u8> {
    let bytes: &[u8] = bytemuck::cast_slice(samples);
    let count = samples.len();
    let mut planes = vec![0u8; bytes.len()];
    for (i, sample) in bytes.chunks_exact(SAMPLE_BYTES).enumerate() {
        for (k, &byte) in sample.iter().enumerate() {
            planes[k * count + i] = byte;
        }
    }
    planes
}

/// Inverse of [`shuffle`]; trailing bytes short of a full sample are ignored
pub fn unshuffle(planes: &[u8]) -> Vec<f32> {
    let count = planes.len() / SAMPLE_BYTES;
    (0..count)
        .map(|i| {
            f32::from_ne_bytes([
                planes[i],
                planes[count + i],
                planes[2 * count + i],
                planes[3 * count + i],
            ])
        })
        .collect()
}

fn compress_bytes(
    method: CompressionMethod,
    data: &[u8],
    level: CompressionLevel,
) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Deflate => {
            let mut encoder =
                DeflateEncoder::new(data, FlateCompression::new(level.value() as u32));
            let mut compressed = Vec::new();
            encoder
                .read_to_end(&mut compressed)
                .map_err(|e| BatchError::Compression(e.to_string()))?;
            Ok(compressed)
        }
        CompressionMethod::Zstd => zstd::encode_all(data, level.value() as i32)
            .map_err(|e| BatchError::Compression(e.to_string())),
    }
}

fn decompress_bytes(method: CompressionMethod, data: &[u8], expected: usize) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Deflate => {
            let mut decompressed = Vec::with_capacity(expected);
            DeflateDecoder::new(data)
                .read_to_end(&mut decompressed)
                .map_err(|e| BatchError::Decompression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd => {
            zstd::decode_all(data).map_err(|e| BatchError::Decompression(e.to_string()))
        }
    }
}
