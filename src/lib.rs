//! ct-batch - batch processing of volumetric CT scans
//!
//! Many scans of different depth are stacked along axis 0 in one contiguous
//! buffer, with per-item bounds, origin and spacing kept alongside. Every
//! operation fans out one task per scan and gathers the results back into a
//! consistent batch.
//!
//! # Features
//!
//! - Loading from stacked arrays, external decoders or compressed archives
//! - Spline resize and spacing unification with origin/spacing bookkeeping
//! - Lung segmentation, HU normalization and intensity projections
//! - Sliding-window patch extraction and exact reassembly
//! - Rayon CPU pool for array kernels, bounded async I/O for archives
//!
//! # Example
//!
//! ```rust,ignore
//! use ct_batch::{BatchIndex, CtBatch, ResizeConfig, create_io_manager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let index = BatchIndex::from_dir("/data/archive", false)?;
//! let mut batch = CtBatch::with_defaults(index)?;
//!
//! let io = create_io_manager("file:///data/archive")?;
//! batch.load_archive(io.as_ref(), &Default::default()).await?;
//! batch.resize(&ResizeConfig::new([128, 256, 256]))?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod batch;
pub mod compression;
pub mod config;
pub mod crop;
pub mod decoder;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod index;
pub mod interpolation;
pub mod io;
pub mod lung_mask;
pub mod patches;
pub mod rebuild;
pub mod store;
pub mod transforms;
pub mod types;
pub mod xip;

// Re-exports
pub use batch::{CtBatch, LoadSource};
pub use compression::{CompressionLevel, CompressionMethod, SampleCodec};
pub use config::{
    Action, ArchiveLoadConfig, AssembleConfig, BatchConfig, DumpConfig, LungMaskConfig,
    NormalizeHuConfig, Parallelism, PatchConfig, ResizeConfig, SegmentConfig, UnifySpacingConfig,
    XipConfig,
};
pub use crop::CropDescriptor;
pub use decoder::{DecodedVolume, ItemSource, VolumeDecoder};
pub use error::{BatchError, Result, TaskFailure};
pub use executor::Executor;
pub use geometry::ItemGeometry;
pub use index::{BatchIndex, ItemKey};
pub use io::{create_io_manager, IOManager, StorageBackend};
pub use patches::Patches;
pub use store::StackedVolumes;
pub use types::{
    Component, DumpFormat, LoadFormat, PaddingMode, Projection, Shape3, Vec3, XipReduction,
    AIR_HU, DARK_HU,
};

/// Version of the crate, recorded in every dumped item
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Magic number of `data.blk` files
pub const ARCHIVE_MAGIC: &[u8; 4] = b"CTB\0";
