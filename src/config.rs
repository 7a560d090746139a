//! Batch-wide execution settings and per-operation configuration
//!
//! Every operation takes an explicit configuration struct. All of them
//! deserialize with unknown options rejected, so a misspelled key in an
//! orchestrator's JSON fails at construction instead of being ignored.

use crate::compression::{CompressionLevel, CompressionMethod, SampleCodec};
use crate::error::{BatchError, Result};
use crate::types::{Component, DumpFormat, PaddingMode, Projection, Shape3, Vec3, XipReduction};
use serde::{Deserialize, Serialize};

/// How CPU-bound per-item kernels are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    /// Run items one after another on the calling thread
    Sequential,
    /// Run items on a thread pool; `None` uses one worker per core
    Threads { workers: Option<usize> },
}

impl Default for Parallelism {
    fn default() -> Self {
        Parallelism::Threads { workers: None }
    }
}

/// Execution settings shared by every operation of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub parallelism: Parallelism,
    /// Upper bound on concurrently open item files during load/dump
    pub io_concurrency: usize,
    /// Codec used for `data.blk`
    pub compression: CompressionMethod,
    pub compression_level: u8,
    /// Byte-shuffle samples before compressing them
    pub shuffle: bool,
    /// Zero out `AIR_HU` padding in freshly decoded scans
    pub clear_air_hu: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallelism: Parallelism::default(),
            io_concurrency: 32,
            compression: CompressionMethod::Zstd,
            compression_level: 1,
            shuffle: true,
            clear_air_hu: false,
        }
    }
}

impl BatchConfig {
    /// Use a dedicated pool with `workers` threads
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.parallelism = Parallelism::Threads {
            workers: Some(workers),
        };
        self
    }

    /// Run every per-item task on the calling thread
    pub fn with_sequential(mut self) -> Self {
        self.parallelism = Parallelism::Sequential;
        self
    }

    pub fn with_io_concurrency(mut self, io_concurrency: usize) -> Self {
        self.io_concurrency = io_concurrency;
        self
    }

    pub fn with_compression(mut self, method: CompressionMethod, level: u8) -> Self {
        self.compression = method;
        self.compression_level = level;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_clear_air_hu(mut self, clear_air_hu: bool) -> Self {
        self.clear_air_hu = clear_air_hu;
        self
    }

    pub fn compression_level(&self) -> CompressionLevel {
        CompressionLevel::new(self.compression_level)
    }

    /// Codec recorded in every `data.blk` written with these settings
    pub fn codec(&self) -> SampleCodec {
        SampleCodec::new(self.compression).with_shuffle(self.shuffle)
    }

    pub fn validate(&self) -> Result<()> {
        if self.io_concurrency == 0 {
            return Err(BatchError::InvalidConfig(
                "io_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_shape(name: &str, shape: &Shape3) -> Result<()> {
    if shape.contains(&0) {
        return Err(BatchError::InvalidConfig(format!(
            "{} must be positive along every axis, got {:?}",
            name, shape
        )));
    }
    Ok(())
}

fn check_order(order: usize) -> Result<()> {
    if order > 5 {
        return Err(BatchError::InvalidConfig(format!(
            "spline order must be in 0..=5, got {}",
            order
        )));
    }
    Ok(())
}

/// Options of `resize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResizeConfig {
    /// Target item shape along (z, y, x)
    pub shape: Shape3,
    /// Spline order, 0 (nearest) to 5
    pub order: usize,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            shape: [128, 256, 256],
            order: 3,
        }
    }
}

impl ResizeConfig {
    pub fn new(shape: Shape3) -> Self {
        Self {
            shape,
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_shape("shape", &self.shape)?;
        check_order(self.order)
    }
}

/// Options of `unify_spacing`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnifySpacingConfig {
    /// Target voxel size along (z, y, x)
    pub spacing: Vec3,
    /// Batch-wide item shape after crop/pad
    pub shape: Shape3,
    pub order: usize,
    /// Fill strategy where the resampled item is smaller than `shape`
    pub padding: PaddingMode,
}

impl Default for UnifySpacingConfig {
    fn default() -> Self {
        Self {
            spacing: [1.7, 1.0, 1.0],
            shape: [400, 512, 512],
            order: 3,
            padding: PaddingMode::Reflect,
        }
    }
}

impl UnifySpacingConfig {
    pub fn new(spacing: Vec3, shape: Shape3) -> Self {
        Self {
            spacing,
            shape,
            ..Self::default()
        }
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn with_padding(mut self, padding: PaddingMode) -> Self {
        self.padding = padding;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_shape("shape", &self.shape)?;
        check_order(self.order)?;
        if self.spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(BatchError::InvalidConfig(format!(
                "spacing must be finite and positive, got {:?}",
                self.spacing
            )));
        }
        Ok(())
    }
}

/// Options of `calc_lung_mask`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LungMaskConfig {
    /// Radius of the erosion applied to the raw mask; larger gives smaller lungs
    pub erosion_radius: usize,
    /// Voxels below this density are lung/air candidates
    pub threshold_hu: f32,
    /// Components smaller than this share of the largest one are dropped
    pub min_component_fraction: f64,
}

impl Default for LungMaskConfig {
    fn default() -> Self {
        Self {
            erosion_radius: 7,
            threshold_hu: -320.0,
            min_component_fraction: 0.1,
        }
    }
}

impl LungMaskConfig {
    pub fn with_erosion_radius(mut self, erosion_radius: usize) -> Self {
        self.erosion_radius = erosion_radius;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_component_fraction) {
            return Err(BatchError::InvalidConfig(format!(
                "min_component_fraction must be in [0, 1], got {}",
                self.min_component_fraction
            )));
        }
        Ok(())
    }
}

/// Options of `segment`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentConfig {
    pub erosion_radius: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self { erosion_radius: 2 }
    }
}

impl SegmentConfig {
    pub fn lung_mask(&self) -> LungMaskConfig {
        LungMaskConfig::default().with_erosion_radius(self.erosion_radius)
    }
}

/// Options of `normalize_hu`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizeHuConfig {
    pub min_hu: f32,
    pub max_hu: f32,
}

impl Default for NormalizeHuConfig {
    fn default() -> Self {
        Self {
            min_hu: -1000.0,
            max_hu: 400.0,
        }
    }
}

impl NormalizeHuConfig {
    pub fn new(min_hu: f32, max_hu: f32) -> Self {
        Self { min_hu, max_hu }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_hu > self.min_hu) {
            return Err(BatchError::InvalidConfig(format!(
                "max_hu ({}) must exceed min_hu ({})",
                self.max_hu, self.min_hu
            )));
        }
        Ok(())
    }
}

/// Options of `make_xip`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XipConfig {
    /// Distance between the first slices of consecutive slabs
    pub step: usize,
    /// Number of slices reduced into one output slice
    pub depth: usize,
    pub func: XipReduction,
    pub projection: Projection,
}

impl Default for XipConfig {
    fn default() -> Self {
        Self {
            step: 2,
            depth: 10,
            func: XipReduction::Max,
            projection: Projection::Axial,
        }
    }
}

impl XipConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step == 0 || self.depth == 0 {
            return Err(BatchError::InvalidConfig(format!(
                "step ({}) and depth ({}) must be positive",
                self.step, self.depth
            )));
        }
        Ok(())
    }
}

/// Options of `dump`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DumpConfig {
    pub format: DumpFormat,
    pub components: Vec<Component>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            format: DumpFormat::Archive,
            components: Component::all(),
        }
    }
}

impl DumpConfig {
    pub fn with_components(mut self, components: Vec<Component>) -> Self {
        self.components = components;
        self
    }
}

/// Options of loading from an archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveLoadConfig {
    pub components: Vec<Component>,
}

impl Default for ArchiveLoadConfig {
    fn default() -> Self {
        Self {
            components: vec![Component::Data, Component::Origin, Component::Spacing],
        }
    }
}

impl ArchiveLoadConfig {
    pub fn with_components(mut self, components: Vec<Component>) -> Self {
        self.components = components;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.components.contains(&Component::Data) {
            return Err(BatchError::InvalidConfig(
                "loading an archive requires the data component".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options of `get_patches`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatchConfig {
    pub patch_shape: Shape3,
    pub stride: Shape3,
    pub padding: PaddingMode,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            patch_shape: [32, 64, 64],
            stride: [32, 64, 64],
            padding: PaddingMode::Edge,
        }
    }
}

impl PatchConfig {
    pub fn new(patch_shape: Shape3, stride: Shape3) -> Self {
        Self {
            patch_shape,
            stride,
            ..Self::default()
        }
    }

    pub fn with_padding(mut self, padding: PaddingMode) -> Self {
        self.padding = padding;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_shape("patch_shape", &self.patch_shape)?;
        check_shape("stride", &self.stride)
    }
}

/// Options of `load_from_patches`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssembleConfig {
    pub stride: Shape3,
    /// Item shape to reconstruct, the shape before patch extraction
    pub target_shape: Shape3,
}

impl AssembleConfig {
    pub fn new(stride: Shape3, target_shape: Shape3) -> Self {
        Self {
            stride,
            target_shape,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_shape("stride", &self.stride)?;
        check_shape("target_shape", &self.target_shape)
    }
}

/// In-place batch operations an orchestrator can drive from serialized config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Resize(ResizeConfig),
    UnifySpacing(UnifySpacingConfig),
    Flip,
    Segment(SegmentConfig),
    NormalizeHu(NormalizeHuConfig),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_options_rejected() {
        let json = r#"{"shape": [4, 8, 8], "oder": 2}"#;
        assert!(serde_json::from_str::<ResizeConfig>(json).is_err());

        let json = r#"{"action": "resize", "shape": [4, 8, 8], "n_workers": 20}"#;
        assert!(serde_json::from_str::<Action>(json).is_err());
    }

    #[test]
    fn test_defaults_fill_missing_options() {
        let config: ResizeConfig = serde_json::from_str(r#"{"shape": [4, 8, 8]}"#).unwrap();
        assert_eq!(config.shape, [4, 8, 8]);
        assert_eq!(config.order, 3);

        let action: Action =
            serde_json::from_str(r#"{"action": "normalize_hu", "min_hu": -1300}"#).unwrap();
        assert_eq!(
            action,
            Action::NormalizeHu(NormalizeHuConfig::new(-1300.0, 400.0))
        );
    }

    #[test]
    fn test_unsupported_dump_format_rejected() {
        let err = serde_json::from_str::<DumpConfig>(r#"{"format": "npz"}"#).unwrap_err();
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn test_validation() {
        assert!(ResizeConfig::new([4, 0, 8]).validate().is_err());
        assert!(ResizeConfig::new([4, 8, 8]).with_order(6).validate().is_err());
        assert!(NormalizeHuConfig::new(400.0, -1000.0).validate().is_err());
        assert!(PatchConfig::new([2, 2, 2], [0, 1, 1]).validate().is_err());
        assert!(ArchiveLoadConfig::default()
            .with_components(vec![Component::Origin])
            .validate()
            .is_err());
        assert!(BatchConfig::default().with_io_concurrency(0).validate().is_err());
    }

    #[test]
    fn test_batch_config_from_json() {
        let config: BatchConfig = serde_json::from_str(
            r#"{"parallelism": {"threads": {"workers": 4}}, "compression": "Deflate"}"#,
        )
        .unwrap();
        assert_eq!(
            config.parallelism,
            Parallelism::Threads { workers: Some(4) }
        );
        assert_eq!(config.compression, CompressionMethod::Deflate);
        assert_eq!(config.io_concurrency, 32);
        assert!(config.codec().shuffle);
        assert!(!config.clear_air_hu);
    }
}
