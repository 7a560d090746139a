//! CT batch - main API for loading, transforming and dumping scans
//!
//! A batch pairs a [`BatchIndex`] with stacked voxel data and per-item
//! origin/spacing. Structural transforms come in two forms sharing one
//! routine: `resize` rewrites the batch, `resized` returns a new one.

use crate::archive::{component_path, decode_triple, encode_triple, ItemAttrs, VolumeBlock};
use crate::compression::{CompressionLevel, SampleCodec};
use crate::config::{
    Action, ArchiveLoadConfig, AssembleConfig, BatchConfig, DumpConfig, LungMaskConfig,
    NormalizeHuConfig, PatchConfig, ResizeConfig, SegmentConfig, UnifySpacingConfig, XipConfig,
};
use crate::crop::{crop_descriptor, CropDescriptor};
use crate::decoder::{DecodedVolume, ItemSource, VolumeDecoder};
use crate::error::{BatchError, Result};
use crate::executor::{collect_outcomes, Executor};
use crate::geometry::ItemGeometry;
use crate::index::{BatchIndex, ItemKey};
use crate::io::IOManager;
use crate::lung_mask::lung_mask_item;
use crate::patches::{assemble_item, extract_item_patches, Patches};
use crate::rebuild::{accumulate, rebuild_in_place, stack_results, ItemTask, RebuildTarget};
use crate::store::StackedVolumes;
use crate::transforms::{flip_item, resize_item, unify_item};
use crate::types::{Component, LoadFormat, Projection, Vec3, AIR_HU, DARK_HU};
use crate::xip::xip_item;
use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayViewMut3, Axis, Zip};
use std::sync::{Arc, OnceLock};
use tracing::instrument;

/// Where `CtBatch::load` takes its items from
pub enum LoadSource<'a> {
    /// Ready stacked data; missing metadata defaults to zero origin, unit spacing
    Ndarray {
        buffer: Array3<f32>,
        bounds: Vec<usize>,
        origin: Option<Array2<f64>>,
        spacing: Option<Array2<f64>>,
    },
    /// Items decoded one by one by an external decoder
    Decoded(&'a dyn VolumeDecoder),
    /// Item directories previously written by `CtBatch::dump`
    Archive {
        io: &'a dyn IOManager,
        config: ArchiveLoadConfig,
    },
}

impl LoadSource<'_> {
    pub fn format(&self) -> LoadFormat {
        match self {
            LoadSource::Ndarray { .. } => LoadFormat::Ndarray,
            LoadSource::Decoded(_) => LoadFormat::Decoded,
            LoadSource::Archive { .. } => LoadFormat::Archive,
        }
    }
}

/// Batch of CT scans stacked along axis 0
#[derive(Debug, Clone)]
pub struct CtBatch {
    index: Arc<BatchIndex>,
    volumes: StackedVolumes,
    geometry: ItemGeometry,
    crop_cache: OnceLock<Vec<CropDescriptor>>,
    executor: Executor,
    config: BatchConfig,
}

impl CtBatch {
    /// Create an unloaded batch: every item is empty, origin zero, spacing one
    pub fn new(index: BatchIndex, config: BatchConfig) -> Result<Self> {
        config.validate()?;
        let executor = Executor::new(&config)?;
        let items = index.len();
        Ok(Self {
            index: Arc::new(index),
            volumes: StackedVolumes::empty(items),
            geometry: ItemGeometry::identity(items),
            crop_cache: OnceLock::new(),
            executor,
            config,
        })
    }

    pub fn with_defaults(index: BatchIndex) -> Result<Self> {
        Self::new(index, BatchConfig::default())
    }

    /// Batch over the same items and settings holding other content
    fn derive(&self, volumes: StackedVolumes, geometry: ItemGeometry) -> Self {
        Self {
            index: Arc::clone(&self.index),
            volumes,
            geometry,
            crop_cache: OnceLock::new(),
            executor: self.executor.clone(),
            config: self.config.clone(),
        }
    }

    pub fn index(&self) -> &BatchIndex {
        &self.index
    }

    pub fn ids(&self) -> &[String] {
        self.index.ids()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// The stacked buffer of every item
    pub fn data(&self) -> &Array3<f32> {
        self.volumes.buffer()
    }

    pub fn bounds(&self) -> &[usize] {
        self.volumes.bounds()
    }

    pub fn volumes(&self) -> &StackedVolumes {
        &self.volumes
    }

    pub fn geometry(&self) -> &ItemGeometry {
        &self.geometry
    }

    /// World coordinates of voxel (0, 0, 0) of every item, (N, 3)
    pub fn origin(&self) -> &Array2<f64> {
        self.geometry.origin()
    }

    /// Voxel size of every item along (z, y, x), (N, 3)
    pub fn spacing(&self) -> &Array2<f64> {
        self.geometry.spacing()
    }

    pub fn shape_per_item(&self) -> Array2<usize> {
        self.volumes.shape_per_item()
    }

    /// View of one item, by position or identifier
    pub fn get_item_view<'k>(&self, key: impl Into<ItemKey<'k>>) -> Result<ArrayView3<'_, f32>> {
        let pos = self.index.resolve(key.into())?;
        Ok(self.volumes.item(pos))
    }

    /// Mutable view of one item; cached crop boxes are dropped
    pub fn get_item_view_mut<'k>(
        &mut self,
        key: impl Into<ItemKey<'k>>,
    ) -> Result<ArrayViewMut3<'_, f32>> {
        let pos = self.index.resolve(key.into())?;
        self.crop_cache.take();
        Ok(self.volumes.item_mut(pos))
    }

    /// Axial slice at `floor(fraction * depth)` of one item
    pub fn get_axial_slice<'k>(
        &self,
        key: impl Into<ItemKey<'k>>,
        fraction: f64,
    ) -> Result<ArrayView2<'_, f32>> {
        if !(0.0..1.0).contains(&fraction) {
            return Err(BatchError::InvalidConfig(format!(
                "slice fraction must be in [0, 1), got {}",
                fraction
            )));
        }
        let item = self.get_item_view(key)?;
        let depth = item.len_of(Axis(0));
        if depth == 0 {
            return Err(BatchError::ShapeMismatch(
                "item holds no slices".to_string(),
            ));
        }
        let slice = ((fraction * depth as f64).floor() as usize).min(depth - 1);
        Ok(item.index_axis_move(Axis(0), slice))
    }

    /// Swap data and metadata together.
    ///
    /// Both must describe exactly the items of the index.
    pub fn replace(&mut self, volumes: StackedVolumes, geometry: ItemGeometry) -> Result<()> {
        if volumes.len() != self.len() || geometry.len() != self.len() {
            return Err(BatchError::ShapeMismatch(format!(
                "batch indexes {} items, got {} volumes and {} metadata rows",
                self.len(),
                volumes.len(),
                geometry.len()
            )));
        }
        self.volumes = volumes;
        self.geometry = geometry;
        self.crop_cache = OnceLock::new();
        Ok(())
    }

    /// Fill the batch from `source`
    #[instrument(skip_all, fields(format = %source.format(), items = self.len()))]
    pub async fn load(&mut self, source: LoadSource<'_>) -> Result<&mut Self> {
        match source {
            LoadSource::Ndarray {
                buffer,
                bounds,
                origin,
                spacing,
            } => self.load_ndarray(buffer, bounds, origin, spacing),
            LoadSource::Decoded(decoder) => self.load_decoded(decoder),
            LoadSource::Archive { io, config } => self.load_archive(io, &config).await,
        }
    }

    /// Take ownership of already stacked data
    pub fn load_ndarray(
        &mut self,
        buffer: Array3<f32>,
        bounds: Vec<usize>,
        origin: Option<Array2<f64>>,
        spacing: Option<Array2<f64>>,
    ) -> Result<&mut Self> {
        let volumes = StackedVolumes::new(buffer, bounds)?;
        let identity = ItemGeometry::identity(volumes.len());
        let geometry = ItemGeometry::new(
            origin.unwrap_or_else(|| identity.origin().clone()),
            spacing.unwrap_or_else(|| identity.spacing().clone()),
        )?;
        self.replace(volumes, geometry)?;
        Ok(self)
    }

    /// Decode every item on the CPU pool and stack the results
    pub fn load_decoded(&mut self, decoder: &dyn VolumeDecoder) -> Result<&mut Self> {
        let sources: Vec<ItemSource> = self
            .ids()
            .iter()
            .enumerate()
            .map(|(position, id)| ItemSource {
                position,
                id: id.clone(),
                path: self.index.full_path(id),
            })
            .collect();
        let clear_air = self.config.clear_air_hu;
        let outcomes = self.executor.map_cpu(sources, |source| {
            let mut item = decoder.decode(&source)?;
            if clear_air {
                item.data.mapv_inplace(|v| if v == AIR_HU { 0.0 } else { v });
            }
            Ok(item)
        });
        let decoded = collect_outcomes(self.ids(), outcomes)?;
        self.install_decoded(decoded)?;
        tracing::info!(
            items = self.len(),
            slices = self.volumes.buffer().len_of(Axis(0)),
            "decoded items"
        );
        Ok(self)
    }

    /// Read item directories written by `dump`, keeping at most
    /// `io_concurrency` items in flight
    pub async fn load_archive(
        &mut self,
        io: &dyn IOManager,
        config: &ArchiveLoadConfig,
    ) -> Result<&mut Self> {
        config.validate()?;
        let with_origin = config.components.contains(&Component::Origin);
        let with_spacing = config.components.contains(&Component::Spacing);

        let ids = self.ids().to_vec();
        let outcomes = self
            .executor
            .map_io(ids, move |id| async move {
                let bytes = read_component(io, &id, Component::Data).await?;
                let data = VolumeBlock::from_bytes(&bytes)?.unpack()?;
                let mut item = DecodedVolume::from_data(data);
                if with_origin {
                    item.origin = decode_triple(&read_component(io, &id, Component::Origin).await?)?;
                }
                if with_spacing {
                    item.spacing =
                        decode_triple(&read_component(io, &id, Component::Spacing).await?)?;
                }
                Ok(item)
            })
            .await;
        let loaded = collect_outcomes(self.ids(), outcomes)?;
        self.install_decoded(loaded)?;
        tracing::info!(items = self.len(), backend = ?io.backend(), "loaded archive");
        Ok(self)
    }

    fn install_decoded(&mut self, items: Vec<DecodedVolume>) -> Result<()> {
        let (origin, spacing): (Vec<Vec3>, Vec<Vec3>) =
            items.iter().map(|item| (item.origin, item.spacing)).unzip();
        let volumes = stack_results(items.into_iter().map(|item| item.data).collect())?;
        let geometry = ItemGeometry::from_triples(&origin, &spacing)?;
        self.replace(volumes, geometry)
    }

    /// Write one directory per item, replacing any existing one
    #[instrument(skip_all, fields(items = self.len(), format = ?config.format))]
    pub async fn dump(&self, io: &dyn IOManager, config: &DumpConfig) -> Result<()> {
        let codec = self.config.codec();
        let level = self.config.compression_level();
        let components = config.components.as_slice();

        let positions: Vec<usize> = (0..self.len()).collect();
        let outcomes = self
            .executor
            .map_io(positions, move |pos| {
                self.dump_item(io, pos, components, codec, level)
            })
            .await;
        collect_outcomes(self.ids(), outcomes)?;
        tracing::info!(items = self.len(), backend = ?io.backend(), "dumped batch");
        Ok(())
    }

    async fn dump_item(
        &self,
        io: &dyn IOManager,
        pos: usize,
        components: &[Component],
        codec: SampleCodec,
        level: CompressionLevel,
    ) -> Result<()> {
        let id = self.ids()[pos].as_str();
        io.delete_dir(id).await?;
        for &component in components {
            let bytes = match component {
                Component::Data => {
                    VolumeBlock::pack(self.volumes.item(pos), codec, level)?.to_bytes()?
                }
                Component::Origin => encode_triple(&self.geometry.item_origin(pos))?,
                Component::Spacing => encode_triple(&self.geometry.item_spacing(pos))?,
                Component::Attrs => serde_json::to_vec_pretty(&ItemAttrs::new(
                    id,
                    self.volumes.item_shape(pos),
                    self.geometry.item_origin(pos),
                    self.geometry.item_spacing(pos),
                ))?,
            };
            io.write(&component_path(id, component), &bytes).await?;
        }
        Ok(())
    }

    fn rebuild<F>(&self, target: RebuildTarget, task: F) -> Result<StackedVolumes>
    where
        F: Fn(ItemTask<'_>) -> Result<()> + Sync,
    {
        rebuild_in_place(&self.executor, &self.volumes, self.ids(), target, task)
    }

    fn resize_parts(&self, config: &ResizeConfig) -> Result<(StackedVolumes, ItemGeometry)> {
        config.validate()?;
        let volumes = self.rebuild(RebuildTarget::Uniform(config.shape), |task| {
            resize_item(task.input, task.output, config.order)
        })?;
        let geometry = self
            .geometry
            .resized(&self.volumes.shape_per_item(), config.shape);
        Ok((volumes, geometry))
    }

    /// Resize every item to one shape with spline interpolation
    #[instrument(skip_all, fields(items = self.len(), shape = ?config.shape, order = config.order))]
    pub fn resize(&mut self, config: &ResizeConfig) -> Result<&mut Self> {
        let (volumes, geometry) = self.resize_parts(config)?;
        self.replace(volumes, geometry)?;
        Ok(self)
    }

    /// Resized copy of the batch; `self` is left as is
    pub fn resized(&self, config: &ResizeConfig) -> Result<Self> {
        let (volumes, geometry) = self.resize_parts(config)?;
        Ok(self.derive(volumes, geometry))
    }

    fn unify_parts(&self, config: &UnifySpacingConfig) -> Result<(StackedVolumes, ItemGeometry)> {
        config.validate()?;
        let plan = self.geometry.plan_unify_spacing(
            &self.volumes.shape_per_item(),
            config.spacing,
            config.shape,
        );
        let volumes = self.rebuild(RebuildTarget::Uniform(config.shape), |task| {
            unify_item(
                task.input,
                task.output,
                plan.resized_shapes[task.position],
                plan.offsets[task.position],
                config.order,
                config.padding,
            )
        })?;
        Ok((volumes, plan.geometry))
    }

    /// Resample every item to `config.spacing`, then center-crop or pad to
    /// `config.shape`
    #[instrument(skip_all, fields(items = self.len(), spacing = ?config.spacing, shape = ?config.shape))]
    pub fn unify_spacing(&mut self, config: &UnifySpacingConfig) -> Result<&mut Self> {
        let (volumes, geometry) = self.unify_parts(config)?;
        self.replace(volumes, geometry)?;
        Ok(self)
    }

    pub fn unified_spacing(&self, config: &UnifySpacingConfig) -> Result<Self> {
        let (volumes, geometry) = self.unify_parts(config)?;
        Ok(self.derive(volumes, geometry))
    }

    fn flip_parts(&self) -> Result<StackedVolumes> {
        self.rebuild(RebuildTarget::SameShape, |task| {
            flip_item(task.input, task.output)
        })
    }

    /// Reverse slice order inside every item; item order is kept
    #[instrument(skip_all, fields(items = self.len()))]
    pub fn flip(&mut self) -> Result<&mut Self> {
        let volumes = self.flip_parts()?;
        let geometry = self.geometry.clone();
        self.replace(volumes, geometry)?;
        Ok(self)
    }

    pub fn flipped(&self) -> Result<Self> {
        let volumes = self.flip_parts()?;
        Ok(self.derive(volumes, self.geometry.clone()))
    }

    /// New batch holding the 0/1 lung mask of every item
    #[instrument(skip_all, fields(items = self.len(), erosion_radius = config.erosion_radius))]
    pub fn calc_lung_mask(&self, config: &LungMaskConfig) -> Result<Self> {
        config.validate()?;
        let volumes = self.rebuild(RebuildTarget::SameShape, |task| {
            lung_mask_item(task.input, task.output, config)
        })?;
        Ok(self.derive(volumes, self.geometry.clone()))
    }

    /// Set every voxel outside the lungs to `DARK_HU`
    #[instrument(skip_all, fields(items = self.len(), erosion_radius = config.erosion_radius))]
    pub fn segment(&mut self, config: &SegmentConfig) -> Result<&mut Self> {
        let mask = self.calc_lung_mask(&config.lung_mask())?;
        Zip::from(self.volumes.buffer_mut())
            .and(mask.data())
            .par_for_each(|value, &keep| *value = *value * keep + (1.0 - keep) * DARK_HU);
        self.crop_cache = OnceLock::new();
        Ok(self)
    }

    /// Clip densities to `[min_hu, max_hu]` and scale them to `[0, 255]`
    #[instrument(skip_all, fields(items = self.len(), min_hu = config.min_hu, max_hu = config.max_hu))]
    pub fn normalize_hu(&mut self, config: &NormalizeHuConfig) -> Result<&mut Self> {
        config.validate()?;
        let min_hu = config.min_hu;
        let range = config.max_hu - config.min_hu;
        self.volumes
            .buffer_mut()
            .par_mapv_inplace(|v| ((v - min_hu) / range).clamp(0.0, 1.0) * 255.0);
        self.crop_cache = OnceLock::new();
        Ok(self)
    }

    /// New batch of sliding-slab intensity projections.
    ///
    /// Item `i` of the result holds one slice per slab of item `i`.
    #[instrument(skip_all, fields(items = self.len(), projection = ?config.projection))]
    pub fn make_xip(&self, config: &XipConfig) -> Result<Self> {
        config.validate()?;
        if config.projection != Projection::Axial {
            let shapes = self.volumes.shape_per_item();
            let depths = shapes.column(0);
            if let Some(first) = depths.first() {
                if let Some(other) = depths.iter().find(|d| *d != first) {
                    return Err(BatchError::ShapeMismatch(format!(
                        "{:?} projections need equal item depths, got {} and {}",
                        config.projection, first, other
                    )));
                }
            }
        }

        let volumes = accumulate(&self.executor, self.ids(), |pos| {
            Ok(xip_item(self.volumes.item(pos), config))
        })?;
        let geometry = self
            .geometry
            .projected(config.projection.permutation(), config.step);
        Ok(self.derive(volumes, geometry))
    }

    /// Cut every item into windows of `config.patch_shape`
    #[instrument(skip_all, fields(items = self.len(), patch_shape = ?config.patch_shape, stride = ?config.stride))]
    pub fn get_patches(&self, config: &PatchConfig) -> Result<Patches> {
        config.validate()?;
        let positions: Vec<usize> = (0..self.len()).collect();
        let outcomes = self.executor.map_cpu(positions, |pos| {
            Ok(extract_item_patches(self.volumes.item(pos), config))
        });
        let per_item = collect_outcomes(self.ids(), outcomes)?;

        let counts: Vec<usize> = per_item.iter().map(|p| p.len_of(Axis(0))).collect();
        let data = if per_item.is_empty() {
            let [z, y, x] = config.patch_shape;
            Array4::zeros((0, z, y, x))
        } else {
            let views: Vec<_> = per_item.iter().map(|p| p.view()).collect();
            ndarray::concatenate(Axis(0), &views)
                .map_err(|e| BatchError::ShapeMismatch(e.to_string()))?
        };
        tracing::debug!(patches = data.len_of(Axis(0)), "extracted patches");
        Patches::new(data, counts)
    }

    /// Replace every item by the average of its patches, cropped to
    /// `config.target_shape`; metadata is kept
    #[instrument(skip_all, fields(items = self.len(), target_shape = ?config.target_shape))]
    pub fn load_from_patches(
        &mut self,
        patches: &Patches,
        config: &AssembleConfig,
    ) -> Result<&mut Self> {
        config.validate()?;
        if patches.items() != self.len() {
            return Err(BatchError::ShapeMismatch(format!(
                "patches come from {} items, batch holds {}",
                patches.items(),
                self.len()
            )));
        }
        let volumes = self.rebuild(RebuildTarget::Uniform(config.target_shape), |task| {
            assemble_item(patches.item(task.position), config, task.output)
        })?;
        let geometry = self.geometry.clone();
        self.replace(volumes, geometry)?;
        Ok(self)
    }

    /// Content boxes of every item, computed on first use
    pub fn crop_descriptors(&self) -> &[CropDescriptor] {
        self.crop_cache.get_or_init(|| {
            (0..self.volumes.len())
                .map(|pos| crop_descriptor(self.volumes.item(pos)))
                .collect()
        })
    }

    /// Centers of the content boxes, (N, 3)
    pub fn crop_centers(&self) -> Array2<usize> {
        to_rows(self.crop_descriptors().iter().map(|c| c.center))
    }

    /// Half-sizes of the content boxes, (N, 3)
    pub fn crop_sizes(&self) -> Array2<usize> {
        to_rows(self.crop_descriptors().iter().map(|c| c.half_size))
    }

    /// Run an in-place operation described by `action`
    pub fn apply(&mut self, action: &Action) -> Result<&mut Self> {
        match action {
            Action::Resize(config) => self.resize(config),
            Action::UnifySpacing(config) => self.unify_spacing(config),
            Action::Flip => self.flip(),
            Action::Segment(config) => self.segment(config),
            Action::NormalizeHu(config) => self.normalize_hu(config),
        }
    }
}

async fn read_component(
    io: &dyn IOManager,
    id: &str,
    component: Component,
) -> Result<bytes::Bytes> {
    let path = component_path(id, component);
    if !io.exists(&path).await? {
        return Err(BatchError::InvalidArchive(format!(
            "item '{}' has no {} component",
            id, component
        )));
    }
    io.read(&path).await
}

fn to_rows(rows: impl ExactSizeIterator<Item = [usize; 3]>) -> Array2<usize> {
    let mut array = Array2::zeros((rows.len(), 3));
    for (mut dst, row) in array.rows_mut().into_iter().zip(rows) {
        for axis in 0..3 {
            dst[axis] = row[axis];
        }
    }
    array
}
