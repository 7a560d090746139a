//! End-to-end tests of batch pipelines
//!
//! Scans are synthetic: a soft-tissue body inside air with two lung cavities,
//! which is enough to exercise every operation and its metadata bookkeeping.

use ct_batch::{
    create_io_manager, ArchiveLoadConfig, AssembleConfig, BatchConfig, BatchError, BatchIndex,
    Component, CompressionMethod, CtBatch, DecodedVolume, DumpConfig, ItemSource,
    LoadSource, NormalizeHuConfig, PaddingMode, PatchConfig, ResizeConfig, SegmentConfig,
    UnifySpacingConfig, DARK_HU,
};
use ndarray::{s, Array2, Array3};
use tempfile::TempDir;

/// Chest phantom of `depth` slices, 16 x 16 in-plane
fn phantom(depth: usize, seed: usize) -> Array3<f32> {
    let mut scan = Array3::from_elem((depth, 16, 16), 40.0f32);
    scan.slice_mut(s![.., ..2, ..]).fill(-1000.0);
    scan.slice_mut(s![.., 14.., ..]).fill(-1000.0);
    scan.slice_mut(s![.., .., ..2]).fill(-1000.0);
    scan.slice_mut(s![.., .., 14..]).fill(-1000.0);
    let end = depth - 1;
    scan.slice_mut(s![1..end, 4..12, 3..7]).fill(-850.0);
    scan.slice_mut(s![1..end, 4..12, 9..13]).fill(-850.0);
    // make items distinguishable
    scan[[0, 8, 8]] = 100.0 + seed as f32;
    scan
}

fn loaded_batch(depths: &[usize], config: BatchConfig) -> CtBatch {
    let ids: Vec<String> = (0..depths.len()).map(|i| format!("patient-{:02}", i)).collect();
    let mut batch = CtBatch::new(BatchIndex::new(ids).unwrap(), config).unwrap();
    let decoder = |item: &ItemSource| -> ct_batch::Result<DecodedVolume> {
        Ok(DecodedVolume {
            data: phantom(depths[item.position], item.position),
            origin: [-100.0 * item.position as f64, -80.0, -80.0],
            spacing: [2.5, 0.7, 0.7],
        })
    };
    batch.load_decoded(&decoder).unwrap();
    batch
}

#[test]
fn test_item_views_follow_bounds() {
    let batch = loaded_batch(&[6, 9, 7], BatchConfig::default());
    let bounds = batch.bounds().to_vec();
    assert_eq!(bounds, vec![0, 6, 15, 22]);
    for i in 0..batch.len() {
        let view = batch.get_item_view(i).unwrap();
        assert_eq!(view.dim().0, bounds[i + 1] - bounds[i]);
    }
    assert_eq!(batch.get_item_view("patient-01").unwrap()[[0, 8, 8]], 101.0);
    assert_eq!(batch.spacing()[[2, 0]], 2.5);
    assert_eq!(batch.origin()[[2, 0]], -200.0);
}

#[test]
fn test_resize_scenario() {
    let mut batch = CtBatch::with_defaults(BatchIndex::new(["a", "b"]).unwrap()).unwrap();
    let buffer = Array3::from_shape_fn((10, 8, 8), |(z, y, x)| (z + y + x) as f32);
    batch.load_ndarray(buffer, vec![0, 4, 10], None, None).unwrap();

    batch.resize(&ResizeConfig::new([5, 8, 8])).unwrap();

    assert_eq!(batch.bounds(), &[0, 5, 10]);
    assert_eq!(batch.data().dim(), (10, 8, 8));
    assert!((batch.spacing()[[0, 0]] - 4.0 / 5.0).abs() < 1e-12);
    assert!((batch.spacing()[[1, 0]] - 6.0 / 5.0).abs() < 1e-12);
    // interpolating spline keeps the end slices
    assert!((batch.data()[[0, 3, 3]] - 6.0).abs() < 1e-3);
    assert!((batch.data()[[9, 3, 3]] - 15.0).abs() < 1e-3);
}

#[test]
fn test_unify_spacing_without_overshoot_keeps_origin() {
    let mut batch = CtBatch::with_defaults(BatchIndex::new(["a"]).unwrap()).unwrap();
    let origin = Array2::from_shape_vec((1, 3), vec![-12.0, 3.0, 4.5]).unwrap();
    batch
        .load_ndarray(Array3::zeros((10, 10, 10)), vec![0, 10], Some(origin.clone()), None)
        .unwrap();

    let config = UnifySpacingConfig::new([2.0, 1.0, 1.0], [5, 10, 10]);
    batch.unify_spacing(&config).unwrap();

    assert_eq!(batch.origin(), &origin);
    assert_eq!(batch.spacing().row(0).to_vec(), vec![2.0, 1.0, 1.0]);
    assert_eq!(batch.bounds(), &[0, 5]);
}

#[test]
fn test_unify_spacing_crops_and_pads_to_one_shape() {
    let mut batch = loaded_batch(&[12, 4], BatchConfig::default());
    let config = UnifySpacingConfig::new([2.5, 0.7, 0.7], [8, 16, 16])
        .with_padding(PaddingMode::Constant(-1000.0));
    let unified = batch.unified_spacing(&config).unwrap();

    assert_eq!(unified.bounds(), &[0, 8, 16]);
    // 12 slices cropped by 2 at the front: origin moves two voxels deeper
    assert!((unified.origin()[[0, 0]] - (0.0 + 2.0 * 2.5)).abs() < 1e-9);
    // 4 slices padded by 2 at the front
    assert!((unified.origin()[[1, 0]] - (-100.0 - 2.0 * 2.5)).abs() < 1e-9);
    assert_eq!(unified.get_item_view(1usize).unwrap()[[0, 8, 8]], -1000.0);

    // the copy left the source alone
    assert_eq!(batch.bounds(), &[0, 12, 16]);
    batch.unify_spacing(&config).unwrap();
    assert_eq!(batch.volumes(), unified.volumes());
}

#[test]
fn test_flip_twice_is_identity() {
    let mut batch = loaded_batch(&[5, 8], BatchConfig::default().with_sequential());
    let before = batch.volumes().clone();
    batch.flip().unwrap();
    assert_eq!(batch.bounds(), before.bounds());
    assert_eq!(batch.get_item_view(1usize).unwrap()[[7, 8, 8]], 101.0);
    batch.flip().unwrap();
    assert_eq!(batch.volumes(), &before);
}

#[test]
fn test_segment_darkens_everything_outside_lungs() {
    let mut batch = loaded_batch(&[8, 8], BatchConfig::default());
    batch
        .segment(&SegmentConfig { erosion_radius: 0 })
        .unwrap();

    let item = batch.get_item_view(0usize).unwrap();
    assert_eq!(item[[3, 6, 4]], -850.0);
    assert_eq!(item[[3, 6, 8]], DARK_HU);
    assert_eq!(item[[3, 0, 0]], DARK_HU);
}

#[test]
fn test_lung_mask_is_a_new_batch() {
    let batch = loaded_batch(&[8], BatchConfig::default());
    let mask = batch
        .calc_lung_mask(&Default::default())
        .unwrap();
    assert_eq!(mask.bounds(), batch.bounds());
    assert!(mask.data().iter().all(|&v| v == 0.0 || v == 1.0));
    assert_eq!(batch.data()[[3, 6, 4]], -850.0);
}

#[test]
fn test_normalize_hu_saturates_instead_of_compounding() {
    let mut batch = loaded_batch(&[6], BatchConfig::default());
    batch.normalize_hu(&NormalizeHuConfig::default()).unwrap();
    let once = batch.data().clone();
    assert!(once.iter().all(|&v| (0.0..=255.0).contains(&v)));

    batch.normalize_hu(&NormalizeHuConfig::new(0.0, 255.0)).unwrap();
    for (a, b) in batch.data().iter().zip(once.iter()) {
        assert!((a - b).abs() < 1e-3);
    }
}

#[test]
fn test_patches_round_trip() {
    let mut batch = loaded_batch(&[6, 10], BatchConfig::default().with_workers(3));
    let original = batch.clone();

    let config = PatchConfig::new([4, 8, 8], [2, 8, 8]);
    let patches = batch.get_patches(&config).unwrap();
    // depth 6 -> 2 windows, depth 10 -> 4 windows; 2 x 2 in-plane
    assert_eq!(patches.counts(), &[8, 16]);
    assert_eq!(patches.patch_shape(), [4, 8, 8]);

    let target = [10, 16, 16];
    batch
        .load_from_patches(&patches, &AssembleConfig::new([2, 8, 8], target))
        .unwrap_err();

    // items of one shape are needed to load them back
    let mut uniform = loaded_batch(&[10, 10], BatchConfig::default());
    let reference = uniform.volumes().clone();
    let patches = uniform.get_patches(&config).unwrap();
    uniform
        .load_from_patches(&patches, &AssembleConfig::new([2, 8, 8], target))
        .unwrap();
    assert_eq!(uniform.volumes(), &reference);
    assert_eq!(original.bounds(), &[0, 6, 16]);
}

#[test]
fn test_failed_transform_leaves_store_byte_identical() {
    let mut batch = CtBatch::new(
        BatchIndex::new(["ok", "empty", "also-ok"]).unwrap(),
        BatchConfig::default().with_workers(2),
    )
    .unwrap();
    let buffer = Array3::from_shape_fn((7, 4, 4), |(z, y, x)| (z * 3 + y + x) as f32);
    batch.load_ndarray(buffer, vec![0, 3, 3, 7], None, None).unwrap();
    let before = batch.volumes().clone();
    let spacing_before = batch.spacing().clone();

    let err = batch.resize(&ResizeConfig::new([4, 4, 4])).unwrap_err();
    match &err {
        BatchError::ParallelTaskFailure { total, failures } => {
            assert_eq!(*total, 3);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].id, "empty");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(batch.volumes(), &before);
    assert_eq!(batch.spacing(), &spacing_before);
}

#[tokio::test]
async fn test_archive_round_trip_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("file://{}", temp_dir.path().display());
    let io = create_io_manager(&url).unwrap();

    let config = BatchConfig::default().with_compression(CompressionMethod::Deflate, 6);
    let batch = loaded_batch(&[5, 7], config);
    batch.dump(io.as_ref(), &DumpConfig::default()).await.unwrap();
    // dumping again replaces the item directories
    batch.dump(io.as_ref(), &DumpConfig::default()).await.unwrap();

    assert!(temp_dir.path().join("patient-00/data.blk").exists());
    assert!(temp_dir.path().join("patient-01/attrs.json").exists());
    let attrs: serde_json::Value = serde_json::from_slice(
        &io.read("patient-01/attrs.json").await.unwrap(),
    )
    .unwrap();
    assert_eq!(attrs["shape"], serde_json::json!([7, 16, 16]));

    let index = BatchIndex::from_dir(temp_dir.path(), false).unwrap();
    assert_eq!(index.ids(), batch.ids());
    let mut restored = CtBatch::with_defaults(index).unwrap();
    restored
        .load(LoadSource::Archive {
            io: io.as_ref(),
            config: ArchiveLoadConfig::default(),
        })
        .await
        .unwrap();

    assert_eq!(restored.volumes(), batch.volumes());
    assert_eq!(restored.origin(), batch.origin());
    assert_eq!(restored.spacing(), batch.spacing());
}

#[tokio::test]
async fn test_archive_load_without_metadata_components() {
    let io = create_io_manager("mem://scratch").unwrap();
    let batch = loaded_batch(&[3], BatchConfig::default());
    batch
        .dump(
            io.as_ref(),
            &DumpConfig::default().with_components(vec![Component::Data]),
        )
        .await
        .unwrap();

    let index = BatchIndex::from_io(io.as_ref(), "").await.unwrap();
    assert_eq!(index.ids(), &["patient-00"]);
    let mut restored = CtBatch::with_defaults(index).unwrap();
    let err = restored
        .load_archive(io.as_ref(), &ArchiveLoadConfig::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no origin.bin component"));

    let config = ArchiveLoadConfig::default().with_components(vec![Component::Data]);
    restored.load_archive(io.as_ref(), &config).await.unwrap();
    assert_eq!(restored.volumes(), batch.volumes());
    assert_eq!(restored.spacing().row(0).to_vec(), vec![1.0, 1.0, 1.0]);
}

#[test]
fn test_decoder_receives_entry_paths() {
    let temp_dir = TempDir::new().unwrap();
    for name in ["scan-b.mhd", "scan-a.mhd"] {
        std::fs::write(temp_dir.path().join(name), b"ObjectType = Image\n").unwrap();
    }

    let index = BatchIndex::from_dir(temp_dir.path(), true).unwrap();
    let mut batch = CtBatch::with_defaults(index).unwrap();
    let decoder = |item: &ItemSource| -> ct_batch::Result<DecodedVolume> {
        let path = item
            .path
            .as_ref()
            .ok_or_else(|| BatchError::Decoder("no path".to_string()))?;
        let header = std::fs::read_to_string(path)?;
        assert!(header.starts_with("ObjectType"));
        Ok(DecodedVolume::from_data(phantom(4, item.position)))
    };
    batch.load_decoded(&decoder).unwrap();
    assert_eq!(batch.ids(), &["scan-a", "scan-b"]);
    assert_eq!(batch.bounds(), &[0, 4, 8]);
}
