//! Integration tests for [`mpii_pose_train::pipeline`].
//!
//! Each test writes a few tiny shards to a temporary directory and runs the
//! full reader → shuffle pool → worker → batch path over them.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use mpii_pose_core::NUM_JOINTS;
use mpii_pose_train::config::PipelineConfig;
use mpii_pose_train::error::{PipelineError, RecordError};
use mpii_pose_train::pipeline::{Pipeline, PipelineMode};
use mpii_pose_train::record::{write_shards, ExampleRecord};
use ndarray::{Axis, Ix2};
use std::io::Cursor;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn png(dim: u32, shade: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(dim, dim, Rgb([shade, shade, shade]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// A record with no joints whose binary maps hold `tag` ones.
///
/// The count of ones survives flipping and zero-angle rotation, so it
/// identifies the example after training-mode augmentation.
fn tagged_record(dim: usize, tag: usize) -> ExampleRecord {
    let mut binary_maps = vec![0u8; dim * dim * NUM_JOINTS];
    binary_maps[..tag].fill(1);
    ExampleRecord {
        image: png(dim as u32, 128),
        binary_maps,
        joint_indices: Vec::new(),
        x_joints: Vec::new(),
        y_joints: Vec::new(),
        is_visible: Vec::new(),
        head_size: tag as f32,
    }
}

fn test_config(dim: usize, batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        image_dim: dim,
        heatmap_stddev_pixels: 1.0,
        max_rotation_angle: 0.0,
        batch_size,
        num_readers: 2,
        num_preprocess_threads: 2,
        input_queue_memory_factor: 0,
        num_epochs: Some(1),
        ..PipelineConfig::default()
    }
}

fn write(records: Vec<ExampleRecord>, per_shard: usize) -> (TempDir, Vec<PathBuf>) {
    let tmp = tempdir().expect("tempdir");
    let paths = write_shards(records, tmp.path(), "train", per_shard).expect("write shards");
    (tmp, paths)
}

fn tags(binary_maps: &ndarray::Array4<f32>) -> Vec<usize> {
    binary_maps
        .axis_iter(Axis(0))
        .map(|maps| maps.sum() as usize)
        .collect()
}

// ---------------------------------------------------------------------------
// Training mode
// ---------------------------------------------------------------------------

/// 32 examples, batch size 32, one epoch: one batch holding each example
/// exactly once, then end of stream.
#[test]
fn train_batch_contains_each_example_once() {
    let dim = 8;
    let (_tmp, shards) = write((1..=32).map(|t| tagged_record(dim, t)).collect(), 8);
    let cfg = test_config(dim, 32);

    let mut pipeline = Pipeline::start(shards, &cfg, PipelineMode::Train).expect("start");
    let batch = pipeline.next_batch().expect("batch").expect("one full batch");

    assert_eq!(batch.len(), 32);
    assert_eq!(batch.images.shape(), &[32, dim, dim, 3]);
    assert_eq!(batch.heatmaps.shape(), &[32, dim, dim, NUM_JOINTS]);
    assert_eq!(batch.weights.shape(), &[32, NUM_JOINTS]);
    assert!(batch.eval_labels.is_none(), "training batches carry no labels");

    let mut seen = tags(&batch.binary_maps);
    seen.sort_unstable();
    assert_eq!(seen, (1..=32).collect::<Vec<_>>());

    assert!(pipeline.next_batch().expect("end").is_none());
    pipeline.shutdown().expect("shutdown");
}

/// With an unbounded number of epochs, shutdown stops and joins every thread.
#[test]
fn shutdown_joins_threads() {
    let dim = 4;
    let (_tmp, shards) = write((1..=6).map(|t| tagged_record(dim, t)).collect(), 2);
    let cfg = PipelineConfig {
        num_epochs: None,
        ..test_config(dim, 4)
    };

    let mut pipeline = Pipeline::start(shards, &cfg, PipelineMode::Train).expect("start");
    for _ in 0..3 {
        assert!(pipeline.next_batch().expect("batch").is_some());
    }
    pipeline.shutdown().expect("shutdown");
    assert!(pipeline.next_batch().expect("after shutdown").is_none());
    pipeline.shutdown().expect("second shutdown is a no-op");
}

#[test]
fn dropping_pipeline_does_not_hang() {
    let dim = 4;
    let (_tmp, shards) = write((1..=6).map(|t| tagged_record(dim, t)).collect(), 2);
    let cfg = PipelineConfig {
        num_epochs: None,
        ..test_config(dim, 2)
    };
    let pipeline = Pipeline::start(shards, &cfg, PipelineMode::Train).expect("start");
    drop(pipeline);
}

/// Joint 9 at the grid point (row 20, column 10) survives preprocessing in
/// training mode: its weights stay one-hot and its heatmap peaks on that row,
/// in column 10 or, when flipped, column 21.
#[test]
fn train_heatmap_tracks_joint_through_flip() {
    let dim = 32;
    let step = 1.0 / (dim - 1) as f32;
    let mut record = tagged_record(dim, 0);
    record.joint_indices = vec![9];
    record.x_joints = vec![-0.5 + 10.0 * step];
    record.y_joints = vec![-0.5 + 20.0 * step];
    record.is_visible = vec![1];

    let (_tmp, shards) = write(vec![record; 4], 4);
    let mut pipeline =
        Pipeline::start(shards, &test_config(dim, 4), PipelineMode::Train).expect("start");
    let batch = pipeline.next_batch().expect("batch").expect("full batch");

    for b in 0..4 {
        let weights = batch.weights.index_axis(Axis(0), b);
        for j in 0..NUM_JOINTS {
            assert_eq!(weights[j], if j == 9 { 1.0 } else { 0.0 }, "joint {j}");
        }
        let (row, col) = argmax(batch.heatmaps.index_axis(Axis(0), b).index_axis(Axis(2), 9));
        assert_eq!(row, 20);
        assert!(col == 10 || col == 21, "peak column {col}");
    }
}

// ---------------------------------------------------------------------------
// Evaluation mode
// ---------------------------------------------------------------------------

/// Evaluation reads shards in order with no shuffling and keeps labels.
#[test]
fn eval_preserves_order_and_labels() {
    let dim = 8;
    let (_tmp, shards) = write((1..=10).map(|t| tagged_record(dim, t)).collect(), 3);
    let cfg = test_config(dim, 5);

    let mut pipeline = Pipeline::start(shards, &cfg, PipelineMode::Eval).expect("start");
    assert_eq!(pipeline.mode(), PipelineMode::Eval);

    let first = pipeline.next_batch().expect("batch").expect("first");
    let second = pipeline.next_batch().expect("batch").expect("second");
    assert!(pipeline.next_batch().expect("end").is_none());

    assert_eq!(tags(&first.binary_maps), vec![1, 2, 3, 4, 5]);
    assert_eq!(tags(&second.binary_maps), vec![6, 7, 8, 9, 10]);

    let labels = second.eval_labels.expect("eval labels");
    assert_eq!(labels.head_size.to_vec(), vec![6.0, 7.0, 8.0, 9.0, 10.0]);
    assert!(labels.joint_indices.iter().all(Vec::is_empty));

    // A flat 128 grey image normalises to just above zero, with no colour
    // distortion applied.
    let expected = (128.0 / 255.0 - 0.5) * 2.0;
    assert!(first.images.iter().all(|&v| (v - expected).abs() < 1e-5));
}

/// Joint 9 at (row 20, column 10) end to end in evaluation mode.
#[test]
fn eval_heatmap_peaks_at_joint() {
    let dim = 32;
    let step = 1.0 / (dim - 1) as f32;
    let mut record = tagged_record(dim, 0);
    record.joint_indices = vec![9];
    record.x_joints = vec![-0.5 + 10.0 * step];
    record.y_joints = vec![-0.5 + 20.0 * step];
    record.is_visible = vec![1];

    let (_tmp, shards) = write(vec![record], 1);
    let mut pipeline =
        Pipeline::start(shards, &test_config(dim, 1), PipelineMode::Eval).expect("start");
    let batch = pipeline.next_batch().expect("batch").expect("full batch");

    let visible = batch.is_visible_weights.index_axis(Axis(0), 0);
    assert_eq!(visible.sum(), 1.0);
    assert_eq!(visible[9], 1.0);
    let maps = batch.heatmaps.index_axis(Axis(0), 0);
    assert_eq!(argmax(maps.index_axis(Axis(2), 9)), (20, 10));

    let labels = batch.eval_labels.expect("labels");
    assert_eq!(labels.joint_indices, vec![vec![9]]);
}

/// Head top alone at crop-relative (0.5, 0.2), stored centred as
/// (0.0, -0.3): one-hot weights and a heatmap peak at the nearest pixel.
#[test]
fn head_top_only_example() {
    let dim = 33;
    let mut record = tagged_record(dim, 0);
    record.joint_indices = vec![9];
    record.x_joints = vec![0.5 - 0.5];
    record.y_joints = vec![0.2 - 0.5];
    record.is_visible = vec![1];

    let (_tmp, shards) = write(vec![record], 1);
    let mut pipeline =
        Pipeline::start(shards, &test_config(dim, 1), PipelineMode::Eval).expect("start");
    let batch = pipeline.next_batch().expect("batch").expect("full batch");

    let weights = batch.weights.index_axis(Axis(0), 0);
    for j in 0..NUM_JOINTS {
        assert_eq!(weights[j], if j == 9 { 1.0 } else { 0.0 }, "joint {j}");
    }
    let nearest_row = (0.2 * (dim - 1) as f32).round() as usize;
    let nearest_col = (0.5 * (dim - 1) as f32).round() as usize;
    let maps = batch.heatmaps.index_axis(Axis(0), 0);
    assert_eq!(argmax(maps.index_axis(Axis(2), 9)), (nearest_row, nearest_col));
}

/// Ten examples in batches of four: two batches, the remainder is dropped.
#[test]
fn trailing_partial_batch_is_dropped() {
    let dim = 4;
    let (_tmp, shards) = write((1..=10).map(|t| tagged_record(dim, t)).collect(), 4);
    let mut pipeline =
        Pipeline::start(shards, &test_config(dim, 4), PipelineMode::Eval).expect("start");
    assert!(pipeline.next_batch().expect("batch").is_some());
    assert!(pipeline.next_batch().expect("batch").is_some());
    assert!(pipeline.next_batch().expect("end").is_none());
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn invalid_config_is_rejected_at_start() {
    let cfg = PipelineConfig {
        batch_size: 0,
        ..PipelineConfig::default()
    };
    let err = Pipeline::start(Vec::new(), &cfg, PipelineMode::Train).err().expect("error");
    assert!(matches!(err, PipelineError::Config(_)), "got {err:?}");
}

/// Records built for a different image size surface as an error.
#[test]
fn binary_map_size_mismatch_surfaces() {
    let (_tmp, shards) = write(vec![tagged_record(8, 1)], 1);
    let err = Pipeline::start(shards, &test_config(4, 1), PipelineMode::Eval)
        .expect("start")
        .next_batch()
        .expect_err("size mismatch");
    assert!(
        matches!(err, PipelineError::Record(RecordError::BinaryMapSize { expected: 256, actual: 1024 })),
        "got {err:?}"
    );
}

#[test]
fn corrupt_shard_surfaces() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("train-00000.rec");
    std::fs::write(&path, b"not a shard").expect("write");
    let err = Pipeline::start(vec![path], &test_config(4, 1), PipelineMode::Eval)
        .expect("start")
        .next_batch()
        .expect_err("corrupt shard");
    assert!(
        matches!(err, PipelineError::Record(RecordError::InvalidFormat { .. })),
        "got {err:?}"
    );
}

fn argmax(plane: ndarray::ArrayView<'_, f32, Ix2>) -> (usize, usize) {
    let mut best = ((0, 0), f32::NEG_INFINITY);
    for ((r, c), &v) in plane.indexed_iter() {
        if v > best.1 {
            best = ((r, c), v);
        }
    }
    best.0
}
