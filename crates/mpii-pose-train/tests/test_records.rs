//! Integration tests for [`mpii_pose_train::builder`] and
//! [`mpii_pose_train::record`].
//!
//! Records are built from generated images, written to shards in a temporary
//! directory and read back.

use approx::assert_abs_diff_eq;
use image::{Rgb, RgbImage};
use mpii_pose_core::{HeadRect, Joint, JointId, Person, NUM_JOINTS};
use mpii_pose_train::annotations::{parse_release, Split, StaticCatalog};
use mpii_pose_train::builder::{build_records, CropWindow, ExampleBuilder};
use mpii_pose_train::config::PipelineConfig;
use mpii_pose_train::error::RecordError;
use mpii_pose_train::record::{list_shards, write_shards, ExampleRecord, RecordReader};
use mpii_pose_train::targets::decode_binary_maps;
use rand::{rngs::StdRng, SeedableRng};
use tempfile::tempdir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn small_config() -> PipelineConfig {
    PipelineConfig {
        image_dim: 32,
        binary_map_radius: 1,
        crop_margin: 0.0,
        examples_per_shard: 2,
        ..PipelineConfig::default()
    }
}

/// A 100 × 100 image, red on the left half and blue on the right.
fn split_image() -> RgbImage {
    RgbImage::from_fn(100, 100, |x, _| {
        if x < 50 {
            Rgb([255, 0, 0])
        } else {
            Rgb([0, 0, 255])
        }
    })
}

/// Head rect from (40, 20) to (60, 40); joints span (20, 20) to (80, 80).
fn person() -> Person {
    Person::new(
        [
            (JointId::HeadTop, Joint::new(0.5, 0.2, true)),
            (JointId::RightAnkle, Joint::new(0.2, 0.8, true)),
            (JointId::LeftAnkle, Joint::new(0.8, 0.8, false)),
        ],
        HeadRect::new(40.0, 20.0, 60.0, 40.0).unwrap(),
    )
}

/// Centred grid coordinate of source pixel `p` in the 60-pixel crop at 20
/// resized to 32.
fn centred_in_crop(p: f32) -> f32 {
    ((p - 20.0 + 0.5) * 32.0 / 60.0 - 0.5) / 31.0 - 0.5
}

fn record(tag: u8) -> ExampleRecord {
    ExampleRecord {
        image: vec![tag],
        binary_maps: vec![tag; 4],
        joint_indices: vec![tag % 16],
        x_joints: vec![0.0],
        y_joints: vec![0.0],
        is_visible: vec![1],
        head_size: f32::from(tag),
    }
}

// ---------------------------------------------------------------------------
// Crop geometry
// ---------------------------------------------------------------------------

#[test]
fn crop_window_covers_joints_and_head() {
    let window = CropWindow::for_person(&person(), 100, 100, 0.0);
    assert_eq!(window, CropWindow { x0: 20, y0: 20, side: 60 });
    let (x, y) = window.to_centred(50.0, 20.0, 32);
    assert_abs_diff_eq!(x, centred_in_crop(50.0), epsilon = 1e-6);
    assert_abs_diff_eq!(y, centred_in_crop(20.0), epsilon = 1e-6);
    assert!(y < -0.5, "the top source row's centre lies just above grid row 0");
}

#[test]
fn crop_margin_grows_window() {
    let window = CropWindow::for_person(&person(), 100, 100, 0.5);
    assert_eq!(window.side, 120);
    assert_eq!((window.x0, window.y0), (-10, -10));
}

/// Regions outside the source image are filled with black.
#[test]
fn crop_outside_image_is_black() {
    let window = CropWindow { x0: -10, y0: 0, side: 20 };
    let crop = window.extract(&split_image());
    assert_eq!(crop.dimensions(), (20, 20));
    assert_eq!(crop.get_pixel(0, 5), &Rgb([0, 0, 0]));
    assert_eq!(crop.get_pixel(15, 5), &Rgb([255, 0, 0]));
}

// ---------------------------------------------------------------------------
// Example build
// ---------------------------------------------------------------------------

#[test]
fn built_record_is_consistent() {
    let cfg = small_config();
    let rec = ExampleBuilder::new(&cfg)
        .build_person(&split_image(), &person())
        .expect("build");

    assert_eq!(rec.joint_indices, vec![0, 5, 9]);
    assert_eq!(rec.is_visible, vec![1, 0, 1]);
    assert_abs_diff_eq!(rec.x_joints[2], centred_in_crop(50.0), epsilon = 1e-6);
    assert_abs_diff_eq!(rec.y_joints[2], centred_in_crop(20.0), epsilon = 1e-6);
    assert_abs_diff_eq!(rec.head_size, (800.0_f32).sqrt() / 60.0, epsilon = 1e-6);
    assert_eq!(rec.binary_maps.len(), cfg.binary_map_len());

    let image = rec.decode_image(cfg.image_dim).expect("decode");
    assert_eq!(image.shape(), &[32, 32, 3]);
    assert!(image[[16, 2, 0]] > 0.9, "left of the crop is red");
    assert!(image[[16, 29, 2]] > 0.9, "right of the crop is blue");

    let maps = decode_binary_maps(&rec.binary_maps, cfg.image_dim).expect("maps");
    assert_eq!(maps[[0, 16, JointId::HeadTop.index()]], 1.0);
    assert_eq!(
        maps.index_axis(ndarray::Axis(2), JointId::LeftAnkle.index()).sum(),
        0.0,
        "occluded joints get no binary map"
    );
}

#[test]
fn decode_rejects_wrong_image_size() {
    let cfg = small_config();
    let rec = ExampleBuilder::new(&cfg)
        .build_person(&split_image(), &person())
        .expect("build");
    let err = rec.decode_image(64).unwrap_err();
    assert!(matches!(err, RecordError::ImageSize { width: 32, height: 32, expected: 64 }));
}

// ---------------------------------------------------------------------------
// Shards
// ---------------------------------------------------------------------------

#[test]
fn shards_round_trip_through_files() {
    let tmp = tempdir().expect("tempdir");
    let records: Vec<_> = (0..5).map(record).collect();
    let paths = write_shards(records.clone(), tmp.path(), "train", 2).expect("write");
    assert_eq!(paths.len(), 3);
    assert_eq!(list_shards(tmp.path(), "train").expect("list"), paths);
    assert!(list_shards(tmp.path(), "test").expect("list").is_empty());

    let read: Vec<ExampleRecord> = paths
        .iter()
        .flat_map(|p| RecordReader::open(p).expect("open"))
        .collect::<Result<_, _>>()
        .expect("read");
    assert_eq!(read, records);
}

#[test]
fn build_records_writes_every_person() {
    let tmp = tempdir().expect("tempdir");
    let img_dir = tmp.path().join("images");
    std::fs::create_dir_all(&img_dir).expect("images dir");
    split_image().save(img_dir.join("a.png")).expect("save");
    split_image().save(img_dir.join("b.png")).expect("save");

    let release = serde_json::from_str(
        r#"{
            "annolist": [
                { "image": { "name": "a.png" }, "annorect": [
                    { "x1": 40, "y1": 20, "x2": 60, "y2": 40 },
                    { "x1": 10, "y1": 10, "x2": 30, "y2": 30 }
                ] },
                { "image": { "name": "b.png" }, "annorect": { "x1": 5, "y1": 5, "x2": 20, "y2": 20 } },
                { "image": { "name": "gone.png" }, "annorect": { "x1": 5, "y1": 5, "x2": 20, "y2": 20 } }
            ],
            "img_train": [1, 1, 1]
        }"#,
    )
    .expect("release");
    // gone.png is catalogued but absent on disk, so the build skips it.
    let catalog = StaticCatalog::new()
        .with_image("a.png", 100, 100)
        .with_image("b.png", 100, 100)
        .with_image("gone.png", 100, 100);
    let mut rng = StdRng::seed_from_u64(0);
    let (dataset, _) =
        parse_release(&release, &img_dir, &catalog, Split::Train, &mut rng).expect("parse");

    let cfg = small_config();
    let out = tmp.path().join("records");
    let summary = build_records(&dataset, &cfg, &out, "train").expect("build");
    assert_eq!(summary.images_skipped, 1);
    assert_eq!(summary.shards.len(), 2);

    let total: usize = summary
        .shards
        .iter()
        .map(|p| RecordReader::open(p).expect("open").count())
        .sum();
    assert_eq!(total, 3);
}

/// A binary-map buffer of the wrong length is an error, never truncated.
#[test]
fn binary_map_size_mismatch_is_fatal() {
    let cfg = small_config();
    let mut rec = ExampleBuilder::new(&cfg)
        .build_person(&split_image(), &person())
        .expect("build");
    rec.binary_maps.pop();
    let err = decode_binary_maps(&rec.binary_maps, cfg.image_dim).unwrap_err();
    assert!(matches!(
        err,
        RecordError::BinaryMapSize { expected, actual } if expected == 32 * 32 * NUM_JOINTS && actual == expected - 1
    ));
}
