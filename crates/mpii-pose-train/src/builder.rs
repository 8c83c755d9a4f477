//! Dataset build: turn annotated images into record shards.
//!
//! Each [`Person`] becomes one [`ExampleRecord`]:
//!
//! 1. Bounding box = union of the present joints and the head rectangle,
//!    grown by `crop_margin` of its longer side on every side.
//! 2. Square crop of the box's longer side, centred on the box. Regions
//!    outside the source image are black.
//! 3. Resize to `D × D` with a triangle filter.
//! 4. Joints re-expressed in the centred frame of the `D × D` grid, where
//!    output column `c` sits at `-0.5 + c / (D - 1)`.
//! 5. Binary maps rasterized from the visible joints.
//! 6. Head size = head-rectangle diagonal over the crop side.
//! 7. Image encoded as PNG.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbImage};
use mpii_pose_core::Person;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::annotations::PoseDataset;
use crate::config::PipelineConfig;
use crate::dense::SparseJoints;
use crate::error::{PipelineResult, RecordError};
use crate::record::{write_shards, ExampleRecord};
use crate::targets::rasterize_binary_maps;

// ---------------------------------------------------------------------------
// CropWindow
// ---------------------------------------------------------------------------

/// Square window of the source image that becomes one example.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropWindow {
    /// Left edge in source pixels (may be negative).
    pub x0: i64,
    /// Top edge in source pixels (may be negative).
    pub y0: i64,
    /// Side length in source pixels.
    pub side: u32,
}

impl CropWindow {
    /// Compute the crop window for `person` in an image of the given size.
    pub fn for_person(person: &Person, width: u32, height: u32, margin: f32) -> Self {
        let (hx0, hy0, hx1, hy1) = person.head_rect().bounds();
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (hx0, hy0, hx1, hy1);
        for (_, joint) in person.present_joints() {
            let px = joint.x * width as f32;
            let py = joint.y * height as f32;
            min_x = min_x.min(px);
            min_y = min_y.min(py);
            max_x = max_x.max(px);
            max_y = max_y.max(py);
        }

        let longer = (max_x - min_x).max(max_y - min_y);
        let side = (longer * (1.0 + 2.0 * margin)).ceil().max(1.0);
        let cx = (min_x + max_x) / 2.0;
        let cy = (min_y + max_y) / 2.0;
        CropWindow {
            x0: (cx - side / 2.0).floor() as i64,
            y0: (cy - side / 2.0).floor() as i64,
            side: side as u32,
        }
    }

    /// Map a source pixel to the centred frame of the crop resized to
    /// `dim × dim`.
    ///
    /// The resize maps pixel centres to pixel centres, so source position `p`
    /// lands at output pixel `(p - x0 + 0.5) * dim / side - 0.5`; that is
    /// then placed on the `[-0.5, 0.5]` grid shared with the target maps.
    /// `dim` must be at least 2.
    pub fn to_centred(&self, px: f32, py: f32, dim: usize) -> (f32, f32) {
        let scale = dim as f32 / self.side as f32;
        let last = (dim - 1) as f32;
        let centred = |p: f32, origin: i64| ((p - origin as f32 + 0.5) * scale - 0.5) / last - 0.5;
        (centred(px, self.x0), centred(py, self.y0))
    }

    /// Extract the window from `image`, padding with black.
    pub fn extract(&self, image: &RgbImage) -> RgbImage {
        let mut canvas = RgbImage::new(self.side, self.side);
        imageops::overlay(&mut canvas, image, -self.x0, -self.y0);
        canvas
    }
}

// ---------------------------------------------------------------------------
// ExampleBuilder
// ---------------------------------------------------------------------------

/// Builds [`ExampleRecord`]s from source images.
#[derive(Debug, Clone)]
pub struct ExampleBuilder {
    image_dim: usize,
    binary_map_radius: usize,
    crop_margin: f32,
}

impl ExampleBuilder {
    /// Create a builder from the pipeline configuration.
    pub fn new(config: &PipelineConfig) -> Self {
        ExampleBuilder {
            image_dim: config.image_dim,
            binary_map_radius: config.binary_map_radius,
            crop_margin: config.crop_margin,
        }
    }

    /// Build the record for one person in an already decoded image.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Image`] if PNG encoding fails.
    pub fn build_person(&self, image: &RgbImage, person: &Person) -> Result<ExampleRecord, RecordError> {
        let (width, height) = image.dimensions();
        let window = CropWindow::for_person(person, width, height, self.crop_margin);

        let crop = window.extract(image);
        let dim = self.image_dim as u32;
        let resized = imageops::resize(&crop, dim, dim, FilterType::Triangle);
        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(resized).write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;

        let mut joint_indices = Vec::new();
        let mut x_joints = Vec::new();
        let mut y_joints = Vec::new();
        let mut is_visible = Vec::new();
        for (id, joint) in person.present_joints() {
            let (x, y) = window.to_centred(
                joint.x * width as f32,
                joint.y * height as f32,
                self.image_dim,
            );
            joint_indices.push(id.index() as u8);
            x_joints.push(x);
            y_joints.push(y);
            is_visible.push(u8::from(joint.is_visible));
        }

        let dense = SparseJoints {
            indices: &joint_indices,
            x: &x_joints,
            y: &y_joints,
            is_visible: &is_visible,
        }
        .densify()?;
        let binary_maps = rasterize_binary_maps(&dense, self.image_dim, self.binary_map_radius);

        Ok(ExampleRecord {
            image: encoded,
            binary_maps,
            joint_indices,
            x_joints,
            y_joints,
            is_visible,
            head_size: person.head_rect().diagonal() / window.side as f32,
        })
    }

    /// Open `path` and build one record per person.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Image`] if the image cannot be opened.
    pub fn build_image(&self, path: &Path, people: &[Person]) -> Result<Vec<ExampleRecord>, RecordError> {
        let image = image::open(path)?.to_rgb8();
        people
            .iter()
            .map(|person| self.build_person(&image, person))
            .collect()
    }
}

/// Outcome of [`build_records`].
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Shard files written, in order.
    pub shards: Vec<PathBuf>,
    /// Images that could not be turned into records.
    pub images_skipped: usize,
}

/// Build every example of `dataset` and write them as shards under
/// `out_dir` named `<prefix>-NNNNN.rec`.
///
/// Images that fail to open are logged and skipped.
///
/// # Errors
///
/// Any [`RecordError`] from writing shards.
pub fn build_records(
    dataset: &PoseDataset,
    config: &PipelineConfig,
    out_dir: &Path,
    prefix: &str,
) -> PipelineResult<BuildSummary> {
    let builder = ExampleBuilder::new(config);
    let mut images_skipped = 0usize;

    let records = dataset
        .iter()
        .flat_map(|(path, people)| match builder.build_image(path, people) {
            Ok(records) => records,
            Err(e) => {
                warn!("Skipping {}: {e}", path.display());
                images_skipped += 1;
                Vec::new()
            }
        });
    let shards = write_shards(records, out_dir, prefix, config.examples_per_shard)?;

    info!(
        "Built {} shards from {} images ({} skipped)",
        shards.len(),
        dataset.len(),
        images_skipped
    );
    Ok(BuildSummary {
        shards,
        images_skipped,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
