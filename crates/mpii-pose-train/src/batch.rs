//! Batch assembly and monitoring views.
//!
//! [`Batch::assemble`] stacks preprocessed [`ExampleTuple`]s along a new
//! leading axis:
//!
//! | Tensor               | Shape           |
//! |----------------------|-----------------|
//! | `images`             | `[B, D, D, 3]`  |
//! | `binary_maps`        | `[B, D, D, 16]` |
//! | `heatmaps`           | `[B, D, D, 16]` |
//! | `weights`            | `[B, 16]`       |
//! | `is_visible_weights` | `[B, 16]`       |
//!
//! In evaluation mode every example also carries its [`SparseLabels`], which
//! are gathered into [`EvalLabels`].

use image::GrayImage;
use ndarray::{Array1, Array2, Array3, Array4, ArrayView, Axis, Dimension, RemoveAxis};

use crate::error::{PipelineError, PipelineResult};

// ---------------------------------------------------------------------------
// ExampleTuple
// ---------------------------------------------------------------------------

/// Raw joint labels of one example, kept for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseLabels {
    /// Ids of the annotated joints.
    pub joint_indices: Vec<u8>,
    /// Centred x coordinates, parallel to `joint_indices`.
    pub x_joints: Vec<f32>,
    /// Centred y coordinates, parallel to `joint_indices`.
    pub y_joints: Vec<f32>,
    /// Head size in the crop's normalised frame.
    pub head_size: f32,
}

/// One fully preprocessed example.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleTuple {
    /// Normalised image, `[D, D, 3]`.
    pub image: Array3<f32>,
    /// Binary occupancy maps, `[D, D, 16]`.
    pub binary_maps: Array3<f32>,
    /// Gaussian heatmaps, `[D, D, 16]`.
    pub heatmaps: Array3<f32>,
    /// Presence weights, `[16]`.
    pub weights: Array1<f32>,
    /// Presence-and-visibility weights, `[16]`.
    pub is_visible_weights: Array1<f32>,
    /// Sparse labels; only set in evaluation mode.
    pub labels: Option<SparseLabels>,
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Sparse labels of a whole batch.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalLabels {
    /// Joint ids per example.
    pub joint_indices: Vec<Vec<u8>>,
    /// x coordinates per example.
    pub x_joints: Vec<Vec<f32>>,
    /// y coordinates per example.
    pub y_joints: Vec<Vec<f32>>,
    /// Head size per example, `[B]`.
    pub head_size: Array1<f32>,
}

/// A stacked batch of examples.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[B, D, D, 3]`.
    pub images: Array4<f32>,
    /// `[B, D, D, 16]`.
    pub binary_maps: Array4<f32>,
    /// `[B, D, D, 16]`.
    pub heatmaps: Array4<f32>,
    /// `[B, 16]`.
    pub weights: Array2<f32>,
    /// `[B, 16]`.
    pub is_visible_weights: Array2<f32>,
    /// Present when every example carried [`SparseLabels`].
    pub eval_labels: Option<EvalLabels>,
}

impl Batch {
    /// Stack `examples` into a batch.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyBatch`] for an empty slice and
    /// [`PipelineError::BatchShape`] when examples disagree on a tensor's
    /// shape.
    pub fn assemble(examples: &[ExampleTuple]) -> PipelineResult<Batch> {
        if examples.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        let images = stack("images", examples.iter().map(|e| e.image.view()))?;
        let binary_maps = stack("binary_maps", examples.iter().map(|e| e.binary_maps.view()))?;
        let heatmaps = stack("heatmaps", examples.iter().map(|e| e.heatmaps.view()))?;
        let weights = stack("weights", examples.iter().map(|e| e.weights.view()))?;
        let is_visible_weights = stack(
            "is_visible_weights",
            examples.iter().map(|e| e.is_visible_weights.view()),
        )?;

        let eval_labels = examples
            .iter()
            .map(|e| e.labels.as_ref())
            .collect::<Option<Vec<_>>>()
            .map(|labels| EvalLabels {
                joint_indices: labels.iter().map(|l| l.joint_indices.clone()).collect(),
                x_joints: labels.iter().map(|l| l.x_joints.clone()).collect(),
                y_joints: labels.iter().map(|l| l.y_joints.clone()).collect(),
                head_size: labels.iter().map(|l| l.head_size).collect(),
            });

        Ok(Batch {
            images,
            binary_maps,
            heatmaps,
            weights,
            is_visible_weights,
            eval_labels,
        })
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    /// Always `false` for an assembled batch.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-pixel maximum over the heatmap channels, `[B, D, D, 1]`.
    pub fn merged_heatmaps(&self) -> Array4<f32> {
        channel_max(&self.heatmaps)
    }

    /// Per-pixel maximum over the binary-map channels, `[B, D, D, 1]`.
    pub fn merged_binary_maps(&self) -> Array4<f32> {
        channel_max(&self.binary_maps)
    }
}

fn stack<'a, D, I>(tensor: &'static str, views: I) -> PipelineResult<ndarray::Array<f32, D::Larger>>
where
    D: Dimension,
    D::Larger: RemoveAxis,
    I: Iterator<Item = ArrayView<'a, f32, D>>,
{
    let views: Vec<ArrayView<'a, f32, D>> = views.collect();
    let first = views.first().map(|v| v.shape().to_vec()).unwrap_or_default();
    if let Some(bad) = views.iter().find(|v| v.shape() != first.as_slice()) {
        return Err(PipelineError::batch_shape(tensor, &first, bad.shape()));
    }
    ndarray::stack(Axis(0), &views)
        .map_err(|_| PipelineError::batch_shape(tensor, &first, &first))
}

fn channel_max(maps: &Array4<f32>) -> Array4<f32> {
    maps.map_axis(Axis(3), |lane| lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v)))
        .insert_axis(Axis(3))
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

/// Render example `b` of a merged `[B, D, D, 1]` map as a greyscale image
/// scaled so its maximum is white.
///
/// # Errors
///
/// Returns [`PipelineError::BatchShape`] when `maps` is not single-channel or
/// `b` is out of range.
pub fn merged_map_image(maps: &Array4<f32>, b: usize) -> PipelineResult<GrayImage> {
    let (n, h, w, c) = maps.dim();
    if c != 1 || b >= n {
        return Err(PipelineError::batch_shape(
            "merged_map",
            &[b + 1, h, w, 1],
            maps.shape(),
        ));
    }
    let plane = maps.index_axis(Axis(0), b);
    let max = plane.fold(0.0_f32, |m, &v| m.max(v));
    let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
    Ok(GrayImage::from_fn(w as u32, h as u32, |x, y| {
        let v = plane[[y as usize, x as usize, 0]];
        image::Luma([(v * scale).clamp(0.0, 255.0).round() as u8])
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
