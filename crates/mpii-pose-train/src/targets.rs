//! Dense target maps: binary occupancy maps and Gaussian joint heatmaps.
//!
//! Both map kinds have shape `[D, D, 16]` with channel `i` holding joint `i`.
//! Coordinates are in the centred frame: grid column `c` corresponds to
//! `-0.5 + c / (D - 1)`, see [`pixel_grid`].
//!
//! # Example
//!
//! ```rust
//! use mpii_pose_train::dense::SparseJoints;
//! use mpii_pose_train::targets::joint_heatmaps;
//!
//! let dense = SparseJoints { indices: &[9], x: &[0.0], y: &[-0.3], is_visible: &[1] }
//!     .densify()
//!     .unwrap();
//! let maps = joint_heatmaps(&dense, 5.0, 64);
//! assert_eq!(maps.shape(), &[64, 64, 16]);
//! ```

use mpii_pose_core::NUM_JOINTS;
use ndarray::{Array1, Array3};

use crate::dense::DenseJoints;
use crate::error::RecordError;

// ---------------------------------------------------------------------------
// Binary maps
// ---------------------------------------------------------------------------

/// Reshape a raw `D × D × 16` byte buffer into a `[D, D, 16]` float map.
///
/// # Errors
///
/// Returns [`RecordError::BinaryMapSize`] when `bytes` has any other length.
/// The buffer is never truncated or padded.
pub fn decode_binary_maps(bytes: &[u8], image_dim: usize) -> Result<Array3<f32>, RecordError> {
    let expected = image_dim * image_dim * NUM_JOINTS;
    if bytes.len() != expected {
        return Err(RecordError::BinaryMapSize {
            expected,
            actual: bytes.len(),
        });
    }
    let values: Vec<f32> = bytes.iter().map(|&b| f32::from(b)).collect();
    Array3::from_shape_vec((image_dim, image_dim, NUM_JOINTS), values)
        .map_err(|e| RecordError::Decode(e.to_string()))
}

/// Build the binary maps for one example.
///
/// For every present, visible joint a filled `(2r+1) × (2r+1)` square centred
/// on the joint's pixel is set to `1` in that joint's channel, clipped to the
/// image bounds. Channels do not interact. Returns the raw `D × D × 16`
/// row-major byte buffer stored in records.
pub fn rasterize_binary_maps(joints: &DenseJoints, image_dim: usize, radius: usize) -> Vec<u8> {
    let mut maps = vec![0u8; image_dim * image_dim * NUM_JOINTS];
    let last = image_dim.saturating_sub(1);
    for &j in &joints.present {
        if joints.is_visible_weights[j] == 0.0 {
            continue;
        }
        let (Some(col), Some(row)) = (
            grid_index(joints.x[j], image_dim),
            grid_index(joints.y[j], image_dim),
        ) else {
            continue;
        };
        let rows = row.saturating_sub(radius)..=(row + radius).min(last);
        for r in rows {
            let cols = col.saturating_sub(radius)..=(col + radius).min(last);
            for c in cols {
                maps[(r * image_dim + c) * NUM_JOINTS + j] = 1;
            }
        }
    }
    maps
}

/// Nearest grid index of a centred coordinate, or `None` when it falls
/// outside the image.
fn grid_index(coord: f32, image_dim: usize) -> Option<usize> {
    let pos = ((coord + 0.5) * (image_dim - 1) as f32).round();
    if !pos.is_finite() || pos < 0.0 || pos > (image_dim - 1) as f32 {
        return None;
    }
    Some(pos as usize)
}

// ---------------------------------------------------------------------------
// Gaussian heatmaps
// ---------------------------------------------------------------------------

/// `image_dim` evenly spaced points from `-0.5` to `0.5` inclusive.
pub fn pixel_grid(image_dim: usize) -> Array1<f32> {
    Array1::linspace(-0.5, 0.5, image_dim)
}

/// Normal probability density with the given mean and standard deviation,
/// evaluated at every point of `grid`.
///
/// The values are densities, not probabilities: they do not sum to one over
/// the grid.
pub fn normal_pdf(grid: &Array1<f32>, mean: f32, std_dev: f32) -> Array1<f32> {
    let norm = 1.0 / (std_dev * (2.0 * std::f32::consts::PI).sqrt());
    let two_var = 2.0 * std_dev * std_dev;
    grid.mapv(|g| {
        let d = g - mean;
        norm * (-(d * d) / two_var).exp()
    })
}

/// Separable Gaussian heatmaps for all 16 joints, shape `[D, D, 16]`.
///
/// `heatmap[r, c, j] = pdf_y[j][r] * pdf_x[j][c]` with standard deviation
/// `stddev_pixels / D`. Absent joints are centred at `0`; callers mask them
/// with the weight vector.
pub fn joint_heatmaps(joints: &DenseJoints, stddev_pixels: f32, image_dim: usize) -> Array3<f32> {
    let grid = pixel_grid(image_dim);
    let std_dev = stddev_pixels / image_dim as f32;
    let mut maps = Array3::<f32>::zeros((image_dim, image_dim, NUM_JOINTS));
    for j in 0..NUM_JOINTS {
        let px = normal_pdf(&grid, joints.x[j], std_dev);
        let py = normal_pdf(&grid, joints.y[j], std_dev);
        for (r, &vy) in py.iter().enumerate() {
            for (c, &vx) in px.iter().enumerate() {
                maps[[r, c, j]] = vy * vx;
            }
        }
    }
    maps
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
