//! Sparse-to-dense joint conversion.
//!
//! Records store only the joints that were annotated, as parallel lists of
//! indices, coordinates and visibility flags. [`SparseJoints::densify`] scatters
//! them into fixed-length vectors indexed by joint id, which is what the
//! heatmap synthesizer and the loss weights expect.

use mpii_pose_core::NUM_JOINTS;
use ndarray::Array1;

use crate::error::RecordError;

// ---------------------------------------------------------------------------
// SparseJoints
// ---------------------------------------------------------------------------

/// Borrowed view of a record's sparse joint lists.
#[derive(Debug, Clone, Copy)]
pub struct SparseJoints<'a> {
    /// Joint ids, one per present joint.
    pub indices: &'a [u8],
    /// Centred x coordinates, parallel to `indices`.
    pub x: &'a [f32],
    /// Centred y coordinates, parallel to `indices`.
    pub y: &'a [f32],
    /// `1` when the joint is unoccluded, parallel to `indices`.
    pub is_visible: &'a [u8],
}

impl<'a> SparseJoints<'a> {
    /// Scatter the sparse lists into [`DenseJoints`].
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::SparseJoints`] when the lists differ in length,
    /// an index is not below 16 or an index repeats.
    pub fn densify(&self) -> Result<DenseJoints, RecordError> {
        let n = self.indices.len();
        if self.x.len() != n || self.y.len() != n || self.is_visible.len() != n {
            return Err(RecordError::sparse_joints(format!(
                "list lengths differ: {} indices, {} x, {} y, {} visibility",
                n,
                self.x.len(),
                self.y.len(),
                self.is_visible.len()
            )));
        }

        let mut dense = DenseJoints::empty();
        for (k, &idx) in self.indices.iter().enumerate() {
            let i = usize::from(idx);
            if i >= NUM_JOINTS {
                return Err(RecordError::sparse_joints(format!(
                    "joint index {i} out of range 0..{NUM_JOINTS}"
                )));
            }
            if dense.weights[i] != 0.0 {
                return Err(RecordError::sparse_joints(format!(
                    "joint index {i} appears more than once"
                )));
            }
            dense.x[i] = self.x[k];
            dense.y[i] = self.y[k];
            dense.weights[i] = 1.0;
            if self.is_visible[k] != 0 {
                dense.is_visible_weights[i] = 1.0;
            }
        }
        dense.present = (0..NUM_JOINTS).filter(|&i| dense.weights[i] != 0.0).collect();
        Ok(dense)
    }
}

// ---------------------------------------------------------------------------
// DenseJoints
// ---------------------------------------------------------------------------

/// Fixed-length joint vectors indexed by joint id.
///
/// Absent joints have coordinate `0.0` and weight `0.0`.
/// `is_visible_weights[i] <= weights[i]` for every `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseJoints {
    /// x coordinates, shape `[16]`.
    pub x: Array1<f32>,
    /// y coordinates, shape `[16]`.
    pub y: Array1<f32>,
    /// `1.0` where the joint is present.
    pub weights: Array1<f32>,
    /// `1.0` where the joint is present and unoccluded.
    pub is_visible_weights: Array1<f32>,
    /// Present joint ids in ascending order.
    pub present: Vec<usize>,
}

impl DenseJoints {
    /// All joints absent.
    pub fn empty() -> Self {
        DenseJoints {
            x: Array1::zeros(NUM_JOINTS),
            y: Array1::zeros(NUM_JOINTS),
            weights: Array1::zeros(NUM_JOINTS),
            is_visible_weights: Array1::zeros(NUM_JOINTS),
            present: Vec::new(),
        }
    }

    /// Number of present joints.
    pub fn num_present(&self) -> usize {
        self.present.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn empty_sparse_gives_zero_vectors() {
        let dense = SparseJoints {
            indices: &[],
            x: &[],
            y: &[],
            is_visible: &[],
        }
        .densify()
        .unwrap();
        assert_eq!(dense.x.len(), NUM_JOINTS);
        assert_eq!(dense.weights.sum(), 0.0);
        assert!(dense.present.is_empty());
    }

    #[test]
    fn weights_sum_to_present_count() {
        let dense = SparseJoints {
            indices: &[15, 0, 7],
            x: &[0.1, -0.2, 0.3],
            y: &[0.0, 0.4, -0.4],
            is_visible: &[1, 0, 1],
        }
        .densify()
        .unwrap();
        assert_abs_diff_eq!(dense.weights.sum(), 3.0);
        assert_eq!(dense.present, vec![0, 7, 15]);
        assert_abs_diff_eq!(dense.x[15], 0.1);
        assert_abs_diff_eq!(dense.y[0], 0.4);
        assert_eq!(dense.is_visible_weights[0], 0.0);
        assert_eq!(dense.is_visible_weights[7], 1.0);
        for i in 0..NUM_JOINTS {
            assert!(dense.is_visible_weights[i] <= dense.weights[i]);
        }
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let err = SparseJoints {
            indices: &[1, 2],
            x: &[0.0],
            y: &[0.0, 0.0],
            is_visible: &[1, 1],
        }
        .densify()
        .unwrap_err();
        assert!(matches!(err, RecordError::SparseJoints(_)));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let result = SparseJoints {
            indices: &[16],
            x: &[0.0],
            y: &[0.0],
            is_visible: &[1],
        }
        .densify();
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let result = SparseJoints {
            indices: &[3, 3],
            x: &[0.0, 0.1],
            y: &[0.0, 0.1],
            is_visible: &[1, 1],
        }
        .densify();
        assert!(result.is_err());
    }
}
