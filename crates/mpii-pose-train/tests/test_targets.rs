//! Integration tests for [`mpii_pose_train::dense`] and
//! [`mpii_pose_train::targets`].

use approx::assert_abs_diff_eq;
use mpii_pose_core::NUM_JOINTS;
use mpii_pose_train::dense::SparseJoints;
use mpii_pose_train::error::RecordError;
use mpii_pose_train::targets::{decode_binary_maps, joint_heatmaps, pixel_grid, rasterize_binary_maps};
use ndarray::Axis;

/// Heatmaps are true densities: their integral over the grid is one for a
/// joint well inside the frame.
#[test]
fn heatmap_integrates_to_one() {
    let dim = 299;
    let dense = SparseJoints {
        indices: &[7],
        x: &[0.05],
        y: &[-0.1],
        is_visible: &[1],
    }
    .densify()
    .expect("dense");
    let maps = joint_heatmaps(&dense, 5.0, dim);
    let step = 1.0 / (dim - 1) as f32;
    let integral = maps.index_axis(Axis(2), 7).sum() * step * step;
    assert_abs_diff_eq!(integral, 1.0, epsilon = 1e-2);
}

/// Dense vectors, binary maps and heatmaps agree on which joints exist.
#[test]
fn dense_targets_agree() {
    let dim = 21;
    let dense = SparseJoints {
        indices: &[15, 2, 8],
        x: &[0.25, -0.25, 0.0],
        y: &[0.0, 0.25, -0.5],
        is_visible: &[1, 0, 1],
    }
    .densify()
    .expect("dense");

    assert_eq!(dense.present, vec![2, 8, 15]);
    assert_eq!(dense.num_present(), 3);
    assert_eq!(dense.weights.sum(), 3.0);
    assert_eq!(dense.is_visible_weights.sum(), 2.0);

    let bytes = rasterize_binary_maps(&dense, dim, 1);
    let maps = decode_binary_maps(&bytes, dim).expect("decode");
    for j in 0..NUM_JOINTS {
        let ones = maps.index_axis(Axis(2), j).sum();
        match j {
            15 => assert_eq!(ones, 9.0, "full 3x3 square"),
            8 => assert_eq!(ones, 6.0, "square clipped at the top edge"),
            _ => assert_eq!(ones, 0.0, "joint {j} absent or occluded"),
        }
    }

    let grid = pixel_grid(dim);
    let heat = joint_heatmaps(&dense, 1.5, dim);
    let wrist = heat.index_axis(Axis(2), 15);
    let (r, c) = wrist
        .indexed_iter()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
        .expect("non-empty");
    assert_abs_diff_eq!(grid[c], 0.25, epsilon = 1e-6);
    assert_abs_diff_eq!(grid[r], 0.0, epsilon = 1e-6);
}

#[test]
fn inconsistent_sparse_lists_are_errors() {
    let err = SparseJoints {
        indices: &[1, 2],
        x: &[0.0],
        y: &[0.0, 0.0],
        is_visible: &[1, 1],
    }
    .densify()
    .unwrap_err();
    assert!(matches!(err, RecordError::SparseJoints(_)));

    let err = decode_binary_maps(&[0u8; 10], 4).unwrap_err();
    assert!(matches!(err, RecordError::BinaryMapSize { expected: 256, actual: 10 }));
}
