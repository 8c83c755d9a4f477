//! Error types for the MPII pose core types.
//!
//! Construction of the core value types ([`JointId`], [`HeadRect`]) is
//! fallible: joint ids outside the canonical range and single-point head
//! rectangles are rejected here so that every value that exists downstream
//! already satisfies its invariants.
//!
//! [`JointId`]: crate::types::JointId
//! [`HeadRect`]: crate::types::HeadRect

use thiserror::Error;

/// A specialized `Result` type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors produced when constructing core pose types.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CoreError {
    /// A joint id outside `0..NUM_JOINTS`.
    #[error("Invalid joint id {id} (expected 0..{max})")]
    InvalidJointId {
        /// The offending id.
        id: i64,
        /// Number of canonical joints.
        max: usize,
    },

    /// A head rectangle that collapses to a single point.
    #[error("Degenerate head rectangle ({x0}, {y0}, {x1}, {y1})")]
    DegenerateRect {
        /// Left edge.
        x0: f32,
        /// Top edge.
        y0: f32,
        /// Right edge.
        x1: f32,
        /// Bottom edge.
        y1: f32,
    },

    /// Validation error for input data.
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what validation failed.
        message: String,
    },
}

impl CoreError {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new invalid joint id error.
    #[must_use]
    pub fn invalid_joint_id(id: i64) -> Self {
        Self::InvalidJointId {
            id,
            max: crate::NUM_JOINTS,
        }
    }
}
