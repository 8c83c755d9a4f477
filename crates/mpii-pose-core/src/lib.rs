//! # MPII Pose Core
//!
//! Core types for the MPII human-pose training-data pipeline.
//!
//! This crate provides the foundational building blocks shared by the rest of
//! the workspace:
//!
//! - **Joint identities**: [`JointId`] enumerates the 16 canonical MPII body
//!   joints and [`LEFT_RIGHT_PERM`] maps each joint to its mirror image.
//!
//! - **Annotations**: [`Person`] holds 16 optional [`Joint`] slots and a
//!   non-degenerate [`HeadRect`].
//!
//! - **Error Types**: [`CoreError`] for rejected joint ids and rectangles.
//!
//! ## Feature Flags
//!
//! - `serde` (default): Enable serialization/deserialization via serde
//!
//! ## Example
//!
//! ```rust
//! use mpii_pose_core::{HeadRect, Joint, JointId, Person};
//!
//! let rect = HeadRect::new(100.0, 40.0, 140.0, 90.0).unwrap();
//! let person = Person::new([(JointId::HeadTop, Joint::new(0.5, 0.2, true))], rect);
//!
//! assert_eq!(person.num_present(), 1);
//! assert_eq!(JointId::RightAnkle.mirror(), JointId::LeftAnkle);
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use types::{HeadRect, Joint, JointId, Person, LEFT_RIGHT_PERM};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of canonical MPII body joints.
pub const NUM_JOINTS: usize = 16;
