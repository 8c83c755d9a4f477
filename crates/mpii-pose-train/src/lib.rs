//! # MPII Pose Training Data Pipeline
//!
//! This crate prepares supervised training data for a human-pose network from
//! the MPII Human Pose dataset. It includes annotation parsing, record shard
//! building, dense target-map synthesis, label-consistent augmentation and a
//! multi-threaded batching pipeline.
//!
//! ## Architecture
//!
//! ```text
//! annotation JSON ──► annotations ──► PoseDataset ──► builder ──► record shards
//!                                                                    │
//!          ┌─────────────────────────────────────────────────────────┘
//!          ▼
//!   pipeline readers ──► queue::ShuffleQueue ──► pipeline workers ──► Batch
//!                                                  │
//!                                dense ─► targets ─► augment
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mpii_pose_train::config::PipelineConfig;
//! use mpii_pose_train::pipeline::{Pipeline, PipelineMode};
//! use mpii_pose_train::record::list_shards;
//! use std::path::Path;
//!
//! let config = PipelineConfig::default();
//! config.validate().expect("config is valid");
//!
//! let shards = list_shards(Path::new("records"), "train").unwrap();
//! let mut pipeline = Pipeline::start(shards, &config, PipelineMode::Train).unwrap();
//! let batch = pipeline.next_batch().unwrap().expect("infinite epochs");
//! println!("images shape: {:?}", batch.images.shape());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod annotations;
pub mod augment;
pub mod batch;
pub mod builder;
pub mod config;
pub mod dense;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod record;
pub mod targets;

// Convenient re-exports at the crate root.
pub use annotations::{read_dataset, ImageCatalog, PoseDataset, Split};
pub use batch::{Batch, EvalLabels, ExampleTuple, SparseLabels};
pub use config::{PipelineConfig, EXAMPLES_PER_SHARD};
pub use dense::{DenseJoints, SparseJoints};
pub use error::{AnnotationError, AugmentError, ConfigError, PipelineError, PipelineResult, RecordError};
pub use pipeline::{Pipeline, PipelineMode};
pub use record::ExampleRecord;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
