//! Error types for the MPII pose data pipeline.
//!
//! This module is the single source of truth for all error types in the
//! pipeline crate. Every module that produces an error imports its error type
//! from here rather than defining it inline.
//!
//! ## Hierarchy
//!
//! ```text
//! PipelineError (top-level)
//! ├── ConfigError      (config validation / file loading)
//! ├── AnnotationError  (annotation file loading; always fatal)
//! ├── RecordError      (shard I/O, payload decoding, tensor shape checks)
//! └── AugmentError     (numeric misconfiguration during augmentation)
//! ```
//!
//! Routine annotation defects (a missing head rectangle, an absent joint, an
//! image missing from disk) are not errors: the parser drops the offending
//! person or image and logs it.

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// PipelineResult
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used by orchestration-level functions.
pub type PipelineResult<T> = Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Top-level error type for the data pipeline.
///
/// Lower-level functions in [`crate::config`], [`crate::annotations`] and
/// [`crate::record`] return their own module-specific error types which are
/// automatically coerced into `PipelineError` via [`From`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The annotation source could not be loaded.
    #[error("Annotation error: {0}")]
    Annotation(#[from] AnnotationError),

    /// A serialized example could not be read or decoded.
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Augmentation was asked to do something numerically invalid.
    #[error("Augmentation error: {0}")]
    Augment(#[from] AugmentError),

    /// A core type rejected its input.
    #[error("Core error: {0}")]
    Core(#[from] mpii_pose_core::CoreError),

    /// Examples of differing shapes were stacked into one batch.
    #[error("Batch shape mismatch in `{tensor}`: expected {expected:?}, got {actual:?}")]
    BatchShape {
        /// Name of the tensor being stacked.
        tensor: &'static str,
        /// Shape of the first example.
        expected: Vec<usize>,
        /// Shape of the offending example.
        actual: Vec<usize>,
    },

    /// A batch was requested from zero examples.
    #[error("Cannot assemble an empty batch")]
    EmptyBatch,

    /// A worker thread panicked or a channel closed unexpectedly.
    #[error("Pipeline worker failure: {0}")]
    Worker(String),

    /// An I/O error that carries no path context.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Construct a [`PipelineError::BatchShape`].
    pub fn batch_shape(tensor: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        PipelineError::BatchShape {
            tensor,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Construct a [`PipelineError::Worker`].
    pub fn worker<S: Into<String>>(msg: S) -> Self {
        PipelineError::Worker(msg.into())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a [`PipelineConfig`].
///
/// [`PipelineConfig`]: crate::config::PipelineConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from disk.
    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    ParseError {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// AnnotationError
// ---------------------------------------------------------------------------

/// Fatal errors while loading the annotation source.
///
/// Per-person and per-image defects are recovered inside the parser and never
/// surface as an `AnnotationError`.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// The annotation file could not be read.
    #[error("Cannot read annotation file `{path}`: {source}")]
    FileRead {
        /// Path of the annotation file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The annotation file is not valid JSON of the expected shape.
    #[error("Cannot parse annotation file `{path}`: {source}")]
    Parse {
        /// Path of the annotation file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// `img_train` does not have one entry per annotation.
    #[error("Split list has {split_len} entries but there are {annotations} annotations")]
    SplitLengthMismatch {
        /// Length of `img_train`.
        split_len: usize,
        /// Length of `annolist`.
        annotations: usize,
    },

    /// The images directory could not be listed.
    #[error("Images directory `{path}` is not readable: {source}")]
    ImagesDir {
        /// Directory that was listed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// RecordError
// ---------------------------------------------------------------------------

/// Errors produced while reading, writing or decoding serialized examples.
///
/// These signal a mismatch between precomputed data and the running
/// configuration and are never silently repaired.
#[derive(Debug, Error)]
pub enum RecordError {
    /// A low-level I/O error on a shard file.
    #[error("I/O error on `{path}`: {source}")]
    IoError {
        /// Path being accessed when the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A shard file's framing is malformed.
    #[error("Invalid record shard `{path}`: {message}")]
    InvalidFormat {
        /// Path of the malformed shard.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },

    /// A record payload could not be encoded.
    #[error("Record encode error: {0}")]
    Encode(String),

    /// A record payload could not be decoded.
    #[error("Record decode error: {0}")]
    Decode(String),

    /// The embedded image could not be decoded or encoded.
    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// The decoded image is not `image_dim × image_dim`.
    #[error("Image is {width}x{height}, expected {expected}x{expected}")]
    ImageSize {
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
        /// Configured square dimension.
        expected: u32,
    },

    /// The binary-map buffer is not `image_dim × image_dim × 16` bytes.
    #[error("Binary map buffer has {actual} bytes, expected {expected}")]
    BinaryMapSize {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },

    /// The sparse joint lists are inconsistent with each other.
    #[error("Inconsistent sparse joints: {0}")]
    SparseJoints(String),
}

impl RecordError {
    /// Construct a [`RecordError::IoError`].
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecordError::IoError { path: path.into(), source }
    }

    /// Construct a [`RecordError::InvalidFormat`].
    pub fn invalid_format<S: Into<String>>(path: impl Into<PathBuf>, msg: S) -> Self {
        RecordError::InvalidFormat { path: path.into(), message: msg.into() }
    }

    /// Construct a [`RecordError::SparseJoints`].
    pub fn sparse_joints<S: Into<String>>(msg: S) -> Self {
        RecordError::SparseJoints(msg.into())
    }
}

// ---------------------------------------------------------------------------
// AugmentError
// ---------------------------------------------------------------------------

/// Errors produced by the augmentation stages.
#[derive(Debug, Error)]
pub enum AugmentError {
    /// A rotation angle that is NaN or infinite.
    #[error("Rotation angle must be finite, got {angle}")]
    NonFiniteAngle {
        /// The offending angle in radians.
        angle: f32,
    },

    /// Tensors that must share spatial dimensions do not.
    #[error("Spatial shape mismatch: image is {image:?}, `{tensor}` is {actual:?}")]
    SpatialMismatch {
        /// Name of the mismatched tensor.
        tensor: &'static str,
        /// Image `[H, W]`.
        image: [usize; 2],
        /// Offending `[H, W]`.
        actual: [usize; 2],
    },
}
