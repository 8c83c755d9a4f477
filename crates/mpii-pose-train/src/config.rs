//! Pipeline configuration for the MPII pose data pipeline.
//!
//! [`PipelineConfig`] is the single source of truth for target-map shapes,
//! augmentation ranges, queue sizing and thread counts used throughout the
//! pipeline. It is serializable via [`serde`] so it can be stored next to the
//! record shards it was used to build.
//!
//! # Example
//!
//! ```rust
//! use mpii_pose_train::config::PipelineConfig;
//!
//! let cfg = PipelineConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.image_dim, 299);
//! assert_eq!(cfg.batch_size, 32);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Number of examples written to each record shard by default.
pub const EXAMPLES_PER_SHARD: usize = 256;

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Complete configuration for building and reading MPII training examples.
///
/// Use [`PipelineConfig::default()`] as a starting point, then override
/// individual fields as needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // -----------------------------------------------------------------------
    // Target maps
    // -----------------------------------------------------------------------
    /// Side length `D` of the square input image and of every target map.
    /// Default: **299**.
    pub image_dim: usize,

    /// Standard deviation of the Gaussian joint heatmaps, in pixels.
    /// Default: **5.0**.
    pub heatmap_stddev_pixels: f32,

    /// Half-width of the square stamped into each binary map, in pixels.
    /// Default: **5**.
    pub binary_map_radius: usize,

    // -----------------------------------------------------------------------
    // Augmentation
    // -----------------------------------------------------------------------
    /// Maximum absolute rotation angle, in radians. Default: **π/12** (15°).
    pub max_rotation_angle: f32,

    // -----------------------------------------------------------------------
    // Batching and queues
    // -----------------------------------------------------------------------
    /// Examples per batch. Default: **32**.
    pub batch_size: usize,

    /// Number of shard reader threads. Default: **4**.
    pub num_readers: usize,

    /// Number of preprocessing worker threads. Default: **4**.
    pub num_preprocess_threads: usize,

    /// Multiplier on [`EXAMPLES_PER_SHARD`] giving the minimum number of raw
    /// examples held in the shuffle pool. Larger values improve cross-shard
    /// mixing at the cost of memory. Default: **16**.
    pub input_queue_memory_factor: usize,

    /// Number of passes over the shards. `None` repeats forever.
    /// Default: **None**.
    pub num_epochs: Option<usize>,

    // -----------------------------------------------------------------------
    // Dataset build
    // -----------------------------------------------------------------------
    /// Examples per shard file when writing records. Default: **256**.
    pub examples_per_shard: usize,

    /// Margin added around each person's bounding box before cropping, as a
    /// fraction of the box's longer side. Default: **0.15**.
    pub crop_margin: f32,

    // -----------------------------------------------------------------------
    // Reproducibility
    // -----------------------------------------------------------------------
    /// Parent seed for the dataset shuffle, the shuffle pool and every
    /// worker's augmentation RNG. Default: **42**.
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            // Target maps
            image_dim: 299,
            heatmap_stddev_pixels: 5.0,
            binary_map_radius: 5,
            // Augmentation
            max_rotation_angle: std::f32::consts::PI / 12.0,
            // Batching and queues
            batch_size: 32,
            num_readers: 4,
            num_preprocess_threads: 4,
            input_queue_memory_factor: 16,
            num_epochs: None,
            // Dataset build
            examples_per_shard: EXAMPLES_PER_SHARD,
            crop_margin: 0.15,
            // Reproducibility
            seed: 42,
        }
    }
}

impl PipelineConfig {
    /// Load a [`PipelineConfig`] from a JSON file at `path`.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::ParseError`] if the JSON is malformed and
    /// [`ConfigError::InvalidValue`] if validation fails.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: PipelineConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON and write it to
    /// `path`, creating parent directories if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the directory cannot be created or
    /// the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Standard deviation of the heatmap Gaussians in the normalised
    /// `[-0.5, 0.5]` coordinate frame.
    pub fn heatmap_stddev(&self) -> f32 {
        self.heatmap_stddev_pixels / self.image_dim as f32
    }

    /// Minimum number of raw examples kept in the shuffle pool before a
    /// dequeue is allowed.
    pub fn min_queue_examples(&self) -> usize {
        self.input_queue_memory_factor * EXAMPLES_PER_SHARD
    }

    /// Capacity of the raw-example shuffle pool.
    pub fn example_queue_capacity(&self) -> usize {
        self.min_queue_examples() + 3 * self.batch_size
    }

    /// Capacity of the preprocessed-example output channel.
    pub fn batch_queue_capacity(&self) -> usize {
        self.num_preprocess_threads * self.batch_size
    }

    /// Number of bytes in one binary-map buffer (`D × D × 16`).
    pub fn binary_map_len(&self) -> usize {
        self.image_dim * self.image_dim * mpii_pose_core::NUM_JOINTS
    }

    /// Validate all fields and return an error describing the first problem
    /// found, or `Ok(())` if the configuration is coherent.
    ///
    /// # Validated invariants
    ///
    /// - `image_dim` must be at least 2 (the heatmap grid needs two endpoints).
    /// - `heatmap_stddev_pixels` must be finite and strictly positive.
    /// - `max_rotation_angle` must be finite and in `[0, π]`.
    /// - `batch_size`, `num_readers`, `num_preprocess_threads` and
    ///   `examples_per_shard` must be at least 1.
    /// - `num_epochs`, when set, must be at least 1.
    /// - `crop_margin` must be finite and non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Target maps
        if self.image_dim < 2 {
            return Err(ConfigError::invalid_value("image_dim", "must be >= 2"));
        }
        if !self.heatmap_stddev_pixels.is_finite() || self.heatmap_stddev_pixels <= 0.0 {
            return Err(ConfigError::invalid_value(
                "heatmap_stddev_pixels",
                "must be finite and > 0.0",
            ));
        }

        // Augmentation
        if !self.max_rotation_angle.is_finite() {
            return Err(ConfigError::invalid_value(
                "max_rotation_angle",
                "must be finite",
            ));
        }
        if self.max_rotation_angle < 0.0 || self.max_rotation_angle > std::f32::consts::PI {
            return Err(ConfigError::invalid_value(
                "max_rotation_angle",
                "must be in [0, π] radians",
            ));
        }

        // Batching and queues
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if self.num_readers == 0 {
            return Err(ConfigError::invalid_value("num_readers", "must be > 0"));
        }
        if self.num_preprocess_threads == 0 {
            return Err(ConfigError::invalid_value(
                "num_preprocess_threads",
                "must be > 0",
            ));
        }
        if self.num_epochs == Some(0) {
            return Err(ConfigError::invalid_value(
                "num_epochs",
                "must be > 0 when set",
            ));
        }

        // Dataset build
        if self.examples_per_shard == 0 {
            return Err(ConfigError::invalid_value(
                "examples_per_shard",
                "must be > 0",
            ));
        }
        if !self.crop_margin.is_finite() || self.crop_margin < 0.0 {
            return Err(ConfigError::invalid_value(
                "crop_margin",
                "must be finite and >= 0.0",
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let cfg = PipelineConfig::default();
        cfg.validate().expect("default config should be valid");
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let mut original = PipelineConfig::default();
        original.num_epochs = Some(3);
        original.to_json(&path).expect("serialization should succeed");

        let loaded = PipelineConfig::from_json(&path).expect("deserialization should succeed");
        assert_eq!(loaded, original);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("partial.json");
        std::fs::write(&path, r#"{ "image_dim": 128, "batch_size": 8 }"#).unwrap();

        let cfg = PipelineConfig::from_json(&path).unwrap();
        assert_eq!(cfg.image_dim, 128);
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(cfg.num_readers, PipelineConfig::default().num_readers);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            PipelineConfig::from_json(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn tiny_image_dim_is_invalid() {
        let mut cfg = PipelineConfig::default();
        cfg.image_dim = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_finite_rotation_is_invalid() {
        let mut cfg = PipelineConfig::default();
        cfg.max_rotation_angle = f32::NAN;
        assert!(cfg.validate().is_err());
        cfg.max_rotation_angle = f32::INFINITY;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_epochs_is_invalid() {
        let mut cfg = PipelineConfig::default();
        cfg.num_epochs = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn queue_sizes_follow_memory_factor() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.min_queue_examples(), 16 * 256);
        assert_eq!(cfg.example_queue_capacity(), 16 * 256 + 3 * 32);
        assert_eq!(cfg.batch_queue_capacity(), 4 * 32);
        assert_eq!(cfg.binary_map_len(), 299 * 299 * 16);
    }
}
