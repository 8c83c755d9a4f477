//! `build-records` binary: convert MPII annotations and images into record
//! shards.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin build-records -- --annotations mpii/annotations/release.json
//! cargo run --bin build-records -- --annotations release.json --images mpii/images --out records
//! ```

use clap::Parser;
use mpii_pose_train::annotations::{read_dataset, Split};
use mpii_pose_train::builder::build_records;
use mpii_pose_train::config::PipelineConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{error, info};

/// Command-line arguments for the record builder.
#[derive(Parser, Debug)]
#[command(
    name = "build-records",
    version,
    about = "Build MPII pose training record shards",
    long_about = None
)]
struct Args {
    /// Annotation file (JSON rendering of the MPII `RELEASE` structure).
    #[arg(short, long, value_name = "FILE")]
    annotations: PathBuf,

    /// Images directory. Defaults to `<annotation dir>/../images`.
    #[arg(short, long, value_name = "DIR")]
    images: Option<PathBuf>,

    /// Output directory for the shards.
    #[arg(short, long, value_name = "DIR", default_value = "records")]
    out: PathBuf,

    /// Path to a JSON pipeline configuration.
    ///
    /// If not provided, the default `PipelineConfig` is used.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Build the test split instead of the training split.
    #[arg(long, default_value_t = false)]
    test_split: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("MPII record builder v{}", mpii_pose_train::VERSION);

    let config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match PipelineConfig::from_json(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("No configuration file provided, using defaults");
            PipelineConfig::default()
        }
    };
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        std::process::exit(1);
    }

    let (split, prefix) = if args.test_split {
        (Split::Test, "test")
    } else {
        (Split::Train, "train")
    };
    info!("  split        : {prefix}");
    info!("  image dim    : {}", config.image_dim);
    info!("  map radius   : {}", config.binary_map_radius);
    info!("  crop margin  : {}", config.crop_margin);
    info!("  shard size   : {}", config.examples_per_shard);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let dataset = match read_dataset(&args.annotations, args.images.as_deref(), split, &mut rng) {
        Ok(ds) => ds,
        Err(e) => {
            error!("Failed to load annotations: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Dataset: {} images, {} people",
        dataset.len(),
        dataset.num_people()
    );

    let summary = match build_records(&dataset, &config, &args.out, prefix) {
        Ok(s) => s,
        Err(e) => {
            error!("Record build failed: {e}");
            std::process::exit(1);
        }
    };

    let config_path = args.out.join("pipeline_config.json");
    if let Err(e) = config.to_json(&config_path) {
        error!("Failed to save configuration: {e}");
        std::process::exit(1);
    }

    info!(
        "Done: {} shards in {} ({} images skipped)",
        summary.shards.len(),
        args.out.display(),
        summary.images_skipped
    );
}
