//! `preview-batches` binary: run the input pipeline over record shards and
//! report what comes out.
//!
//! Logs per-batch statistics and, with `--out`, saves the merged heatmap and
//! binary-map images of each batch's first example.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin preview-batches -- --records records --batches 5
//! cargo run --bin preview-batches -- --records records --eval --out preview
//! ```

use clap::Parser;
use mpii_pose_train::batch::{merged_map_image, Batch};
use mpii_pose_train::config::PipelineConfig;
use mpii_pose_train::pipeline::{Pipeline, PipelineMode};
use mpii_pose_train::record::list_shards;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Command-line arguments for the batch previewer.
#[derive(Parser, Debug)]
#[command(
    name = "preview-batches",
    version,
    about = "Run the MPII input pipeline and inspect its batches",
    long_about = None
)]
struct Args {
    /// Directory holding the record shards.
    #[arg(short, long, value_name = "DIR")]
    records: PathBuf,

    /// Shard file prefix.
    #[arg(long, default_value = "train")]
    prefix: String,

    /// Path to a JSON pipeline configuration.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of batches to pull.
    #[arg(short, long, default_value_t = 3)]
    batches: usize,

    /// Evaluation mode: one ordered pass, no augmentation.
    #[arg(long, default_value_t = false)]
    eval: bool,

    /// Directory for merged-map PNGs. Nothing is saved when omitted.
    #[arg(short, long, value_name = "DIR")]
    out: Option<PathBuf>,

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

    info!("MPII batch preview v{}", mpii_pose_train::VERSION);

    let config = match args.config.as_deref() {
        Some(path) => match PipelineConfig::from_json(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load configuration: {e}");
                std::process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };

    let shards = match list_shards(&args.records, &args.prefix) {
        Ok(s) if !s.is_empty() => s,
        Ok(_) => {
            error!(
                "No `{}-*.rec` shards in {}",
                args.prefix,
                args.records.display()
            );
            std::process::exit(1);
        }
        Err(e) => {
            error!("Cannot list shards: {e}");
            std::process::exit(1);
        }
    };

    let mode = if args.eval {
        PipelineMode::Eval
    } else {
        PipelineMode::Train
    };
    let mut pipeline = match Pipeline::start(shards, &config, mode) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to start pipeline: {e}");
            std::process::exit(1);
        }
    };

    for index in 0..args.batches {
        let batch = match pipeline.next_batch() {
            Ok(Some(b)) => b,
            Ok(None) => {
                info!("Pipeline exhausted after {index} batches");
                break;
            }
            Err(e) => {
                error!("Batch {index} failed: {e}");
                break;
            }
        };
        log_batch(index, &batch);
        if let Some(dir) = args.out.as_deref() {
            if let Err(e) = save_merged_maps(dir, index, &batch) {
                warn!("Cannot save preview images: {e}");
            }
        }
    }

    if let Err(e) = pipeline.shutdown() {
        error!("Pipeline shutdown failed: {e}");
        std::process::exit(1);
    }
}

fn log_batch(index: usize, batch: &Batch) {
    let (min, max) = batch
        .images
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    info!(
        "batch {index}: {} examples, image range [{min:.3}, {max:.3}], {:.1} joints/example, {:.1} visible/example",
        batch.len(),
        batch.weights.sum() / batch.len() as f32,
        batch.is_visible_weights.sum() / batch.len() as f32,
    );
    if let Some(labels) = &batch.eval_labels {
        info!(
            "batch {index}: mean head size {:.4}",
            labels.head_size.mean().unwrap_or(0.0)
        );
    }
}

fn save_merged_maps(dir: &Path, index: usize, batch: &Batch) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    merged_map_image(&batch.merged_heatmaps(), 0)?
        .save(dir.join(format!("batch{index:03}_heatmaps.png")))?;
    merged_map_image(&batch.merged_binary_maps(), 0)?
        .save(dir.join(format!("batch{index:03}_binary_maps.png")))?;
    Ok(())
}
