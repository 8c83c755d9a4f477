//! Multi-threaded input pipeline.
//!
//! ```text
//!  shard paths ──► reader threads ──► ShuffleQueue ──► worker threads ──► bounded channel ──► next_batch()
//!   (per-epoch        (decode             (random          (densify, heatmaps,     (capacity
//!    shuffle)          frames)             dequeue)          maps, augment)          workers × batch)
//! ```
//!
//! Readers block when the shuffle pool is full and workers block when it is
//! empty or the output channel is full. [`Pipeline::shutdown`] (also run on
//! drop) stops every thread after its in-flight example and joins it.
//!
//! With a finite number of epochs the pool is closed once every reader has
//! finished, the workers drain it, and [`Pipeline::next_batch`] returns
//! `Ok(None)` after the last full batch. A trailing partial batch is dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use mpii_pose_train::config::PipelineConfig;
//! use mpii_pose_train::pipeline::{Pipeline, PipelineMode};
//! use mpii_pose_train::record::list_shards;
//! use std::path::Path;
//!
//! let mut cfg = PipelineConfig::default();
//! cfg.num_epochs = Some(1);
//! let shards = list_shards(Path::new("records"), "train").unwrap();
//! let mut pipeline = Pipeline::start(shards, &cfg, PipelineMode::Train).unwrap();
//! while let Some(batch) = pipeline.next_batch().unwrap() {
//!     println!("batch of {}", batch.len());
//! }
//! pipeline.shutdown().unwrap();
//! ```

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::augment::{normalise, Augmentor};
use crate::batch::{Batch, ExampleTuple};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::queue::{QueueOrder, ShuffleQueue};
use crate::record::{ExampleRecord, RecordReader};
use crate::targets::{decode_binary_maps, joint_heatmaps};

type Output = PipelineResult<ExampleTuple>;

// ---------------------------------------------------------------------------
// PipelineMode
// ---------------------------------------------------------------------------

/// Training or evaluation behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Shuffled shards, random pool, full augmentation.
    Train,
    /// One pass in sorted shard order with one reader and one worker, FIFO
    /// pool, no augmentation, sparse labels attached.
    Eval,
}

// ---------------------------------------------------------------------------
// Per-example preprocessing
// ---------------------------------------------------------------------------

/// Turn one record into a preprocessed example.
///
/// Densifies the joints, synthesizes heatmaps, decodes the binary maps and
/// the image, then augments (training) or only normalises and attaches the
/// sparse labels (evaluation).
///
/// # Errors
///
/// Any [`RecordError`](crate::error::RecordError) from inconsistent record
/// contents, or an augmentation error.
pub fn preprocess<R: RngCore + ?Sized>(
    record: &ExampleRecord,
    config: &PipelineConfig,
    mode: PipelineMode,
    augmentor: &Augmentor,
    rng: &mut R,
) -> Output {
    let dim = config.image_dim;
    let dense = record.sparse_joints().densify()?;
    let heatmaps = joint_heatmaps(&dense, config.heatmap_stddev_pixels, dim);
    let binary_maps = decode_binary_maps(&record.binary_maps, dim)?;
    let image = record.decode_image(dim)?;

    let mut example = ExampleTuple {
        image,
        binary_maps,
        heatmaps,
        weights: dense.weights,
        is_visible_weights: dense.is_visible_weights,
        labels: None,
    };
    match mode {
        PipelineMode::Train => {
            augmentor.augment(&mut example, rng)?;
        }
        PipelineMode::Eval => {
            normalise(&mut example.image);
            example.labels = Some(record.labels());
        }
    }
    Ok(example)
}

// ---------------------------------------------------------------------------
// Shard feed
// ---------------------------------------------------------------------------

/// Hands shard paths to readers, one epoch at a time.
struct ShardFeed {
    paths: Vec<PathBuf>,
    order: Vec<usize>,
    next: usize,
    epoch: usize,
    num_epochs: Option<usize>,
    shuffle: bool,
    rng: StdRng,
}

impl ShardFeed {
    fn new(paths: Vec<PathBuf>, num_epochs: Option<usize>, shuffle: bool, seed: u64) -> Self {
        let mut feed = ShardFeed {
            order: (0..paths.len()).collect(),
            paths,
            next: 0,
            epoch: 0,
            num_epochs,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
        };
        if feed.shuffle {
            feed.order.shuffle(&mut feed.rng);
        }
        feed
    }

    fn next_path(&mut self) -> Option<PathBuf> {
        if self.paths.is_empty() {
            return None;
        }
        if self.next == self.order.len() {
            self.epoch += 1;
            if self.num_epochs.is_some_and(|n| self.epoch >= n) {
                return None;
            }
            debug!("Starting epoch {}", self.epoch + 1);
            self.next = 0;
            if self.shuffle {
                self.order.shuffle(&mut self.rng);
            }
        }
        let path = self.paths[self.order[self.next]].clone();
        self.next += 1;
        Some(path)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Running input pipeline.
pub struct Pipeline {
    rx: Option<Receiver<Output>>,
    stop: Arc<AtomicBool>,
    pool: Arc<ShuffleQueue<ExampleRecord>>,
    handles: Vec<JoinHandle<()>>,
    batch_size: usize,
    mode: PipelineMode,
}

impl Pipeline {
    /// Validate `config` and start the reader and worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] for an invalid configuration and
    /// [`PipelineError::Io`] if a thread cannot be spawned.
    pub fn start(shards: Vec<PathBuf>, config: &PipelineConfig, mode: PipelineMode) -> PipelineResult<Self> {
        config.validate()?;

        let mut parent = StdRng::seed_from_u64(config.seed);
        let (num_readers, num_workers, num_epochs, shuffle, order, min_after_dequeue) = match mode {
            PipelineMode::Train => (
                config.num_readers,
                config.num_preprocess_threads,
                config.num_epochs,
                true,
                QueueOrder::Random,
                config.min_queue_examples(),
            ),
            PipelineMode::Eval => (1, 1, Some(1), false, QueueOrder::Fifo, 0),
        };

        info!(
            "Starting {:?} pipeline: {} shards, {} readers, {} workers, pool {}..{}",
            mode,
            shards.len(),
            num_readers,
            num_workers,
            min_after_dequeue,
            config.example_queue_capacity()
        );

        let feed = Arc::new(Mutex::new(ShardFeed::new(
            shards,
            num_epochs,
            shuffle,
            parent.next_u64(),
        )));
        let pool = Arc::new(ShuffleQueue::new(
            config.example_queue_capacity(),
            min_after_dequeue,
            order,
            parent.next_u64(),
        ));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = bounded::<Output>(config.batch_queue_capacity());

        let mut pipeline = Pipeline {
            rx: Some(rx),
            stop: Arc::clone(&stop),
            pool: Arc::clone(&pool),
            handles: Vec::with_capacity(num_readers + num_workers),
            batch_size: config.batch_size,
            mode,
        };

        let active_readers = Arc::new(AtomicUsize::new(num_readers));
        for reader_id in 0..num_readers {
            let ctx = ReaderContext {
                reader_id,
                feed: Arc::clone(&feed),
                pool: Arc::clone(&pool),
                stop: Arc::clone(&stop),
                active: Arc::clone(&active_readers),
                errors: tx.clone(),
            };
            // On a spawn failure `pipeline` is dropped, which stops and joins
            // the threads started so far.
            let handle = std::thread::Builder::new()
                .name(format!("shard-reader-{reader_id}"))
                .spawn(move || ctx.run())?;
            pipeline.handles.push(handle);
        }

        for worker_id in 0..num_workers {
            let ctx = WorkerContext {
                worker_id,
                config: config.clone(),
                mode,
                augmentor: Augmentor::new(config.max_rotation_angle, worker_id)?,
                rng: StdRng::seed_from_u64(parent.next_u64()),
                pool: Arc::clone(&pool),
                stop: Arc::clone(&stop),
                tx: tx.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("preprocess-{worker_id}"))
                .spawn(move || ctx.run())?;
            pipeline.handles.push(handle);
        }

        Ok(pipeline)
    }

    /// Collect the next full batch.
    ///
    /// Returns `Ok(None)` once a finite pipeline is exhausted or after
    /// [`Pipeline::shutdown`].
    ///
    /// # Errors
    ///
    /// Forwards the first error produced by a reader or worker.
    pub fn next_batch(&mut self) -> PipelineResult<Option<Batch>> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        let mut examples = Vec::with_capacity(self.batch_size);
        while examples.len() < self.batch_size {
            match rx.recv() {
                Ok(Ok(example)) => examples.push(example),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    if !examples.is_empty() {
                        debug!("Discarding trailing partial batch of {}", examples.len());
                    }
                    return Ok(None);
                }
            }
        }
        Batch::assemble(&examples).map(Some)
    }

    /// The mode the pipeline was started in.
    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    /// Stop all threads and wait for them to exit.
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Worker`] if any thread panicked.
    pub fn shutdown(&mut self) -> PipelineResult<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.pool.close();
        self.rx.take();

        let mut panicked = Vec::new();
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                panicked.push(name);
            }
        }
        if panicked.is_empty() {
            debug!("Pipeline threads joined");
            Ok(())
        } else {
            Err(PipelineError::worker(format!(
                "threads panicked: {}",
                panicked.join(", ")
            )))
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Pipeline shutdown: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Thread bodies
// ---------------------------------------------------------------------------

struct ReaderContext {
    reader_id: usize,
    feed: Arc<Mutex<ShardFeed>>,
    pool: Arc<ShuffleQueue<ExampleRecord>>,
    stop: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    errors: Sender<Output>,
}

impl ReaderContext {
    fn run(self) {
        self.read_shards();
        // The last reader out closes the pool so workers can drain it.
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.pool.close();
        }
        debug!("Reader {} finished", self.reader_id);
    }

    fn read_shards(&self) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            let Some(path) = self.feed.lock().next_path() else {
                return;
            };
            let reader = match RecordReader::open(&path) {
                Ok(r) => r,
                Err(e) => {
                    let _ = self.errors.send(Err(e.into()));
                    return;
                }
            };
            for record in reader {
                if self.stop.load(Ordering::SeqCst) {
                    return;
                }
                match record {
                    Ok(record) => {
                        if self.pool.push(record).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = self.errors.send(Err(e.into()));
                        return;
                    }
                }
            }
        }
    }
}

struct WorkerContext {
    worker_id: usize,
    config: PipelineConfig,
    mode: PipelineMode,
    augmentor: Augmentor,
    rng: StdRng,
    pool: Arc<ShuffleQueue<ExampleRecord>>,
    stop: Arc<AtomicBool>,
    tx: Sender<Output>,
}

impl WorkerContext {
    fn run(mut self) {
        let mut processed = 0usize;
        while let Some(record) = self.pool.pop() {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let result = preprocess(&record, &self.config, self.mode, &self.augmentor, &mut self.rng);
            if self.tx.send(result).is_err() {
                break;
            }
            processed += 1;
        }
        debug!("Worker {} finished after {} examples", self.worker_id, processed);
    }
}
