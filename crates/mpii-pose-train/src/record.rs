//! Serialized training examples and the shard files that hold them.
//!
//! # Shard layout
//!
//! ```text
//! +--------+---------+------------------------------------------+
//! | "MPRS" | version | frame | frame | ...                      |
//! +--------+---------+------------------------------------------+
//!
//! frame = u32 little-endian payload length
//!       + zlib( bincode( ExampleRecord ) )
//! ```
//!
//! Shards are named `<prefix>-00000.rec`, `<prefix>-00001.rec`, ... so that a
//! directory listing sorts them in write order.
//!
//! # Example
//!
//! ```rust,no_run
//! use mpii_pose_train::record::{list_shards, RecordReader};
//! use std::path::Path;
//!
//! for shard in list_shards(Path::new("records"), "train").unwrap() {
//!     for record in RecordReader::open(&shard).unwrap() {
//!         let record = record.unwrap();
//!         println!("{} joints", record.joint_indices.len());
//!     }
//! }
//! ```

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::batch::SparseLabels;
use crate::dense::SparseJoints;
use crate::error::RecordError;

/// Magic bytes at the start of every shard file.
pub const SHARD_MAGIC: &[u8; 4] = b"MPRS";
/// Current shard format version.
pub const SHARD_VERSION: u8 = 1;
/// File extension of shard files.
pub const SHARD_EXTENSION: &str = "rec";

const MAX_FRAME_LEN: usize = 1 << 30;

// ---------------------------------------------------------------------------
// ExampleRecord
// ---------------------------------------------------------------------------

/// One serialized training example: a cropped person and its labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleRecord {
    /// Encoded `D × D` RGB image (PNG or JPEG).
    pub image: Vec<u8>,
    /// Raw `D × D × 16` binary maps, row-major, one byte per value.
    pub binary_maps: Vec<u8>,
    /// Ids of the annotated joints.
    pub joint_indices: Vec<u8>,
    /// Centred x coordinates, parallel to `joint_indices`.
    pub x_joints: Vec<f32>,
    /// Centred y coordinates, parallel to `joint_indices`.
    pub y_joints: Vec<f32>,
    /// `1` when the joint is unoccluded, parallel to `joint_indices`.
    pub is_visible: Vec<u8>,
    /// Head rectangle diagonal in the crop's normalised frame.
    pub head_size: f32,
}

impl ExampleRecord {
    /// Borrow the sparse joint lists.
    pub fn sparse_joints(&self) -> SparseJoints<'_> {
        SparseJoints {
            indices: &self.joint_indices,
            x: &self.x_joints,
            y: &self.y_joints,
            is_visible: &self.is_visible,
        }
    }

    /// Copy out the labels kept for evaluation.
    pub fn labels(&self) -> SparseLabels {
        SparseLabels {
            joint_indices: self.joint_indices.clone(),
            x_joints: self.x_joints.clone(),
            y_joints: self.y_joints.clone(),
            head_size: self.head_size,
        }
    }

    /// Decode the embedded image to `[D, D, 3]` floats in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Image`] if the bytes are not a decodable image
    /// and [`RecordError::ImageSize`] if it is not `image_dim` square.
    pub fn decode_image(&self, image_dim: usize) -> Result<Array3<f32>, RecordError> {
        let rgb = image::load_from_memory(&self.image)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width as usize != image_dim || height as usize != image_dim {
            return Err(RecordError::ImageSize {
                width,
                height,
                expected: image_dim as u32,
            });
        }
        let values: Vec<f32> = rgb.into_raw().into_iter().map(|b| f32::from(b) / 255.0).collect();
        Array3::from_shape_vec((image_dim, image_dim, 3), values)
            .map_err(|e| RecordError::Decode(e.to_string()))
    }

    /// Serialize and compress into one frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Encode`] on a serialization or compression
    /// failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        let raw = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| RecordError::Encode(e.to_string()))?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .map_err(|e| RecordError::Encode(e.to_string()))?;
        encoder.finish().map_err(|e| RecordError::Encode(e.to_string()))
    }

    /// Decompress and deserialize one frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Decode`] on a decompression or deserialization
    /// failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        let mut raw = Vec::new();
        ZlibDecoder::new(bytes)
            .read_to_end(&mut raw)
            .map_err(|e| RecordError::Decode(e.to_string()))?;
        let (record, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| RecordError::Decode(e.to_string()))?;
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// RecordWriter
// ---------------------------------------------------------------------------

/// Appends [`ExampleRecord`]s to one shard file.
pub struct RecordWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    count: usize,
}

impl RecordWriter {
    /// Create (or truncate) a shard at `path` and write its header.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::IoError`] if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, RecordError> {
        let file = File::create(path).map_err(|e| RecordError::io_error(path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(SHARD_MAGIC)
            .and_then(|_| writer.write_all(&[SHARD_VERSION]))
            .map_err(|e| RecordError::io_error(path, e))?;
        Ok(RecordWriter {
            path: path.to_path_buf(),
            writer,
            count: 0,
        })
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Encode`] or [`RecordError::IoError`].
    pub fn write(&mut self, record: &ExampleRecord) -> Result<(), RecordError> {
        let payload = record.to_bytes()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| RecordError::Encode(format!("frame of {} bytes", payload.len())))?;
        self.writer
            .write_all(&len.to_le_bytes())
            .and_then(|_| self.writer.write_all(&payload))
            .map_err(|e| RecordError::io_error(&self.path, e))?;
        self.count += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Flush the shard and return the number of records written.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::IoError`] if the final flush fails.
    pub fn finish(mut self) -> Result<usize, RecordError> {
        self.writer
            .flush()
            .map_err(|e| RecordError::io_error(&self.path, e))?;
        debug!("Wrote {} records to {}", self.count, self.path.display());
        Ok(self.count)
    }
}

// ---------------------------------------------------------------------------
// RecordReader
// ---------------------------------------------------------------------------

/// Iterates over the records of one shard file.
///
/// The iterator stops after the first error.
pub struct RecordReader {
    path: PathBuf,
    reader: BufReader<File>,
    done: bool,
}

impl RecordReader {
    /// Open a shard and check its header.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::IoError`] if the file cannot be opened and
    /// [`RecordError::InvalidFormat`] if the header is wrong.
    pub fn open(path: &Path) -> Result<Self, RecordError> {
        let file = File::open(path).map_err(|e| RecordError::io_error(path, e))?;
        let mut reader = BufReader::new(file);
        let mut header = [0u8; 5];
        reader
            .read_exact(&mut header)
            .map_err(|_| RecordError::invalid_format(path, "file too short for header"))?;
        if &header[..4] != SHARD_MAGIC {
            return Err(RecordError::invalid_format(path, "bad magic bytes"));
        }
        if header[4] != SHARD_VERSION {
            return Err(RecordError::invalid_format(
                path,
                format!("unsupported version {}", header[4]),
            ));
        }
        Ok(RecordReader {
            path: path.to_path_buf(),
            reader,
            done: false,
        })
    }

    /// Path of the shard being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_frame(&mut self) -> Result<Option<ExampleRecord>, RecordError> {
        let at_eof = self
            .reader
            .fill_buf()
            .map_err(|e| RecordError::io_error(&self.path, e))?
            .is_empty();
        if at_eof {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        self.reader
            .read_exact(&mut len_bytes)
            .map_err(|_| RecordError::invalid_format(&self.path, "truncated frame length"))?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(RecordError::invalid_format(
                &self.path,
                format!("frame length {len} exceeds limit"),
            ));
        }
        let mut payload = vec![0u8; len];
        self.reader
            .read_exact(&mut payload)
            .map_err(|_| RecordError::invalid_format(&self.path, "truncated frame payload"))?;
        ExampleRecord::from_bytes(&payload).map(Some)
    }
}

impl Iterator for RecordReader {
    type Item = Result<ExampleRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shard sets
// ---------------------------------------------------------------------------

/// Path of shard number `index` under `dir`.
pub fn shard_path(dir: &Path, prefix: &str, index: usize) -> PathBuf {
    dir.join(format!("{prefix}-{index:05}.{SHARD_EXTENSION}"))
}

/// Write `records` into consecutive shards of at most `per_shard` records.
///
/// Creates `dir` if needed and returns the shard paths in order.
///
/// # Errors
///
/// Any [`RecordError`] from creating, writing or flushing a shard.
pub fn write_shards<I>(
    records: I,
    dir: &Path,
    prefix: &str,
    per_shard: usize,
) -> Result<Vec<PathBuf>, RecordError>
where
    I: IntoIterator<Item = ExampleRecord>,
{
    std::fs::create_dir_all(dir).map_err(|e| RecordError::io_error(dir, e))?;
    let per_shard = per_shard.max(1);

    let mut paths = Vec::new();
    let mut writer: Option<RecordWriter> = None;
    let mut total = 0usize;
    for record in records {
        if writer.as_ref().map_or(true, |w| w.count() >= per_shard) {
            if let Some(full) = writer.take() {
                full.finish()?;
            }
            let path = shard_path(dir, prefix, paths.len());
            writer = Some(RecordWriter::create(&path)?);
            paths.push(path);
        }
        if let Some(w) = writer.as_mut() {
            w.write(&record)?;
            total += 1;
        }
    }
    if let Some(last) = writer {
        last.finish()?;
    }

    info!(
        "Wrote {} records in {} shards to {}",
        total,
        paths.len(),
        dir.display()
    );
    Ok(paths)
}

/// Find the shards named `<prefix>-*.rec` in `dir`, sorted by name.
///
/// # Errors
///
/// Returns [`RecordError::IoError`] if `dir` cannot be listed.
pub fn list_shards(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, RecordError> {
    let stem = format!("{prefix}-");
    let suffix = format!(".{SHARD_EXTENSION}");
    let mut shards: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| RecordError::io_error(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with(&stem) && n.ends_with(&suffix))
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();
    shards.sort();
    Ok(shards)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
