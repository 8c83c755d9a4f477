//! MPII annotation parsing.
//!
//! Reads a JSON rendering of the MPII `RELEASE` structure and produces a
//! [`PoseDataset`]: parallel lists of image paths and the [`Person`]s found in
//! each image.
//!
//! The source annotations are irregular. Fields are missing, single objects
//! stand in for one-element lists, visibility flags come as numbers, strings
//! or empty arrays, and some images listed in the annotations do not exist on
//! disk. None of this is an error: defective persons and images are dropped,
//! counted in [`ParseStats`] and logged. Only an unreadable or unparsable
//! annotation file is fatal.
//!
//! # Expected layout
//!
//! ```text
//! <root>/
//!   annotations/
//!     mpii_human_pose_v1_u12_1.json
//!   images/
//!     000001163.jpg
//!     ...
//! ```
//!
//! # Example
//!
//! ```rust
//! use mpii_pose_train::annotations::{parse_release, Split, StaticCatalog};
//! use rand::{rngs::StdRng, SeedableRng};
//! use std::path::Path;
//!
//! let json = r#"{
//!     "annolist": [{
//!         "image": { "name": "a.jpg" },
//!         "annorect": { "x1": 10, "y1": 10, "x2": 30, "y2": 40,
//!                       "annopoints": { "point": { "id": 9, "x": 20, "y": 15, "is_visible": 1 } } }
//!     }],
//!     "img_train": [1]
//! }"#;
//! let release = serde_json::from_str(json).unwrap();
//! let catalog = StaticCatalog::new().with_image("a.jpg", 100, 50);
//! let mut rng = StdRng::seed_from_u64(0);
//!
//! let (dataset, stats) =
//!     parse_release(&release, Path::new("images"), &catalog, Split::Train, &mut rng).unwrap();
//! assert_eq!(dataset.len(), 1);
//! assert_eq!(stats.people_kept, 1);
//! ```

use mpii_pose_core::{HeadRect, Joint, JointId, Person, NUM_JOINTS};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::AnnotationError;

// ---------------------------------------------------------------------------
// Raw annotation schema
// ---------------------------------------------------------------------------

/// A field that may hold one object or a list of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A list of values.
    Many(Vec<T>),
    /// A single value standing in for a one-element list.
    One(T),
}

impl<T> OneOrMany<T> {
    /// Borrow the contents as a slice.
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Many(v) => v,
            OneOrMany::One(v) => std::slice::from_ref(v),
        }
    }
}

/// A field whose value is either well-formed or something else entirely
/// (typically an empty array left behind by the MATLAB export).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Lenient<T> {
    /// A value of the expected type.
    Value(T),
    /// Anything else; treated as absent.
    Malformed(IgnoredAny),
}

impl<T> Lenient<T> {
    /// The value, if well-formed.
    pub fn get(&self) -> Option<&T> {
        match self {
            Lenient::Value(v) => Some(v),
            Lenient::Malformed(_) => None,
        }
    }
}

fn field<T: Copy>(f: &Option<Lenient<T>>) -> Option<T> {
    f.as_ref().and_then(Lenient::get).copied()
}

/// Top level of the annotation file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRelease {
    /// One entry per image.
    pub annolist: Vec<RawAnnotation>,
    /// Split flags parallel to `annolist`: `1` train, `0` test.
    pub img_train: Vec<u8>,
}

/// Annotations for one image.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAnnotation {
    /// Image reference.
    pub image: RawImage,
    /// Zero or more annotated people. Each entry is checked on its own so a
    /// malformed one does not take its siblings with it.
    #[serde(default)]
    pub annorect: Option<OneOrMany<Lenient<RawAnnoRect>>>,
}

/// Image reference inside an annotation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawImage {
    /// File name relative to the images directory.
    pub name: String,
}

/// One annotated person.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAnnoRect {
    /// Head rectangle left edge.
    pub x1: Option<Lenient<f64>>,
    /// Head rectangle top edge.
    pub y1: Option<Lenient<f64>>,
    /// Head rectangle right edge.
    pub x2: Option<Lenient<f64>>,
    /// Head rectangle bottom edge.
    pub y2: Option<Lenient<f64>>,
    /// Rough body centre.
    pub objpos: Option<Lenient<RawObjPos>>,
    /// Person scale relative to a 200 px height.
    pub scale: Option<Lenient<f64>>,
    /// Joint annotations.
    pub annopoints: Option<Lenient<RawAnnoPoints>>,
}

/// Rough body centre of a person.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawObjPos {
    /// Horizontal pixel position.
    pub x: f64,
    /// Vertical pixel position.
    pub y: f64,
}

/// Container of joint annotations.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAnnoPoints {
    /// One or more joints, each checked on its own.
    pub point: OneOrMany<Lenient<RawPoint>>,
}

/// One annotated joint in source-image pixels.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPoint {
    /// Joint id in `0..16`.
    pub id: Option<Lenient<f64>>,
    /// Horizontal pixel position.
    pub x: Option<Lenient<f64>>,
    /// Vertical pixel position.
    pub y: Option<Lenient<f64>>,
    /// Occlusion flag.
    pub is_visible: Option<VisibilityFlag>,
}

/// The spellings of a joint's visibility flag found in the annotations.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VisibilityFlag {
    /// `true` / `false`.
    Bool(bool),
    /// `0` / `1`.
    Number(f64),
    /// `"0"` / `"1"`.
    Text(String),
    /// An empty array or anything else.
    Other(IgnoredAny),
}

impl VisibilityFlag {
    /// Interpret the flag. Unknown spellings count as visible.
    pub fn is_visible(&self) -> bool {
        match self {
            VisibilityFlag::Bool(b) => *b,
            VisibilityFlag::Number(n) => *n != 0.0,
            VisibilityFlag::Text(s) => s.trim() != "0",
            VisibilityFlag::Other(_) => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Image catalog
// ---------------------------------------------------------------------------

/// Lookup of which images exist and how large they are.
///
/// Implementations must be `Send + Sync` so one catalog can be shared by
/// build threads.
pub trait ImageCatalog: Send + Sync {
    /// `(width, height)` of the image called `name`, or `None` when it is not
    /// available.
    fn dimensions(&self, name: &str) -> Option<(u32, u32)>;
}

/// Catalog backed by an images directory.
///
/// The directory is listed once at construction. Dimensions are read lazily
/// from the image headers.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    root: PathBuf,
    names: HashSet<String>,
}

impl DirectoryCatalog {
    /// List `root` and remember every file name in it.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::ImagesDir`] if the directory cannot be read.
    pub fn scan(root: &Path) -> Result<Self, AnnotationError> {
        let entries = std::fs::read_dir(root).map_err(|source| AnnotationError::ImagesDir {
            path: root.to_path_buf(),
            source,
        })?;
        let names: HashSet<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        debug!("DirectoryCatalog: {} files in {}", names.len(), root.display());
        Ok(DirectoryCatalog {
            root: root.to_path_buf(),
            names,
        })
    }

    /// Number of files found by [`DirectoryCatalog::scan`].
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` when the directory held no files.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl ImageCatalog for DirectoryCatalog {
    fn dimensions(&self, name: &str) -> Option<(u32, u32)> {
        if !self.names.contains(name) {
            return None;
        }
        match image::image_dimensions(self.root.join(name)) {
            Ok(dims) => Some(dims),
            Err(e) => {
                warn!("Cannot read dimensions of {name}: {e}");
                None
            }
        }
    }
}

/// In-memory catalog for tests and synthetic data.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    dims: HashMap<String, (u32, u32)>,
}

impl StaticCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image of the given size.
    pub fn with_image(mut self, name: impl Into<String>, width: u32, height: u32) -> Self {
        self.dims.insert(name.into(), (width, height));
        self
    }
}

impl ImageCatalog for StaticCatalog {
    fn dimensions(&self, name: &str) -> Option<(u32, u32)> {
        self.dims.get(name).copied()
    }
}

// ---------------------------------------------------------------------------
// PoseDataset
// ---------------------------------------------------------------------------

/// Which half of the annotations to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// Images with `img_train == 1`.
    Train,
    /// Images with `img_train == 0`.
    Test,
}

impl Split {
    fn flag(self) -> u8 {
        match self {
            Split::Train => 1,
            Split::Test => 0,
        }
    }
}

/// Parsed annotations: image paths and the non-empty list of people in each.
///
/// The two lists are parallel and were shuffled together once at load time.
#[derive(Debug, Clone, Default)]
pub struct PoseDataset {
    image_paths: Vec<PathBuf>,
    people: Vec<Vec<Person>>,
}

impl PoseDataset {
    /// Number of images.
    pub fn len(&self) -> usize {
        self.image_paths.len()
    }

    /// Returns `true` when no image survived parsing.
    pub fn is_empty(&self) -> bool {
        self.image_paths.is_empty()
    }

    /// Image paths, parallel to [`PoseDataset::people`].
    pub fn image_paths(&self) -> &[PathBuf] {
        &self.image_paths
    }

    /// People per image, parallel to [`PoseDataset::image_paths`].
    pub fn people(&self) -> &[Vec<Person>] {
        &self.people
    }

    /// Total number of people across all images.
    pub fn num_people(&self) -> usize {
        self.people.iter().map(Vec::len).sum()
    }

    /// Iterate over `(image_path, people)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &[Person])> + '_ {
        self.image_paths
            .iter()
            .map(PathBuf::as_path)
            .zip(self.people.iter().map(Vec::as_slice))
    }
}

/// Counters of what the parser kept and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Annotations in the file.
    pub images_total: usize,
    /// Annotations belonging to the other split.
    pub images_other_split: usize,
    /// Annotations whose image file is not in the catalog.
    pub images_missing: usize,
    /// Annotations left with no person after filtering.
    pub images_without_people: usize,
    /// People kept.
    pub people_kept: usize,
    /// People dropped for lack of a usable head rectangle or because their
    /// entry was not an object.
    pub people_dropped: usize,
    /// Joint annotations skipped for a bad id, missing coordinates or a
    /// malformed entry.
    pub joints_skipped: usize,
    /// Joint ids that appeared more than once in one person.
    pub duplicate_joints: usize,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Default images directory for an annotation file: `<dir>/../images`.
pub fn default_images_dir(annotation_path: &Path) -> PathBuf {
    annotation_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("..")
        .join("images")
}

/// Read and parse the annotation file at `path`.
///
/// # Errors
///
/// Returns [`AnnotationError::FileRead`] or [`AnnotationError::Parse`].
pub fn load_release(path: &Path) -> Result<RawRelease, AnnotationError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AnnotationError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| AnnotationError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a [`PoseDataset`] from an annotation file and an images directory.
///
/// `images_dir` defaults to [`default_images_dir`]. Shuffling is driven by
/// `rng`.
///
/// # Errors
///
/// Any [`AnnotationError`]; per-person and per-image defects are not errors.
pub fn read_dataset<R: Rng + ?Sized>(
    annotation_path: &Path,
    images_dir: Option<&Path>,
    split: Split,
    rng: &mut R,
) -> Result<PoseDataset, AnnotationError> {
    let images_dir = images_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_images_dir(annotation_path));
    let release = load_release(annotation_path)?;
    let catalog = DirectoryCatalog::scan(&images_dir)?;
    let (dataset, _) = parse_release(&release, &images_dir, &catalog, split, rng)?;
    Ok(dataset)
}

/// Turn a parsed annotation file into a shuffled [`PoseDataset`].
///
/// # Errors
///
/// Returns [`AnnotationError::SplitLengthMismatch`] when `img_train` is not
/// parallel to `annolist`.
pub fn parse_release<R: Rng + ?Sized>(
    release: &RawRelease,
    images_dir: &Path,
    catalog: &dyn ImageCatalog,
    split: Split,
    rng: &mut R,
) -> Result<(PoseDataset, ParseStats), AnnotationError> {
    if release.img_train.len() != release.annolist.len() {
        return Err(AnnotationError::SplitLengthMismatch {
            split_len: release.img_train.len(),
            annotations: release.annolist.len(),
        });
    }

    let mut stats = ParseStats {
        images_total: release.annolist.len(),
        ..ParseStats::default()
    };
    let mut image_paths = Vec::new();
    let mut people_in_images = Vec::new();

    for (annotation, &flag) in release.annolist.iter().zip(&release.img_train) {
        if flag != split.flag() {
            stats.images_other_split += 1;
            continue;
        }

        let name = annotation.image.name.as_str();
        let Some((width, height)) = catalog.dimensions(name) else {
            debug!("Skipping {name}: not found in images directory");
            stats.images_missing += 1;
            continue;
        };

        let rects = annotation
            .annorect
            .as_ref()
            .map(OneOrMany::as_slice)
            .unwrap_or(&[]);
        let mut people = Vec::with_capacity(rects.len());
        for rect in rects {
            match rect.get() {
                Some(rect) => people.extend(parse_person(rect, width, height, &mut stats)),
                None => {
                    debug!("Skipping malformed person entry in {name}");
                    stats.people_dropped += 1;
                }
            }
        }

        if people.is_empty() {
            stats.images_without_people += 1;
            continue;
        }

        image_paths.push(images_dir.join(name));
        people_in_images.push(people);
    }

    // One permutation shared by both lists.
    let mut entries: Vec<(PathBuf, Vec<Person>)> =
        image_paths.into_iter().zip(people_in_images).collect();
    entries.shuffle(rng);
    let (image_paths, people) = entries.into_iter().unzip();
    let dataset = PoseDataset { image_paths, people };

    info!(
        "Parsed {} of {} annotations ({} people kept, {} dropped, {} images missing, {} without people)",
        dataset.len(),
        stats.images_total,
        stats.people_kept,
        stats.people_dropped,
        stats.images_missing,
        stats.images_without_people
    );

    Ok((dataset, stats))
}

/// Recover a head rectangle from one annotated person.
///
/// Uses `x1, y1, x2, y2` when all four are present, otherwise estimates the
/// rectangle from `objpos` and `scale`. Returns `None` when neither source is
/// available or the rectangle collapses to a point.
pub fn head_rect(rect: &RawAnnoRect) -> Option<HeadRect> {
    let corners = match (field(&rect.x1), field(&rect.y1), field(&rect.x2), field(&rect.y2)) {
        (Some(x1), Some(y1), Some(x2), Some(y2)) => (x1, y1, x2, y2),
        _ => {
            let pos = rect.objpos.as_ref().and_then(Lenient::get)?;
            let s = field(&rect.scale)?;
            (pos.x - 25.0 * s, pos.y - 70.0 * s, pos.x + 25.0 * s, pos.y - 20.0 * s)
        }
    };
    HeadRect::new(
        corners.0 as f32,
        corners.1 as f32,
        corners.2 as f32,
        corners.3 as f32,
    )
    .ok()
}

fn parse_person(
    rect: &RawAnnoRect,
    width: u32,
    height: u32,
    stats: &mut ParseStats,
) -> Option<Person> {
    let Some(head) = head_rect(rect) else {
        stats.people_dropped += 1;
        return None;
    };

    let points = rect
        .annopoints
        .as_ref()
        .and_then(Lenient::get)
        .map(|p| p.point.as_slice())
        .unwrap_or(&[]);

    let mut seen = [false; NUM_JOINTS];
    let mut joints = Vec::with_capacity(points.len());
    for point in points {
        let Some(point) = point.get() else {
            stats.joints_skipped += 1;
            continue;
        };
        let (Some(id), Some(x), Some(y)) = (field(&point.id), field(&point.x), field(&point.y))
        else {
            stats.joints_skipped += 1;
            continue;
        };
        let id = match (id.fract() == 0.0)
            .then_some(id as i64)
            .and_then(|i| JointId::try_from(i).ok())
        {
            Some(id) => id,
            None => {
                debug!("Skipping joint with invalid id {id}");
                stats.joints_skipped += 1;
                continue;
            }
        };
        if std::mem::replace(&mut seen[id.index()], true) {
            debug!("Duplicate annotation for joint {id}; keeping the last one");
            stats.duplicate_joints += 1;
        }
        let is_visible = point
            .is_visible
            .as_ref()
            .map(VisibilityFlag::is_visible)
            .unwrap_or(true);
        joints.push((
            id,
            Joint::new(
                (x / f64::from(width)) as f32,
                (y / f64::from(height)) as f32,
                is_visible,
            ),
        ));
    }

    stats.people_kept += 1;
    Some(Person::new(joints, head))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
