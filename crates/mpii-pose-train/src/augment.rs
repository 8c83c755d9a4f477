//! Label-consistent augmentation of one training example.
//!
//! Stages run strictly in this order:
//!
//! 1. **Flip**: with probability one half, mirror the image and both target
//!    maps along the column axis and relabel left/right joints in the map
//!    channels and weight vectors using [`LEFT_RIGHT_PERM`].
//! 2. **Rotate**: rotate the image and both maps about their centre by one
//!    angle drawn from `[-θmax, θmax]`, nearest-neighbour sampling, zero fill.
//! 3. **Photometric**: brightness, then saturation/hue/contrast in an order
//!    fixed per worker, then clip to `[0, 1]`. Image only.
//! 4. **Normalise**: map `[0, 1]` to `[-1, 1]`.
//!
//! Randomness comes from an explicit RNG owned by the calling worker; the
//! draws for one example are collected in [`AugmentParams`] so a sampled
//! augmentation can be replayed exactly.
//!
//! # Example
//!
//! ```rust
//! use mpii_pose_train::augment::{AugmentParams, Augmentor};
//!
//! let params = AugmentParams::identity();
//! assert!(!params.flip);
//! assert_eq!(params.angle, 0.0);
//!
//! let aug = Augmentor::new(0.26, 0).unwrap();
//! assert_eq!(aug.worker_id(), 0);
//! ```

use image::{ImageBuffer, Luma, Rgb, Rgb32FImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use mpii_pose_core::LEFT_RIGHT_PERM;
use ndarray::{s, Array1, Array3, Axis};
use rand::Rng;

use crate::batch::ExampleTuple;
use crate::error::AugmentError;

/// Largest brightness shift, in intensity units.
pub const MAX_BRIGHTNESS_DELTA: f32 = 32.0 / 255.0;
/// Saturation factor range.
pub const SATURATION_RANGE: (f32, f32) = (0.5, 1.5);
/// Largest hue shift, as a fraction of a full turn.
pub const MAX_HUE_DELTA: f32 = 0.2;
/// Contrast factor range.
pub const CONTRAST_RANGE: (f32, f32) = (0.5, 1.5);

// ---------------------------------------------------------------------------
// AugmentParams
// ---------------------------------------------------------------------------

/// Every random quantity used to augment one example.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentParams {
    /// Mirror left-right.
    pub flip: bool,
    /// Rotation angle in radians.
    pub angle: f32,
    /// Additive brightness shift.
    pub brightness: f32,
    /// Saturation multiplier.
    pub saturation: f32,
    /// Hue shift as a fraction of a full turn.
    pub hue: f32,
    /// Contrast multiplier.
    pub contrast: f32,
}

impl AugmentParams {
    /// Parameters that leave an example unchanged.
    pub fn identity() -> Self {
        AugmentParams {
            flip: false,
            angle: 0.0,
            brightness: 0.0,
            saturation: 1.0,
            hue: 0.0,
            contrast: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Augmentor
// ---------------------------------------------------------------------------

/// Per-worker augmentation driver.
#[derive(Debug, Clone)]
pub struct Augmentor {
    max_rotation_angle: f32,
    worker_id: usize,
}

impl Augmentor {
    /// Create an augmentor for worker `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AugmentError::NonFiniteAngle`] if `max_rotation_angle` is NaN
    /// or infinite.
    pub fn new(max_rotation_angle: f32, worker_id: usize) -> Result<Self, AugmentError> {
        if !max_rotation_angle.is_finite() {
            return Err(AugmentError::NonFiniteAngle {
                angle: max_rotation_angle,
            });
        }
        Ok(Augmentor {
            max_rotation_angle: max_rotation_angle.abs(),
            worker_id,
        })
    }

    /// The worker this augmentor belongs to.
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Draw the parameters for one example.
    ///
    /// Draw order: flip, angle, brightness, then the three colour factors in
    /// this worker's stage order.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> AugmentParams {
        let flip = rng.gen::<f32>() < 0.5;
        let angle = rng.gen_range(-self.max_rotation_angle..=self.max_rotation_angle);
        let brightness = rng.gen_range(-MAX_BRIGHTNESS_DELTA..=MAX_BRIGHTNESS_DELTA);
        let mut params = AugmentParams {
            flip,
            angle,
            brightness,
            ..AugmentParams::identity()
        };
        for stage in self.colour_order() {
            match stage {
                ColourStage::Saturation => {
                    params.saturation = rng.gen_range(SATURATION_RANGE.0..=SATURATION_RANGE.1)
                }
                ColourStage::Hue => params.hue = rng.gen_range(-MAX_HUE_DELTA..=MAX_HUE_DELTA),
                ColourStage::Contrast => {
                    params.contrast = rng.gen_range(CONTRAST_RANGE.0..=CONTRAST_RANGE.1)
                }
            }
        }
        params
    }

    /// Sample parameters and apply all four stages.
    ///
    /// # Errors
    ///
    /// Returns an [`AugmentError`] when the example's tensors disagree on
    /// their spatial size.
    pub fn augment<R: Rng + ?Sized>(
        &self,
        example: &mut ExampleTuple,
        rng: &mut R,
    ) -> Result<AugmentParams, AugmentError> {
        let params = self.sample(rng);
        self.apply(example, &params)?;
        Ok(params)
    }

    /// Apply previously sampled parameters.
    ///
    /// # Errors
    ///
    /// See [`Augmentor::augment`]; a non-finite `params.angle` is also
    /// rejected.
    pub fn apply(&self, example: &mut ExampleTuple, params: &AugmentParams) -> Result<(), AugmentError> {
        check_spatial(example)?;
        if params.flip {
            flip_left_right(example);
        }
        rotate_example(example, params.angle)?;
        distort_colour(&mut example.image, params, self.colour_order());
        normalise(&mut example.image);
        Ok(())
    }

    fn colour_order(&self) -> [ColourStage; 3] {
        colour_order(self.worker_id)
    }
}

/// One of the order-dependent colour adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourStage {
    /// Scale HSV saturation.
    Saturation,
    /// Rotate HSV hue.
    Hue,
    /// Scale distance from the per-channel mean.
    Contrast,
}

/// Stage order used by worker `worker_id`. Even workers run saturation, hue,
/// contrast; odd workers run contrast, saturation, hue.
pub fn colour_order(worker_id: usize) -> [ColourStage; 3] {
    if worker_id % 2 == 0 {
        [ColourStage::Saturation, ColourStage::Hue, ColourStage::Contrast]
    } else {
        [ColourStage::Contrast, ColourStage::Saturation, ColourStage::Hue]
    }
}

fn check_spatial(example: &ExampleTuple) -> Result<(), AugmentError> {
    let dims = |a: &Array3<f32>| [a.shape()[0], a.shape()[1]];
    let image = dims(&example.image);
    for (tensor, arr) in [
        ("binary_maps", &example.binary_maps),
        ("heatmaps", &example.heatmaps),
    ] {
        if dims(arr) != image {
            return Err(AugmentError::SpatialMismatch {
                tensor,
                image,
                actual: dims(arr),
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Flip
// ---------------------------------------------------------------------------

/// Mirror an `[H, W, C]` array along the column axis.
pub fn mirror_columns(arr: &Array3<f32>) -> Array3<f32> {
    arr.slice(s![.., ..;-1, ..]).to_owned()
}

/// Reorder the channels of a `[H, W, 16]` map with [`LEFT_RIGHT_PERM`].
pub fn permute_channels(maps: &Array3<f32>) -> Array3<f32> {
    maps.select(Axis(2), &LEFT_RIGHT_PERM)
}

/// Reorder a 16-vector with [`LEFT_RIGHT_PERM`].
pub fn permute_weights(weights: &Array1<f32>) -> Array1<f32> {
    weights.select(Axis(0), &LEFT_RIGHT_PERM)
}

/// Mirror the example and swap left/right joint labels.
pub fn flip_left_right(example: &mut ExampleTuple) {
    example.image = mirror_columns(&example.image);
    example.binary_maps = permute_channels(&mirror_columns(&example.binary_maps));
    example.heatmaps = permute_channels(&mirror_columns(&example.heatmaps));
    example.weights = permute_weights(&example.weights);
    example.is_visible_weights = permute_weights(&example.is_visible_weights);
}

// ---------------------------------------------------------------------------
// Rotation
// ---------------------------------------------------------------------------

fn check_angle(angle: f32) -> Result<(), AugmentError> {
    if angle.is_finite() {
        Ok(())
    } else {
        Err(AugmentError::NonFiniteAngle { angle })
    }
}

/// Rotate an `[H, W, C]` array by `angle` radians about its centre.
///
/// Each channel is rotated as a `Luma<f32>` image with
/// [`rotate_about_center`] and nearest-neighbour sampling; pixels whose
/// source falls outside the array are zero. Positive angles turn the content
/// clockwise on screen. An angle of exactly zero returns an unchanged copy.
///
/// # Errors
///
/// Returns [`AugmentError::NonFiniteAngle`] for NaN or infinite angles.
pub fn rotate_nearest(arr: &Array3<f32>, angle: f32) -> Result<Array3<f32>, AugmentError> {
    check_angle(angle)?;
    if angle == 0.0 {
        return Ok(arr.clone());
    }

    let (h, w, channels) = arr.dim();
    let rotated: Vec<ImageBuffer<Luma<f32>, Vec<f32>>> = (0..channels)
        .map(|j| {
            let plane = ImageBuffer::from_fn(w as u32, h as u32, |x, y| {
                Luma([arr[[y as usize, x as usize, j]]])
            });
            rotate_about_center(&plane, angle, Interpolation::Nearest, Luma([0.0]))
        })
        .collect();
    Ok(Array3::from_shape_fn((h, w, channels), |(r, c, j)| {
        rotated[j].get_pixel(c as u32, r as u32)[0]
    }))
}

/// Rotate an `[H, W, 3]` RGB image as an [`Rgb32FImage`].
///
/// Uses the same resampler as [`rotate_nearest`], so a pixel of the image and
/// the same pixel of any map rotated by the same angle land together.
///
/// # Errors
///
/// Returns [`AugmentError::NonFiniteAngle`] for NaN or infinite angles.
pub fn rotate_rgb(image: &Array3<f32>, angle: f32) -> Result<Array3<f32>, AugmentError> {
    check_angle(angle)?;
    if angle == 0.0 {
        return Ok(image.clone());
    }

    let (h, w, _) = image.dim();
    let buffer = Rgb32FImage::from_fn(w as u32, h as u32, |x, y| {
        let (r, c) = (y as usize, x as usize);
        Rgb([image[[r, c, 0]], image[[r, c, 1]], image[[r, c, 2]]])
    });
    let rotated = rotate_about_center(&buffer, angle, Interpolation::Nearest, Rgb([0.0; 3]));
    Ok(Array3::from_shape_fn((h, w, 3), |(r, c, ch)| {
        rotated.get_pixel(c as u32, r as u32)[ch]
    }))
}

/// Rotate the image and both target maps by the same angle.
///
/// # Errors
///
/// See [`rotate_nearest`].
pub fn rotate_example(example: &mut ExampleTuple, angle: f32) -> Result<(), AugmentError> {
    example.image = rotate_rgb(&example.image, angle)?;
    example.binary_maps = rotate_nearest(&example.binary_maps, angle)?;
    example.heatmaps = rotate_nearest(&example.heatmaps, angle)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Photometric distortion
// ---------------------------------------------------------------------------

/// Brightness, the three colour stages in `order`, then clip to `[0, 1]`.
pub fn distort_colour(image: &mut Array3<f32>, params: &AugmentParams, order: [ColourStage; 3]) {
    adjust_brightness(image, params.brightness);
    for stage in order {
        match stage {
            ColourStage::Saturation => adjust_saturation(image, params.saturation),
            ColourStage::Hue => adjust_hue(image, params.hue),
            ColourStage::Contrast => adjust_contrast(image, params.contrast),
        }
    }
    image.mapv_inplace(|v| v.clamp(0.0, 1.0));
}

/// Add `delta` to every value.
pub fn adjust_brightness(image: &mut Array3<f32>, delta: f32) {
    if delta != 0.0 {
        image.mapv_inplace(|v| v + delta);
    }
}

/// Scale each channel's deviation from its mean by `factor`.
pub fn adjust_contrast(image: &mut Array3<f32>, factor: f32) {
    if factor == 1.0 {
        return;
    }
    for mut channel in image.axis_iter_mut(Axis(2)) {
        let mean = channel.mean().unwrap_or(0.0);
        channel.mapv_inplace(|v| (v - mean) * factor + mean);
    }
}

/// Multiply HSV saturation by `factor`, clipped to `[0, 1]`.
pub fn adjust_saturation(image: &mut Array3<f32>, factor: f32) {
    if factor == 1.0 {
        return;
    }
    map_hsv(image, |h, s, v| (h, (s * factor).clamp(0.0, 1.0), v));
}

/// Rotate HSV hue by `delta` turns.
pub fn adjust_hue(image: &mut Array3<f32>, delta: f32) {
    if delta == 0.0 {
        return;
    }
    map_hsv(image, |h, s, v| ((h + delta).rem_euclid(1.0), s, v));
}

fn map_hsv<F>(image: &mut Array3<f32>, f: F)
where
    F: Fn(f32, f32, f32) -> (f32, f32, f32),
{
    for mut px in image.lanes_mut(Axis(2)) {
        if px.len() < 3 {
            continue;
        }
        let (h, s, v) = rgb_to_hsv(px[0], px[1], px[2]);
        let (h, s, v) = f(h, s, v);
        let (r, g, b) = hsv_to_rgb(h, s, v);
        px[0] = r;
        px[1] = g;
        px[2] = b;
    }
}

/// RGB to HSV, all components in `[0, 1]` (hue as a fraction of a turn).
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta <= 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    let s = if max > 0.0 { delta / max } else { 0.0 };
    (h / 6.0, s, max)
}

/// HSV to RGB, inverse of [`rgb_to_hsv`].
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let c = v * s;
    let x = c * (1.0 - (h6 % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h6 < 1.0 {
        (c, x, 0.0)
    } else if h6 < 2.0 {
        (x, c, 0.0)
    } else if h6 < 3.0 {
        (0.0, c, x)
    } else if h6 < 4.0 {
        (0.0, x, c)
    } else if h6 < 5.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };
    (r + m, g + m, b + m)
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// Map intensities from `[0, 1]` to `[-1, 1]`.
pub fn normalise(image: &mut Array3<f32>) {
    image.mapv_inplace(|v| (v - 0.5) * 2.0);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
