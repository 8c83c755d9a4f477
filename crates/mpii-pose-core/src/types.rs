//! Core data types for the MPII pose pipeline.
//!
//! # Type Categories
//!
//! - **Joint identities**: [`JointId`] and the [`LEFT_RIGHT_PERM`] mirror table
//! - **Annotations**: [`Joint`], [`HeadRect`], [`Person`]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::NUM_JOINTS;

// =============================================================================
// Joint identities
// =============================================================================

/// Maps every joint id to the id of its mirror image.
///
/// Applied as a gather (`out[i] = in[LEFT_RIGHT_PERM[i]]`) to target-map
/// channels and weight vectors whenever an example is flipped left-right. The
/// table is an involution.
pub const LEFT_RIGHT_PERM: [usize; NUM_JOINTS] =
    [5, 4, 3, 2, 1, 0, 6, 7, 8, 9, 15, 14, 13, 12, 11, 10];

/// The 16 canonical MPII body joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum JointId {
    /// Right ankle
    RightAnkle = 0,
    /// Right knee
    RightKnee = 1,
    /// Right hip
    RightHip = 2,
    /// Left hip
    LeftHip = 3,
    /// Left knee
    LeftKnee = 4,
    /// Left ankle
    LeftAnkle = 5,
    /// Pelvis
    Pelvis = 6,
    /// Thorax
    Thorax = 7,
    /// Upper neck
    UpperNeck = 8,
    /// Head top
    HeadTop = 9,
    /// Right wrist
    RightWrist = 10,
    /// Right elbow
    RightElbow = 11,
    /// Right shoulder
    RightShoulder = 12,
    /// Left shoulder
    LeftShoulder = 13,
    /// Left elbow
    LeftElbow = 14,
    /// Left wrist
    LeftWrist = 15,
}

impl JointId {
    /// Returns all joint ids in canonical order.
    #[must_use]
    pub fn all() -> &'static [Self; NUM_JOINTS] {
        &[
            Self::RightAnkle,
            Self::RightKnee,
            Self::RightHip,
            Self::LeftHip,
            Self::LeftKnee,
            Self::LeftAnkle,
            Self::Pelvis,
            Self::Thorax,
            Self::UpperNeck,
            Self::HeadTop,
            Self::RightWrist,
            Self::RightElbow,
            Self::RightShoulder,
            Self::LeftShoulder,
            Self::LeftElbow,
            Self::LeftWrist,
        ]
    }

    /// Canonical slot index of this joint.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the joint name as a string.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RightAnkle => "r_ankle",
            Self::RightKnee => "r_knee",
            Self::RightHip => "r_hip",
            Self::LeftHip => "l_hip",
            Self::LeftKnee => "l_knee",
            Self::LeftAnkle => "l_ankle",
            Self::Pelvis => "pelvis",
            Self::Thorax => "thorax",
            Self::UpperNeck => "upper_neck",
            Self::HeadTop => "head_top",
            Self::RightWrist => "r_wrist",
            Self::RightElbow => "r_elbow",
            Self::RightShoulder => "r_shoulder",
            Self::LeftShoulder => "l_shoulder",
            Self::LeftElbow => "l_elbow",
            Self::LeftWrist => "l_wrist",
        }
    }

    /// The joint that takes this joint's place in a left-right mirrored image.
    #[must_use]
    pub fn mirror(self) -> Self {
        Self::all()[LEFT_RIGHT_PERM[self.index()]]
    }
}

impl TryFrom<i64> for JointId {
    type Error = CoreError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::all().get(i).copied())
            .ok_or_else(|| CoreError::invalid_joint_id(value))
    }
}

impl TryFrom<usize> for JointId {
    type Error = CoreError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::all()
            .get(value)
            .copied()
            .ok_or_else(|| CoreError::invalid_joint_id(value as i64))
    }
}

impl std::fmt::Display for JointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Annotations
// =============================================================================

/// One annotated joint location.
///
/// `x` and `y` are normalised to `[0, 1]` relative to the source image's width
/// and height.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Joint {
    /// Horizontal position.
    pub x: f32,
    /// Vertical position.
    pub y: f32,
    /// `false` when the annotator marked the joint as occluded.
    pub is_visible: bool,
}

impl Joint {
    /// Creates a new joint.
    #[must_use]
    pub fn new(x: f32, y: f32, is_visible: bool) -> Self {
        Self { x, y, is_visible }
    }
}

/// Axis-aligned head rectangle in source-image pixel coordinates.
///
/// A `HeadRect` is never a single point; see [`HeadRect::new`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeadRect {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
}

impl HeadRect {
    /// Creates a head rectangle from two corners.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DegenerateRect`] when both corners coincide, and
    /// [`CoreError::Validation`] when a coordinate is not finite.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> CoreResult<Self> {
        if ![x0, y0, x1, y1].iter().all(|v| v.is_finite()) {
            return Err(CoreError::validation(format!(
                "head rectangle has non-finite corner ({x0}, {y0}, {x1}, {y1})"
            )));
        }
        if x0 == x1 && y0 == y1 {
            return Err(CoreError::DegenerateRect { x0, y0, x1, y1 });
        }
        Ok(Self { x0, y0, x1, y1 })
    }

    /// Returns the corners as `(x0, y0, x1, y1)`.
    #[must_use]
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (self.x0, self.y0, self.x1, self.y1)
    }

    /// Width in pixels (always non-negative).
    #[must_use]
    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).abs()
    }

    /// Height in pixels (always non-negative).
    #[must_use]
    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).abs()
    }

    /// Length of the rectangle's diagonal in pixels.
    #[must_use]
    pub fn diagonal(&self) -> f32 {
        self.width().hypot(self.height())
    }

    /// Returns `(min_x, min_y, max_x, max_y)` regardless of corner order.
    #[must_use]
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        (
            self.x0.min(self.x1),
            self.y0.min(self.y1),
            self.x0.max(self.x1),
            self.y0.max(self.y1),
        )
    }
}

/// One annotated person: 16 fixed-identity joint slots and a head rectangle.
///
/// A `Person` only exists with a valid head rectangle. Annotations whose
/// rectangle is missing or degenerate never produce a `Person`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Person {
    joints: [Option<Joint>; NUM_JOINTS],
    head_rect: HeadRect,
}

impl Person {
    /// Creates a person from `(id, joint)` pairs.
    ///
    /// Later pairs overwrite earlier ones with the same id.
    #[must_use]
    pub fn new<I>(joints: I, head_rect: HeadRect) -> Self
    where
        I: IntoIterator<Item = (JointId, Joint)>,
    {
        let mut slots = [None; NUM_JOINTS];
        for (id, joint) in joints {
            slots[id.index()] = Some(joint);
        }
        Self {
            joints: slots,
            head_rect,
        }
    }

    /// Creates a person with all joints absent.
    #[must_use]
    pub fn without_joints(head_rect: HeadRect) -> Self {
        Self::new(std::iter::empty(), head_rect)
    }

    /// All 16 joint slots in canonical order.
    #[must_use]
    pub fn joints(&self) -> &[Option<Joint>; NUM_JOINTS] {
        &self.joints
    }

    /// The joint in slot `id`, if annotated.
    #[must_use]
    pub fn joint(&self, id: JointId) -> Option<&Joint> {
        self.joints[id.index()].as_ref()
    }

    /// Iterates over the present joints with their ids, in canonical order.
    pub fn present_joints(&self) -> impl Iterator<Item = (JointId, &Joint)> + '_ {
        JointId::all()
            .iter()
            .zip(self.joints.iter())
            .filter_map(|(id, slot)| slot.as_ref().map(|j| (*id, j)))
    }

    /// Number of annotated joints.
    #[must_use]
    pub fn num_present(&self) -> usize {
        self.joints.iter().filter(|j| j.is_some()).count()
    }

    /// The head rectangle.
    #[must_use]
    pub fn head_rect(&self) -> &HeadRect {
        &self.head_rect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_right_perm_is_involution() {
        for i in 0..NUM_JOINTS {
            assert_eq!(LEFT_RIGHT_PERM[LEFT_RIGHT_PERM[i]], i);
        }
    }

    #[test]
    fn mirror_swaps_sides() {
        assert_eq!(JointId::RightAnkle.mirror(), JointId::LeftAnkle);
        assert_eq!(JointId::LeftWrist.mirror(), JointId::RightWrist);
        assert_eq!(JointId::RightShoulder.mirror(), JointId::LeftShoulder);
        assert_eq!(JointId::HeadTop.mirror(), JointId::HeadTop);
        assert_eq!(JointId::Pelvis.mirror(), JointId::Pelvis);
    }

    #[test]
    fn joint_id_round_trips_through_index() {
        for (i, id) in JointId::all().iter().enumerate() {
            assert_eq!(id.index(), i);
            assert_eq!(JointId::try_from(i).unwrap(), *id);
        }
        assert!(JointId::try_from(16_usize).is_err());
        assert!(JointId::try_from(-1_i64).is_err());
    }

    #[test]
    fn point_rect_is_degenerate() {
        let err = HeadRect::new(10.0, 20.0, 10.0, 20.0).unwrap_err();
        assert!(matches!(err, CoreError::DegenerateRect { .. }));
    }

    #[test]
    fn line_rect_is_not_degenerate() {
        // Zero width but non-zero height still carries scale information.
        let rect = HeadRect::new(10.0, 20.0, 10.0, 40.0).unwrap();
        assert_eq!(rect.diagonal(), 20.0);
    }

    #[test]
    fn non_finite_rect_is_rejected() {
        assert!(HeadRect::new(f32::NAN, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn rect_bounds_are_ordered() {
        let rect = HeadRect::new(50.0, 40.0, 10.0, 0.0).unwrap();
        assert_eq!(rect.bounds(), (10.0, 0.0, 50.0, 40.0));
        approx::assert_abs_diff_eq!(rect.diagonal(), 56.568542, epsilon = 1e-4);
    }

    #[test]
    fn later_joint_overwrites_earlier() {
        let rect = HeadRect::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let person = Person::new(
            [
                (JointId::Pelvis, Joint::new(0.1, 0.1, true)),
                (JointId::Pelvis, Joint::new(0.2, 0.3, false)),
            ],
            rect,
        );
        assert_eq!(person.num_present(), 1);
        assert_eq!(
            person.joint(JointId::Pelvis),
            Some(&Joint::new(0.2, 0.3, false))
        );
    }

    #[test]
    fn present_joints_follow_canonical_order() {
        let rect = HeadRect::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let person = Person::new(
            [
                (JointId::LeftWrist, Joint::new(0.9, 0.9, true)),
                (JointId::RightAnkle, Joint::new(0.1, 0.1, true)),
            ],
            rect,
        );
        let ids: Vec<JointId> = person.present_joints().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![JointId::RightAnkle, JointId::LeftWrist]);
    }
}
