//! Immutable per-hand joint snapshots.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::SkeletonLayout;
use crate::error::EncodingError;

/// Left- or right-hand designation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chirality {
    /// Operator's left hand.
    Left,
    /// Operator's right hand.
    Right,
}

impl Chirality {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl std::fmt::Display for Chirality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One joint of one hand at capture time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointSample {
    /// Joint name from the skeleton layout.
    pub name: &'static str,
    /// Position in tracking space, meters.
    pub position: [f32; 3],
    /// Whether the provider had valid pose data for this joint.
    pub tracked: bool,
}

/// Bitfield where bit `i` is set iff joint `i` is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TrackedMask(u32);

impl TrackedMask {
    /// Wrap raw mask bits.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Build a mask from per-joint tracked flags.
    #[must_use]
    pub fn from_flags(flags: impl IntoIterator<Item = bool>) -> Self {
        let bits = flags
            .into_iter()
            .enumerate()
            .filter(|(_, tracked)| *tracked)
            .fold(0u32, |acc, (i, _)| acc | (1 << i));
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether joint `index` is tracked.
    #[must_use]
    pub fn is_tracked(self, index: usize) -> bool {
        index < 32 && self.0 & (1 << index) != 0
    }

    /// Number of tracked joints.
    #[must_use]
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// `true` when no joint is tracked (hand lost).
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// All joints of one hand for one tracking update.
///
/// Built atomically by [`HandFrame::new`] and never mutated afterwards;
/// shared as `Arc<HandFrame>` between capture and transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct HandFrame {
    chirality: Chirality,
    timestamp: f64,
    joints: Vec<JointSample>,
    tracked_mask: TrackedMask,
}

impl HandFrame {
    /// Build a frame from per-joint positions and tracked flags.
    ///
    /// Fails when the number of joints differs from the layout.
    pub fn new(
        layout: SkeletonLayout,
        chirality: Chirality,
        timestamp: f64,
        joints: impl IntoIterator<Item = ([f32; 3], bool)>,
    ) -> Result<Self, EncodingError> {
        let names = layout.joint_names();
        let joints: Vec<JointSample> = joints
            .into_iter()
            .zip(names.iter().chain(std::iter::repeat(&"")))
            .map(|((position, tracked), name)| JointSample {
                name: *name,
                position,
                tracked,
            })
            .collect();

        if joints.len() != names.len() {
            return Err(EncodingError::SerializationFailed(format!(
                "{} hand has {} joints, {} layout expects {}",
                chirality,
                joints.len(),
                layout,
                names.len()
            )));
        }

        let tracked_mask = TrackedMask::from_flags(joints.iter().map(|j| j.tracked));
        Ok(Self {
            chirality,
            timestamp,
            joints,
            tracked_mask,
        })
    }

    /// Which hand.
    pub fn chirality(&self) -> Chirality {
        self.chirality
    }

    /// Provider capture time, seconds.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Joints in layout order.
    pub fn joints(&self) -> &[JointSample] {
        &self.joints
    }

    /// Tracked bit per joint.
    pub fn tracked_mask(&self) -> TrackedMask {
        self.tracked_mask
    }

    /// `true` when at least one joint is tracked.
    pub fn is_tracked(&self) -> bool {
        !self.tracked_mask.is_empty()
    }
}

/// Latest frame per hand, stamped with the time it was taken for sending.
///
/// The two frames may carry different capture timestamps.
#[derive(Debug, Clone, Default)]
pub struct CombinedFrame {
    /// Send-time timestamp, seconds since the Unix epoch.
    pub timestamp: f64,
    /// Most recent left-hand frame, if any was ever captured.
    pub left: Option<Arc<HandFrame>>,
    /// Most recent right-hand frame, if any was ever captured.
    pub right: Option<Arc<HandFrame>>,
}

impl CombinedFrame {
    /// `true` when neither hand has produced a frame yet.
    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}
