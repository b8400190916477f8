//! Canonical hand skeleton layouts.
//!
//! The joint count and order are defined by the tracking provider. The
//! layout is picked once per process and fixes the length of every
//! [`HandFrame`](super::HandFrame) and the width of its tracked mask.

use serde::{Deserialize, Serialize};

/// visionOS hand skeleton joint names, in provider order.
const VISION_OS_JOINTS: [&str; 27] = [
    "wrist",
    "thumb-knuckle",
    "thumb-intermediate-base",
    "thumb-intermediate-tip",
    "thumb-tip",
    "index-metacarpal",
    "index-knuckle",
    "index-intermediate-base",
    "index-intermediate-tip",
    "index-tip",
    "middle-metacarpal",
    "middle-knuckle",
    "middle-intermediate-base",
    "middle-intermediate-tip",
    "middle-tip",
    "ring-metacarpal",
    "ring-knuckle",
    "ring-intermediate-base",
    "ring-intermediate-tip",
    "ring-tip",
    "little-metacarpal",
    "little-knuckle",
    "little-intermediate-base",
    "little-intermediate-tip",
    "little-tip",
    "forearm-wrist",
    "forearm-arm",
];

/// XR_EXT_hand_tracking joint names, in provider order.
const OPEN_XR_JOINTS: [&str; 26] = [
    "palm",
    "wrist",
    "thumb-metacarpal",
    "thumb-proximal",
    "thumb-distal",
    "thumb-tip",
    "index-metacarpal",
    "index-proximal",
    "index-intermediate",
    "index-distal",
    "index-tip",
    "middle-metacarpal",
    "middle-proximal",
    "middle-intermediate",
    "middle-distal",
    "middle-tip",
    "ring-metacarpal",
    "ring-proximal",
    "ring-intermediate",
    "ring-distal",
    "ring-tip",
    "little-metacarpal",
    "little-proximal",
    "little-intermediate",
    "little-distal",
    "little-tip",
];

/// Joint layout of the tracking provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkeletonLayout {
    /// visionOS `HandSkeleton`: 27 joints including two forearm joints.
    #[default]
    VisionOs,
    /// OpenXR `XR_EXT_hand_tracking`: 26 joints including the palm.
    OpenXr,
}

impl SkeletonLayout {
    /// Number of joints per hand.
    #[must_use]
    pub fn joint_count(self) -> usize {
        self.joint_names().len()
    }

    /// Joint names in provider order.
    #[must_use]
    pub fn joint_names(self) -> &'static [&'static str] {
        match self {
            Self::VisionOs => &VISION_OS_JOINTS,
            Self::OpenXr => &OPEN_XR_JOINTS,
        }
    }

    /// Name of joint `index`, if in range.
    #[must_use]
    pub fn joint_name(self, index: usize) -> Option<&'static str> {
        self.joint_names().get(index).copied()
    }

    /// Index of the joint called `name`.
    #[must_use]
    pub fn joint_index(self, name: &str) -> Option<usize> {
        self.joint_names().iter().position(|n| *n == name)
    }

    /// Mask with one bit set per joint.
    #[must_use]
    pub fn full_mask(self) -> u32 {
        // joint_count <= 32 for every layout
        if self.joint_count() == 32 {
            u32::MAX
        } else {
            (1u32 << self.joint_count()) - 1
        }
    }
}

impl std::fmt::Display for SkeletonLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VisionOs => write!(f, "vision_os"),
            Self::OpenXr => write!(f, "open_xr"),
        }
    }
}

impl std::str::FromStr for SkeletonLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "vision_os" | "visionos" => Ok(Self::VisionOs),
            "open_xr" | "openxr" => Ok(Self::OpenXr),
            other => Err(format!("unknown skeleton '{other}' (vision_os, open_xr)")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joint_counts() {
        assert_eq!(SkeletonLayout::VisionOs.joint_count(), 27);
        assert_eq!(SkeletonLayout::OpenXr.joint_count(), 26);
    }

    #[test]
    fn test_full_mask_all_joints_tracked() {
        // Receivers read 134217727 as "all 27 joints tracked".
        assert_eq!(SkeletonLayout::VisionOs.full_mask(), (1 << 27) - 1);
        assert_eq!(SkeletonLayout::OpenXr.full_mask().count_ones(), 26);
    }

    #[test]
    fn test_joint_lookup() {
        let layout = SkeletonLayout::VisionOs;
        assert_eq!(layout.joint_name(0), Some("wrist"));
        assert_eq!(layout.joint_index("index-tip"), Some(9));
        assert_eq!(layout.joint_name(27), None);
    }

    #[test]
    fn test_parse_layout() {
        assert_eq!("vision_os".parse(), Ok(SkeletonLayout::VisionOs));
        assert_eq!("OpenXR".parse(), Ok(SkeletonLayout::OpenXr));
        assert_eq!("open-xr".parse(), Ok(SkeletonLayout::OpenXr));
        assert!("leap".parse::<SkeletonLayout>().is_err());
    }

    #[test]
    fn test_joint_names_unique() {
        for layout in [SkeletonLayout::VisionOs, SkeletonLayout::OpenXr] {
            let mut names = layout.joint_names().to_vec();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), layout.joint_count(), "{layout}");
        }
    }
}
