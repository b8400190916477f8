//! Calibration value types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use nalgebra::{Matrix3, Vector3};

use crate::constants::ROTATION_TOLERANCE;

/// 3-vector in tracking or robot space, metres.
pub type Vec3 = Vector3<f64>;

/// 3×3 matrix.
pub type Mat3 = Matrix3<f64>;

/// One tracking-space ↔ robot-space correspondence.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationPoint {
    /// Unique within a working set.
    pub label: String,
    /// Position reported by the tracking device.
    pub tracking: Vec3,
    /// Same physical position in the robot workspace.
    pub robot: Vec3,
}

impl CalibrationPoint {
    /// Build a point from plain arrays.
    pub fn new(label: impl Into<String>, tracking: [f64; 3], robot: [f64; 3]) -> Self {
        Self {
            label: label.into(),
            tracking: Vec3::from(tracking),
            robot: Vec3::from(robot),
        }
    }
}

/// Similarity transform: `robot = scale · rotation · tracking + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Proper rotation (orthonormal, det = +1).
    pub rotation: Mat3,
    /// Uniform scale, > 0.
    pub scale: f64,
    /// Translation in robot space.
    pub translation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    /// Identity mapping.
    pub fn identity() -> Self {
        Self {
            rotation: Mat3::identity(),
            scale: 1.0,
            translation: Vec3::zeros(),
        }
    }

    /// Map a tracking-space point into robot space.
    pub fn apply(&self, tracking: &Vec3) -> Vec3 {
        self.rotation * tracking * self.scale + self.translation
    }

    /// Robot space back to tracking space.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        let scale = 1.0 / self.scale;
        Self {
            rotation,
            scale,
            translation: -(rotation * self.translation) * scale,
        }
    }

    /// Check the structural invariants.
    ///
    /// Returns the first violation found.
    pub fn check(&self) -> Result<(), String> {
        if self.rotation.iter().any(|v| !v.is_finite())
            || self.translation.iter().any(|v| !v.is_finite())
            || !self.scale.is_finite()
        {
            return Err("transform contains non-finite values".to_string());
        }
        if self.scale <= 0.0 {
            return Err(format!("scale {} is not positive", self.scale));
        }
        let drift = (self.rotation.transpose() * self.rotation - Mat3::identity()).amax();
        if drift > ROTATION_TOLERANCE {
            return Err(format!("rotation is not orthonormal (error {drift:e})"));
        }
        let det = self.rotation.determinant();
        if (det - 1.0).abs() > ROTATION_TOLERANCE {
            return Err(format!("rotation determinant is {det}, expected +1"));
        }
        Ok(())
    }
}

/// How the tracking points fill space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointSpread {
    /// Points span all three dimensions.
    Volumetric,
    /// Points lie in a plane. Solvable, but rotation about the plane is
    /// constrained only by the reflection correction; add an off-plane
    /// point for a robust fit.
    Planar,
}

/// Residual of one point under the solved transform.
#[derive(Debug, Clone, PartialEq)]
pub struct PointResidual {
    /// Point label.
    pub label: String,
    /// Distance between predicted and paired robot coordinates, metres.
    pub distance: f64,
}

/// Output of `compute_transform`; not in effect until committed.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    /// Solved transform.
    pub transform: Transform,
    /// Per-point residuals, in working-set order.
    pub residuals: Vec<PointResidual>,
    /// Root-mean-square of the residual distances.
    pub rms_error: f64,
    /// Dimensionality of the tracking points.
    pub spread: PointSpread,
    pub(crate) revision: u64,
}

impl CalibrationResult {
    /// Largest residual distance.
    pub fn max_residual(&self) -> f64 {
        self.residuals
            .iter()
            .map(|r| r.distance)
            .fold(0.0, f64::max)
    }
}

/// A named, committed calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationProfile {
    /// Profile name (also its store key).
    pub name: String,
    /// Correspondences the transform was solved from.
    pub points: Vec<CalibrationPoint>,
    /// Committed transform.
    pub transform: Transform,
    /// RMS error at solve time.
    pub rms_error: f64,
    /// Commit time.
    pub created_at: DateTime<Utc>,
}

impl CalibrationProfile {
    /// Map a tracking-space point through this profile.
    pub fn apply(&self, tracking: &Vec3) -> Vec3 {
        self.transform.apply(tracking)
    }
}

/// Shared handle to the profile currently in effect.
pub type ActiveProfile = Option<Arc<CalibrationProfile>>;
