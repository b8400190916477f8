//! Tracking-space to robot-space calibration.
//!
//! The operator touches a handful of known robot positions with a tracked
//! fingertip; each pair becomes a [`CalibrationPoint`]. From four or more
//! of them the [`CalibrationEngine`] solves a similarity transform, the
//! operator reviews residuals and spot-checks with `validate`, and the
//! committed result is persisted as a named profile by [`CalibrationStore`].
//!
//! ```text
//! begin_calibration ─► add_point ×N ─► compute_transform ─► commit ─► CalibrationStore::save
//!                                              │                 │
//!                                       residuals, RMS     validate(tracking) → robot
//! ```

pub mod engine;
pub mod solver;
pub mod store;
pub mod types;

pub use engine::{CalibrationEngine, DEFAULT_PROFILE_NAME};
pub use solver::{point_spread, solve_similarity};
pub use store::{validate_name, CalibrationStore};
pub use types::{
    ActiveProfile, CalibrationPoint, CalibrationProfile, CalibrationResult, Mat3, PointResidual,
    PointSpread, Transform, Vec3,
};
