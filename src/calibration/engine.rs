//! Interactive calibration session.
//!
//! The engine keeps a working set of correspondences, solves a transform
//! from it on request and, once the operator accepts the result, commits
//! it as the active profile. The active profile is swapped as one `Arc`,
//! so `validate` and other readers see either the old or the new transform.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;

use super::solver::solve_similarity;
use super::store::CalibrationStore;
use super::types::{
    ActiveProfile, CalibrationPoint, CalibrationProfile, CalibrationResult, PointSpread, Vec3,
};
use crate::error::{CalibrationError, PersistenceError};

/// Name used when points are collected without `begin_calibration`.
pub const DEFAULT_PROFILE_NAME: &str = "default";

#[derive(Debug, Default)]
struct WorkingSet {
    name: Option<String>,
    points: Vec<CalibrationPoint>,
    revision: u64,
}

impl WorkingSet {
    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

/// Point collection, solving and the committed transform.
#[derive(Debug, Default)]
pub struct CalibrationEngine {
    working: Mutex<WorkingSet>,
    computing: AtomicBool,
    active: RwLock<ActiveProfile>,
}

impl CalibrationEngine {
    /// Engine with an empty working set and no active profile.
    pub fn new() -> Self {
        Self::default()
    }

    fn working(&self) -> MutexGuard<'_, WorkingSet> {
        self.working.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new session named `name`, clearing the working set.
    ///
    /// The active profile is untouched.
    pub fn begin_calibration(&self, name: impl Into<String>) {
        let name = name.into();
        let mut working = self.working();
        working.points.clear();
        working.name = Some(name.clone());
        working.touch();
        log::info!("Calibration '{}' started", name);
    }

    /// Name of the current session.
    pub fn session_name(&self) -> Option<String> {
        self.working().name.clone()
    }

    /// Append a correspondence.
    pub fn add_point(
        &self,
        label: impl Into<String>,
        tracking: Vec3,
        robot: Vec3,
    ) -> Result<(), CalibrationError> {
        let label = label.into();
        let mut working = self.working();
        if working.points.iter().any(|p| p.label == label) {
            return Err(CalibrationError::DuplicateLabel(label));
        }
        log::debug!("Calibration point '{}' added", label);
        working.points.push(CalibrationPoint {
            label,
            tracking,
            robot,
        });
        working.touch();
        Ok(())
    }

    /// Remove the point labelled `label` and return it.
    pub fn remove_point(&self, label: &str) -> Result<CalibrationPoint, CalibrationError> {
        let mut working = self.working();
        let index = working
            .points
            .iter()
            .position(|p| p.label == label)
            .ok_or_else(|| CalibrationError::UnknownLabel(label.to_string()))?;
        let point = working.points.remove(index);
        working.touch();
        Ok(point)
    }

    /// Copy of the working set.
    pub fn points(&self) -> Vec<CalibrationPoint> {
        self.working().points.clone()
    }

    /// Number of points in the working set.
    pub fn point_count(&self) -> usize {
        self.working().points.len()
    }

    /// Solve a transform from the working set.
    ///
    /// Works on a snapshot, so points may be edited while the solve runs;
    /// such a result is then rejected by [`commit`](Self::commit). Only one
    /// computation may run at a time.
    pub fn compute_transform(&self) -> Result<CalibrationResult, CalibrationError> {
        if self
            .computing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CalibrationError::ComputeBusy);
        }
        let _release = scopeguard::guard(&self.computing, |flag| {
            flag.store(false, Ordering::Release);
        });

        let (points, revision) = {
            let working = self.working();
            (working.points.clone(), working.revision)
        };
        let mut result = solve_similarity(&points)?;
        result.revision = revision;

        if result.spread == PointSpread::Planar {
            log::warn!("Calibration points are coplanar; add an off-plane point before committing");
        }
        log::info!(
            "Transform solved from {} points: scale {:.4}, RMS {:.4} m",
            points.len(),
            result.transform.scale,
            result.rms_error
        );
        Ok(result)
    }

    /// Make `result` the active transform and return the new profile.
    ///
    /// Fails with `StaleResult` when the working set changed after the
    /// result was computed, and with `DegenerateConfiguration` for a
    /// coplanar result: it fits the plane but says nothing off it.
    pub fn commit(
        &self,
        result: &CalibrationResult,
    ) -> Result<Arc<CalibrationProfile>, CalibrationError> {
        if result.spread == PointSpread::Planar {
            return Err(CalibrationError::DegenerateConfiguration(
                "tracking points are coplanar; add an off-plane point before committing"
                    .to_string(),
            ));
        }
        let profile = {
            let working = self.working();
            if working.revision != result.revision {
                return Err(CalibrationError::StaleResult);
            }
            Arc::new(CalibrationProfile {
                name: working
                    .name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string()),
                points: working.points.clone(),
                transform: result.transform,
                rms_error: result.rms_error,
                created_at: Utc::now(),
            })
        };
        self.activate(Arc::clone(&profile));
        Ok(profile)
    }

    /// Install a profile (typically loaded from the store) as active.
    pub fn activate(&self, profile: Arc<CalibrationProfile>) {
        log::info!("Calibration profile '{}' active", profile.name);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(profile);
    }

    /// Load profile `name` from `store` and make it active.
    ///
    /// Any active profile is dropped first, so a failed load leaves no
    /// transform in effect rather than a stale or identity one.
    pub fn load_profile(
        &self,
        store: &CalibrationStore,
        name: &str,
    ) -> Result<Arc<CalibrationProfile>, PersistenceError> {
        self.deactivate();
        let profile = Arc::new(store.load(name)?);
        self.activate(Arc::clone(&profile));
        Ok(profile)
    }

    /// Drop the active profile.
    pub fn deactivate(&self) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Profile currently in effect.
    pub fn active_profile(&self) -> ActiveProfile {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Predicted robot coordinate for `tracking` under the active transform.
    pub fn validate(&self, tracking: Vec3) -> Result<Vec3, CalibrationError> {
        self.active_profile()
            .map(|profile| profile.apply(&tracking))
            .ok_or(CalibrationError::NoActiveTransform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_pyramid(engine: &CalibrationEngine, offset: Vec3) {
        let pts = [
            [0.0, 0.0, 0.0],
            [0.2, 0.0, 0.0],
            [0.0, 0.2, 0.0],
            [0.2, 0.2, 0.0],
            [0.1, 0.1, 0.3],
        ];
        for (i, p) in pts.into_iter().enumerate() {
            let tracking = Vec3::from(p);
            engine
                .add_point(format!("p{i}"), tracking, tracking + offset)
                .unwrap();
        }
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let engine = CalibrationEngine::new();
        engine.add_point("a", Vec3::zeros(), Vec3::zeros()).unwrap();
        assert_eq!(
            engine.add_point("a", Vec3::x(), Vec3::x()),
            Err(CalibrationError::DuplicateLabel("a".into()))
        );
        assert_eq!(engine.point_count(), 1);
    }

    #[test]
    fn test_begin_clears_working_set() {
        let engine = CalibrationEngine::new();
        square_pyramid(&engine, Vec3::zeros());
        engine.begin_calibration("desk");
        assert_eq!(engine.point_count(), 0);
        assert_eq!(engine.session_name().as_deref(), Some("desk"));
    }

    #[test]
    fn test_remove_point() {
        let engine = CalibrationEngine::new();
        square_pyramid(&engine, Vec3::zeros());
        let removed = engine.remove_point("p4").unwrap();
        assert_eq!(removed.label, "p4");
        assert_eq!(engine.point_count(), 4);
        assert_eq!(
            engine.remove_point("p4"),
            Err(CalibrationError::UnknownLabel("p4".into()))
        );
    }

    #[test]
    fn test_compute_does_not_activate() {
        let engine = CalibrationEngine::new();
        square_pyramid(&engine, Vec3::new(1.0, 0.0, 0.0));
        let result = engine.compute_transform().unwrap();
        assert!((result.transform.translation - Vec3::new(1.0, 0.0, 0.0)).norm() < 1e-9);
        assert_eq!(
            engine.validate(Vec3::zeros()),
            Err(CalibrationError::NoActiveTransform)
        );
    }

    #[test]
    fn test_commit_then_validate() {
        let engine = CalibrationEngine::new();
        engine.begin_calibration("bench");
        square_pyramid(&engine, Vec3::new(0.0, 0.5, 0.0));
        let result = engine.compute_transform().unwrap();
        let profile = engine.commit(&result).unwrap();

        assert_eq!(profile.name, "bench");
        assert_eq!(profile.points.len(), 5);
        let predicted = engine.validate(Vec3::new(0.1, 0.1, 0.1)).unwrap();
        assert!((predicted - Vec3::new(0.1, 0.6, 0.1)).norm() < 1e-9);
    }

    #[test]
    fn test_commit_after_edit_is_stale() {
        let engine = CalibrationEngine::new();
        square_pyramid(&engine, Vec3::zeros());
        let result = engine.compute_transform().unwrap();
        engine
            .add_point("late", Vec3::new(0.5, 0.5, 0.5), Vec3::new(0.5, 0.5, 0.5))
            .unwrap();
        assert_eq!(engine.commit(&result), Err(CalibrationError::StaleResult));
        assert!(engine.active_profile().is_none());
    }

    #[test]
    fn test_coplanar_result_cannot_be_committed() {
        let engine = CalibrationEngine::new();
        square_pyramid(&engine, Vec3::zeros());
        engine.remove_point("p4").unwrap();
        let result = engine.compute_transform().unwrap();
        assert_eq!(result.spread, PointSpread::Planar);

        assert!(matches!(
            engine.commit(&result),
            Err(CalibrationError::DegenerateConfiguration(reason)) if reason.contains("coplanar")
        ));
        assert!(engine.active_profile().is_none());

        engine
            .add_point("apex", Vec3::new(0.1, 0.1, 0.3), Vec3::new(0.1, 0.1, 0.3))
            .unwrap();
        let result = engine.compute_transform().unwrap();
        assert!(engine.commit(&result).is_ok());
    }

    #[test]
    fn test_failed_profile_load_leaves_no_transform() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        let engine = CalibrationEngine::new();
        engine.begin_calibration("bench");
        square_pyramid(&engine, Vec3::new(1.0, 0.0, 0.0));
        let result = engine.compute_transform().unwrap();
        let profile = engine.commit(&result).unwrap();
        store.save(&profile).unwrap();

        engine.deactivate();
        let loaded = engine.load_profile(&store, "bench").unwrap();
        assert_eq!(*loaded, *profile);
        assert!(engine.active_profile().is_some());

        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let err = engine.load_profile(&store, "broken").unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt { .. }), "{err:?}");
        assert!(engine.active_profile().is_none());
        assert!(matches!(
            engine.validate(Vec3::zeros()),
            Err(CalibrationError::NoActiveTransform)
        ));

        engine.activate(loaded);
        let err = engine.load_profile(&store, "missing").unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)), "{err:?}");
        assert!(engine.active_profile().is_none());
    }

    #[test]
    fn test_overlapping_compute_is_busy() {
        let engine = CalibrationEngine::new();
        square_pyramid(&engine, Vec3::zeros());
        engine.computing.store(true, Ordering::Release);
        assert_eq!(
            engine.compute_transform().map(|_| ()),
            Err(CalibrationError::ComputeBusy)
        );
        engine.computing.store(false, Ordering::Release);
        assert!(engine.compute_transform().is_ok());
    }

    #[test]
    fn test_busy_flag_released_after_failure() {
        let engine = CalibrationEngine::new();
        engine.add_point("only", Vec3::zeros(), Vec3::zeros()).unwrap();
        assert!(matches!(
            engine.compute_transform(),
            Err(CalibrationError::InsufficientPoints { got: 1, .. })
        ));
        assert!(!engine.computing.load(Ordering::Acquire));
    }

    #[test]
    fn test_concurrent_computes_never_corrupt() {
        let engine = Arc::new(CalibrationEngine::new());
        square_pyramid(&engine, Vec3::zeros());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.compute_transform())
            })
            .collect();
        for handle in handles {
            match handle.join().unwrap() {
                Ok(result) => assert!(result.rms_error < 1e-9),
                Err(e) => assert_eq!(e, CalibrationError::ComputeBusy),
            }
        }
        assert!(!engine.computing.load(Ordering::Acquire));
    }

    #[test]
    fn test_deactivate() {
        let engine = CalibrationEngine::new();
        square_pyramid(&engine, Vec3::zeros());
        let result = engine.compute_transform().unwrap();
        engine.commit(&result).unwrap();
        engine.deactivate();
        assert!(engine.active_profile().is_none());
    }
}
