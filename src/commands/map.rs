//! Map one tracking-space point into robot space.
//!
//! Used to spot-check a profile: touch a known robot position, read the
//! tracked fingertip, and compare.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::calibration::{CalibrationEngine, CalibrationStore, Vec3};

/// Predicted robot coordinate of `tracking` under profile `name`.
pub fn run(store: &CalibrationStore, name: Option<&str>, tracking: [f64; 3]) -> Result<Vec3> {
    let name = name.context("No profile selected; pass --profile or activate one")?;
    let engine = CalibrationEngine::new();
    engine.activate(Arc::new(store.load(name)?));

    let robot = engine.validate(Vec3::from(tracking))?;
    println!(
        "[{:.4}, {:.4}, {:.4}] -> [{:.4}, {:.4}, {:.4}] ({})",
        tracking[0], tracking[1], tracking[2], robot.x, robot.y, robot.z, name
    );
    Ok(robot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationPoint, CalibrationProfile, Mat3, Transform};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_map_through_saved_profile() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        store
            .save(&CalibrationProfile {
                name: "shifted".to_string(),
                points: vec![
                    CalibrationPoint::new("a", [0.0, 0.0, 0.0], [2.0, 0.0, 0.0]),
                    CalibrationPoint::new("b", [1.0, 0.0, 0.0], [4.0, 0.0, 0.0]),
                    CalibrationPoint::new("c", [0.0, 1.0, 0.0], [2.0, 2.0, 0.0]),
                    CalibrationPoint::new("d", [0.0, 0.0, 1.0], [2.0, 0.0, 2.0]),
                ],
                transform: Transform {
                    rotation: Mat3::identity(),
                    scale: 2.0,
                    translation: Vec3::new(2.0, 0.0, 0.0),
                },
                rms_error: 0.0,
                created_at: Utc::now(),
            })
            .unwrap();

        let robot = run(&store, Some("shifted"), [1.0, 1.0, 1.0]).unwrap();
        assert!((robot - Vec3::new(4.0, 2.0, 2.0)).norm() < 1e-12);
    }

    #[test]
    fn test_map_requires_profile() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        assert!(run(&store, None, [0.0; 3]).is_err());
        assert!(run(&store, Some("missing"), [0.0; 3]).is_err());
    }
}
