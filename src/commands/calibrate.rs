//! Calibration command.
//!
//! Reads correspondences from a JSON file, solves the transform, prints the
//! residuals, and saves the result as a named profile.
//!
//! # Points file
//!
//! ```json
//! [
//!   { "label": "base",  "tracking": [0.01, 0.92, -0.30], "robot": [0.30, 0.00, 0.05] },
//!   { "label": "left",  "tracking": [-0.19, 0.93, -0.31], "robot": [0.30, 0.20, 0.05] }
//! ]
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::calibration::{
    validate_name, CalibrationEngine, CalibrationProfile, CalibrationResult, CalibrationStore,
    PointSpread, Vec3,
};
use crate::config::Config;

#[derive(Debug, Deserialize)]
struct PointEntry {
    label: String,
    tracking: [f64; 3],
    robot: [f64; 3],
}

/// Load every correspondence of `file` into a fresh session of `engine`.
pub fn load_points(engine: &CalibrationEngine, name: &str, file: &str) -> Result<usize> {
    let path = shellexpand::tilde(file);
    let content = fs::read_to_string(Path::new(path.as_ref()))
        .with_context(|| format!("Failed to read {}", file))?;
    let entries: Vec<PointEntry> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as a list of points", file))?;

    engine.begin_calibration(name);
    for entry in entries {
        engine
            .add_point(
                entry.label,
                Vec3::from(entry.tracking),
                Vec3::from(entry.robot),
            )
            .with_context(|| format!("Invalid point in {}", file))?;
    }
    Ok(engine.point_count())
}

/// Solve, commit and save profile `name` from `points_file`.
///
/// With `activate`, the profile also becomes the configured active profile
/// in `config_dir`.
pub fn run(
    config_dir: &Path,
    name: &str,
    points_file: &str,
    activate: bool,
) -> Result<Arc<CalibrationProfile>> {
    validate_name(name)?;
    let engine = CalibrationEngine::new();
    let count = load_points(&engine, name, points_file)?;
    log::info!("Loaded {} calibration points from {}", count, points_file);

    let result = engine.compute_transform()?;
    print_result(name, &result);

    let profile = engine.commit(&result)?;
    let store = CalibrationStore::in_config_dir(config_dir);
    let path = store.save(&profile)?;
    println!("Saved to {}", path.display());

    if activate {
        let mut config = Config::load_from(config_dir)?;
        config.active_profile = Some(profile.name.clone());
        config.save_to(config_dir)?;
        println!("Profile '{}' is now active", profile.name);
    }
    Ok(profile)
}

fn print_result(name: &str, result: &CalibrationResult) {
    let spread = match result.spread {
        PointSpread::Volumetric => "volumetric",
        PointSpread::Planar => "planar",
    };
    println!(
        "Calibration '{}' from {} points ({})",
        name,
        result.residuals.len(),
        spread
    );
    let width = result
        .residuals
        .iter()
        .map(|r| r.label.len())
        .max()
        .unwrap_or(0);
    for r in &result.residuals {
        println!("  {:<width$}  {:.4} m", r.label, r.distance, width = width);
    }
    println!("Scale: {:.4}", result.transform.scale);
    println!("RMS error: {:.4} m (max {:.4} m)", result.rms_error, result.max_residual());
    if result.spread == PointSpread::Planar {
        println!("Points are coplanar; add an off-plane point before this can be saved");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const POINTS: &str = r#"[
        {"label": "a", "tracking": [0.0, 0.0, 0.0], "robot": [1.0, 2.0, 3.0]},
        {"label": "b", "tracking": [0.2, 0.0, 0.0], "robot": [1.2, 2.0, 3.0]},
        {"label": "c", "tracking": [0.0, 0.2, 0.0], "robot": [1.0, 2.2, 3.0]},
        {"label": "d", "tracking": [0.0, 0.0, 0.2], "robot": [1.0, 2.0, 3.2]},
        {"label": "e", "tracking": [0.1, 0.1, 0.1], "robot": [1.1, 2.1, 3.1]}
    ]"#;

    fn write_points(dir: &TempDir, content: &str) -> String {
        let path = dir.path().join("points.json");
        fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_calibrate_saves_profile() {
        let dir = TempDir::new().unwrap();
        let points = write_points(&dir, POINTS);

        let profile = run(dir.path(), "bench", &points, false).unwrap();
        assert_eq!(profile.name, "bench");
        assert!(profile.rms_error < 1e-9);

        let store = CalibrationStore::in_config_dir(dir.path());
        assert_eq!(store.load("bench").unwrap(), *profile);
        assert!(Config::load_from(dir.path()).unwrap().active_profile.is_none());
    }

    #[test]
    fn test_calibrate_activate_updates_config() {
        let dir = TempDir::new().unwrap();
        let points = write_points(&dir, POINTS);

        run(dir.path(), "bench", &points, true).unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.active_profile.as_deref(), Some("bench"));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let dir = TempDir::new().unwrap();
        let points = write_points(
            &dir,
            r#"[
                {"label": "a", "tracking": [0, 0, 0], "robot": [0, 0, 0]},
                {"label": "a", "tracking": [1, 0, 0], "robot": [1, 0, 0]}
            ]"#,
        );
        let err = run(dir.path(), "bench", &points, false).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate"), "{err:#}");
    }

    #[test]
    fn test_too_few_points_not_saved() {
        let dir = TempDir::new().unwrap();
        let points = write_points(
            &dir,
            r#"[{"label": "a", "tracking": [0, 0, 0], "robot": [0, 0, 0]}]"#,
        );
        assert!(run(dir.path(), "bench", &points, false).is_err());
        assert!(!CalibrationStore::in_config_dir(dir.path()).exists("bench"));
    }

    #[test]
    fn test_coplanar_points_not_saved() {
        let dir = TempDir::new().unwrap();
        let points = write_points(
            &dir,
            r#"[
                {"label": "a", "tracking": [0, 0, 0], "robot": [0, 0, 0]},
                {"label": "b", "tracking": [1, 0, 0], "robot": [1, 0, 0]},
                {"label": "c", "tracking": [0, 1, 0], "robot": [0, 1, 0]},
                {"label": "d", "tracking": [1, 1, 0], "robot": [1, 1, 0]}
            ]"#,
        );
        let err = run(dir.path(), "flat", &points, true).unwrap_err();
        assert!(format!("{err:#}").contains("coplanar"), "{err:#}");
        assert!(!CalibrationStore::in_config_dir(dir.path()).exists("flat"));
        assert!(Config::load_from(dir.path()).unwrap().active_profile.is_none());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let dir = TempDir::new().unwrap();
        let points = write_points(&dir, POINTS);
        assert!(run(dir.path(), "../escape", &points, false).is_err());
    }
}
