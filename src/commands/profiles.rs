//! Saved profile management.

use anyhow::Result;

use crate::calibration::{CalibrationProfile, CalibrationStore};

/// Print saved profile names, marking `active`.
pub fn list(store: &CalibrationStore, active: Option<&str>) -> Result<Vec<String>> {
    let names = store.list()?;
    if names.is_empty() {
        println!("No saved profiles in {}", store.dir().display());
    }
    for name in &names {
        let marker = if Some(name.as_str()) == active { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(names)
}

/// Print one profile's transform and points.
pub fn show(store: &CalibrationStore, name: &str) -> Result<CalibrationProfile> {
    let profile = store.load(name)?;
    let t = &profile.transform;

    println!("Profile:  {}", profile.name);
    println!("Created:  {}", profile.created_at.to_rfc3339());
    println!("RMS:      {:.4} m", profile.rms_error);
    println!("Scale:    {:.6}", t.scale);
    println!(
        "Translation: [{:.4}, {:.4}, {:.4}]",
        t.translation.x, t.translation.y, t.translation.z
    );
    println!("Rotation:");
    for row in t.rotation.row_iter() {
        println!("  [{:>9.6}, {:>9.6}, {:>9.6}]", row[0], row[1], row[2]);
    }
    println!("Points:");
    for p in &profile.points {
        let predicted = profile.apply(&p.tracking);
        println!(
            "  {}: tracking [{:.4}, {:.4}, {:.4}] -> robot [{:.4}, {:.4}, {:.4}] (residual {:.4} m)",
            p.label,
            p.tracking.x,
            p.tracking.y,
            p.tracking.z,
            p.robot.x,
            p.robot.y,
            p.robot.z,
            (predicted - p.robot).norm()
        );
    }
    Ok(profile)
}

/// Delete profile `name`.
pub fn delete(store: &CalibrationStore, name: &str) -> Result<()> {
    store.delete(name)?;
    println!("Deleted profile '{}'", name);
    Ok(())
}
