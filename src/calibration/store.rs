//! Named calibration profiles on disk.
//!
//! One pretty-printed JSON file per profile under `<config_dir>/profiles/`:
//!
//! ```json
//! {
//!   "name": "desk",
//!   "points": [{ "label": "a", "tracking": [0.0, 0.0, 0.0], "robot": [0.1, 0.2, 0.3] }],
//!   "transform": {
//!     "rotation": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
//!     "scale": 1.0,
//!     "translation": [0.1, 0.2, 0.3]
//!   },
//!   "rmsError": 0.0,
//!   "createdAt": "2024-06-10T12:00:00Z"
//! }
//! ```
//!
//! Rotation is stored row-major. Saves go through a temporary file that is
//! synced and then renamed over the target, so a crash leaves either the
//! old or the new profile and never a partial one.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::solver::point_spread;
use super::types::{CalibrationPoint, CalibrationProfile, Mat3, PointSpread, Transform, Vec3};
use crate::constants::MIN_CALIBRATION_POINTS;
use crate::error::PersistenceError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileFile {
    name: String,
    points: Vec<PointFile>,
    transform: TransformFile,
    rms_error: f64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PointFile {
    label: String,
    tracking: [f64; 3],
    robot: [f64; 3],
}

#[derive(Debug, Serialize, Deserialize)]
struct TransformFile {
    rotation: [[f64; 3]; 3],
    scale: f64,
    translation: [f64; 3],
}

impl From<&CalibrationProfile> for ProfileFile {
    fn from(profile: &CalibrationProfile) -> Self {
        let r = &profile.transform.rotation;
        Self {
            name: profile.name.clone(),
            points: profile
                .points
                .iter()
                .map(|p| PointFile {
                    label: p.label.clone(),
                    tracking: p.tracking.into(),
                    robot: p.robot.into(),
                })
                .collect(),
            transform: TransformFile {
                rotation: std::array::from_fn(|i| std::array::from_fn(|j| r[(i, j)])),
                scale: profile.transform.scale,
                translation: profile.transform.translation.into(),
            },
            rms_error: profile.rms_error,
            created_at: profile.created_at,
        }
    }
}

impl ProfileFile {
    fn into_profile(self) -> Result<CalibrationProfile, String> {
        let rows = self.transform.rotation;
        let transform = Transform {
            rotation: Mat3::from_fn(|i, j| rows[i][j]),
            scale: self.transform.scale,
            translation: Vec3::from(self.transform.translation),
        };
        transform.check()?;

        if self.points.len() < MIN_CALIBRATION_POINTS {
            return Err(format!(
                "{} points stored, at least {} required",
                self.points.len(),
                MIN_CALIBRATION_POINTS
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.points.iter().find(|p| !seen.insert(p.label.as_str())) {
            return Err(format!("duplicate point label '{}'", dup.label));
        }
        if !self.rms_error.is_finite() || self.rms_error < 0.0 {
            return Err(format!("invalid RMS error {}", self.rms_error));
        }

        let points: Vec<CalibrationPoint> = self
            .points
            .into_iter()
            .map(|p| CalibrationPoint::new(p.label, p.tracking, p.robot))
            .collect();
        match point_spread(&points) {
            Ok(PointSpread::Volumetric) => {}
            Ok(PointSpread::Planar) => return Err("stored points are coplanar".to_string()),
            Err(e) => return Err(e.to_string()),
        }

        Ok(CalibrationProfile {
            name: self.name,
            points,
            transform,
            rms_error: self.rms_error,
            created_at: self.created_at,
        })
    }
}

/// Check that `name` is usable as a profile file name.
pub fn validate_name(name: &str) -> Result<(), PersistenceError> {
    let ok = (1..=64).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(PersistenceError::InvalidName(name.to_string()))
    }
}

/// Write `bytes` to `temp`, flush to disk, then rename onto `target`.
fn write_atomically(temp: &Path, target: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    #[cfg(unix)]
    fs::set_permissions(temp, fs::Permissions::from_mode(0o600))?;
    fs::rename(temp, target)
}

/// Directory of saved profiles.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    /// Store rooted at `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the `profiles` subdirectory of a config directory.
    pub fn in_config_dir(config_dir: &Path) -> Self {
        Self::new(config_dir.join("profiles"))
    }

    /// Directory holding the profile files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Write `profile`, replacing any profile of the same name.
    pub fn save(&self, profile: &CalibrationProfile) -> Result<PathBuf, PersistenceError> {
        validate_name(&profile.name)?;
        let write_failed = |source: io::Error| PersistenceError::WriteFailed {
            name: profile.name.clone(),
            source,
        };

        let json = serde_json::to_string_pretty(&ProfileFile::from(profile))
            .map_err(|e| write_failed(io::Error::other(e)))?;

        fs::create_dir_all(&self.dir).map_err(write_failed)?;
        let final_path = self.path_for(&profile.name);
        let temp_path = self.dir.join(format!(".{}.json.tmp", profile.name));

        if let Err(e) = write_atomically(&temp_path, &final_path, json.as_bytes()) {
            let _ = fs::remove_file(&temp_path);
            return Err(write_failed(e));
        }

        log::info!(
            "Saved calibration profile '{}' to {}",
            profile.name,
            final_path.display()
        );
        Ok(final_path)
    }

    /// Read and validate the profile called `name`.
    ///
    /// Never substitutes a default: a missing profile is `NotFound`, an
    /// invalid one is `Corrupt`.
    pub fn load(&self, name: &str) -> Result<CalibrationProfile, PersistenceError> {
        validate_name(name)?;
        let content = fs::read_to_string(self.path_for(name)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PersistenceError::NotFound(name.to_string())
            } else {
                PersistenceError::ReadFailed {
                    name: name.to_string(),
                    source: e,
                }
            }
        })?;

        let corrupt = |reason: String| PersistenceError::Corrupt {
            name: name.to_string(),
            reason,
        };
        let file: ProfileFile = serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
        if file.name != name {
            return Err(corrupt(format!("file holds profile '{}'", file.name)));
        }
        file.into_profile().map_err(corrupt)
    }

    /// Whether a profile called `name` is stored.
    pub fn exists(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.path_for(name).is_file()
    }

    /// Names of all stored profiles, sorted.
    pub fn list(&self) -> Result<Vec<String>, PersistenceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PersistenceError::ReadFailed {
                    name: self.dir.display().to_string(),
                    source: e,
                })
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let file_name = entry.file_name().into_string().ok()?;
                let stem = file_name.strip_suffix(".json")?;
                validate_name(stem).ok()?;
                Some(stem.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Remove the profile called `name`.
    pub fn delete(&self, name: &str) -> Result<(), PersistenceError> {
        validate_name(name)?;
        fs::remove_file(self.path_for(name)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PersistenceError::NotFound(name.to_string())
            } else {
                PersistenceError::WriteFailed {
                    name: name.to_string(),
                    source: e,
                }
            }
        })?;
        log::info!("Deleted calibration profile '{}'", name);
        Ok(())
    }
}
