//! Least-squares similarity fit between two point sets.
//!
//! Centroid alignment plus SVD of the cross-covariance (Kabsch), with the
//! sign of the last singular direction flipped when the raw solution is a
//! reflection. Scale is the ratio of the standard deviations of the two
//! sets about their centroids.

use super::types::{CalibrationPoint, CalibrationResult, Mat3, PointResidual, PointSpread, Transform, Vec3};
use crate::constants::{MIN_CALIBRATION_POINTS, MIN_POINT_SPREAD, RANK_TOLERANCE};
use crate::error::CalibrationError;

/// Solve `robot ≈ scale · R · tracking + t` over `points`.
///
/// # Errors
///
/// - `InsufficientPoints` for fewer than four points
/// - `DegenerateConfiguration` when either point set is coincident or
///   collinear, or a coordinate is not finite
pub fn solve_similarity(points: &[CalibrationPoint]) -> Result<CalibrationResult, CalibrationError> {
    if points.len() < MIN_CALIBRATION_POINTS {
        return Err(CalibrationError::InsufficientPoints {
            required: MIN_CALIBRATION_POINTS,
            got: points.len(),
        });
    }
    if let Some(bad) = points.iter().find(|p| {
        p.tracking.iter().chain(p.robot.iter()).any(|v| !v.is_finite())
    }) {
        return Err(CalibrationError::DegenerateConfiguration(format!(
            "point '{}' has a non-finite coordinate",
            bad.label
        )));
    }

    let n = points.len() as f64;
    let mut mu_t = Vec3::zeros();
    let mut mu_r = Vec3::zeros();
    for p in points {
        mu_t += p.tracking;
        mu_r += p.robot;
    }
    mu_t /= n;
    mu_r /= n;

    let mut sigma_t = 0.0;
    let mut sigma_r = 0.0;
    let mut cov_t = Mat3::zeros();
    let mut cov_r = Mat3::zeros();
    let mut h = Mat3::zeros();
    for p in points {
        let dt = p.tracking - mu_t;
        let dr = p.robot - mu_r;
        sigma_t += dt.norm_squared();
        sigma_r += dr.norm_squared();
        cov_t += dt * dt.transpose();
        cov_r += dr * dr.transpose();
        h += dr * dt.transpose();
    }
    sigma_t /= n;
    sigma_r /= n;
    cov_t /= n;
    cov_r /= n;
    h /= n;

    let spread = classify_spread(&cov_t, sigma_t, "tracking")?;
    // A rank-1 robot set leaves H rank-1 and the rotation free about that line.
    classify_spread(&cov_r, sigma_r, "robot")?;

    let svd = h.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(CalibrationError::DegenerateConfiguration(
            "cross-covariance SVD did not converge".to_string(),
        ));
    };
    let d = (u.determinant() * v_t.determinant()).signum();
    let rotation = u * Mat3::from_diagonal(&Vec3::new(1.0, 1.0, d)) * v_t;

    let scale = (sigma_r / sigma_t).sqrt();
    let translation = mu_r - rotation * mu_t * scale;
    let transform = Transform {
        rotation,
        scale,
        translation,
    };

    let residuals: Vec<PointResidual> = points
        .iter()
        .map(|p| PointResidual {
            label: p.label.clone(),
            distance: (transform.apply(&p.tracking) - p.robot).norm(),
        })
        .collect();
    let rms_error = (residuals.iter().map(|r| r.distance * r.distance).sum::<f64>() / n).sqrt();

    Ok(CalibrationResult {
        transform,
        residuals,
        rms_error,
        spread,
        revision: 0,
    })
}

/// Dimensionality of both point sets of `points`.
///
/// Returns the spread of the tracking points; fails like
/// [`solve_similarity`] when either set is coincident or collinear.
pub fn point_spread(points: &[CalibrationPoint]) -> Result<PointSpread, CalibrationError> {
    if points.is_empty() {
        return Err(CalibrationError::InsufficientPoints {
            required: MIN_CALIBRATION_POINTS,
            got: 0,
        });
    }
    let n = points.len() as f64;
    let (tracking, robot): (Vec<Vec3>, Vec<Vec3>) =
        points.iter().map(|p| (p.tracking, p.robot)).unzip();
    let (cov_t, sigma_t) = covariance(&tracking, n);
    let (cov_r, sigma_r) = covariance(&robot, n);
    let spread = classify_spread(&cov_t, sigma_t, "tracking")?;
    classify_spread(&cov_r, sigma_r, "robot")?;
    Ok(spread)
}

fn covariance(coords: &[Vec3], n: f64) -> (Mat3, f64) {
    let mean = coords.iter().fold(Vec3::zeros(), |acc, c| acc + c) / n;
    let mut cov = Mat3::zeros();
    let mut sigma = 0.0;
    for c in coords {
        let d = c - mean;
        sigma += d.norm_squared();
        cov += d * d.transpose();
    }
    (cov / n, sigma / n)
}

/// Rank test on one set's covariance.
fn classify_spread(cov: &Mat3, sigma: f64, set: &str) -> Result<PointSpread, CalibrationError> {
    if sigma.is_nan() || sigma <= MIN_POINT_SPREAD {
        return Err(CalibrationError::DegenerateConfiguration(format!(
            "{set} points are coincident"
        )));
    }
    let mut s: Vec<f64> = cov.singular_values().iter().copied().collect();
    s.sort_by(|a, b| b.total_cmp(a));
    if s[1] <= RANK_TOLERANCE * s[0] {
        return Err(CalibrationError::DegenerateConfiguration(format!(
            "{set} points are collinear"
        )));
    }
    if s[2] <= RANK_TOLERANCE * s[0] {
        Ok(PointSpread::Planar)
    } else {
        Ok(PointSpread::Volumetric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    fn cube() -> Vec<[f64; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [0.3, 0.0, 0.0],
            [0.0, 0.4, 0.0],
            [0.0, 0.0, 0.5],
            [0.3, 0.4, 0.5],
            [-0.1, 0.2, 0.3],
        ]
    }

    fn mapped(t: &Transform) -> Vec<CalibrationPoint> {
        cube()
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let tracking = Vec3::from(p);
                CalibrationPoint {
                    label: format!("p{i}"),
                    tracking,
                    robot: t.apply(&tracking),
                }
            })
            .collect()
    }

    #[test]
    fn test_identity_correspondence() {
        let points = mapped(&Transform::identity());
        let result = solve_similarity(&points).unwrap();

        assert!((result.transform.rotation - Mat3::identity()).amax() < 1e-9);
        assert!((result.transform.scale - 1.0).abs() < 1e-9);
        assert!(result.transform.translation.norm() < 1e-9);
        assert!(result.rms_error < 1e-9);
        assert_eq!(result.spread, PointSpread::Volumetric);
    }

    #[test]
    fn test_recovers_known_similarity() {
        let truth = Transform {
            rotation: *Rotation3::from_euler_angles(0.3, -0.2, 2.1).matrix(),
            scale: 1.7,
            translation: Vec3::new(0.5, -0.25, 1.0),
        };
        let points = mapped(&truth);
        let result = solve_similarity(&points).unwrap();

        assert!((result.transform.rotation - truth.rotation).amax() < 1e-9);
        assert!((result.transform.scale - truth.scale).abs() < 1e-9);
        assert!((result.transform.translation - truth.translation).norm() < 1e-9);
        assert!((result.transform.rotation.determinant() - 1.0).abs() < 1e-12);
        for p in &points {
            let predicted = result.transform.apply(&p.tracking);
            assert!((predicted - p.robot).norm() <= result.rms_error + 1e-9);
        }
    }

    #[test]
    fn test_mirrored_targets_still_give_proper_rotation() {
        let points: Vec<CalibrationPoint> = cube()
            .into_iter()
            .enumerate()
            .map(|(i, p)| CalibrationPoint::new(format!("m{i}"), p, [p[0], p[1], -p[2]]))
            .collect();
        let result = solve_similarity(&points).unwrap();
        assert!((result.transform.rotation.determinant() - 1.0).abs() < 1e-9);
        assert!(result.rms_error > 0.0);
        assert!(result.transform.check().is_ok());
    }

    #[test]
    fn test_noisy_residuals_are_reported() {
        let mut points = mapped(&Transform::identity());
        points[2].robot.x += 0.01;
        let result = solve_similarity(&points).unwrap();
        assert!(result.rms_error > 0.0);
        assert_eq!(result.residuals.len(), points.len());
        let worst = result
            .residuals
            .iter()
            .max_by(|a, b| a.distance.total_cmp(&b.distance))
            .unwrap();
        assert_eq!(worst.label, "p2");
    }

    #[test]
    fn test_too_few_points() {
        let points = mapped(&Transform::identity());
        assert_eq!(
            solve_similarity(&points[..3]),
            Err(CalibrationError::InsufficientPoints {
                required: 4,
                got: 3
            })
        );
    }

    #[test]
    fn test_collinear_points_are_degenerate() {
        let points: Vec<CalibrationPoint> = (0..5)
            .map(|i| {
                let k = f64::from(i);
                CalibrationPoint::new(format!("c{i}"), [k, 2.0 * k, -k], [k, k, k])
            })
            .collect();
        assert!(matches!(
            solve_similarity(&points),
            Err(CalibrationError::DegenerateConfiguration(_))
        ));
    }

    #[test]
    fn test_coincident_points_are_degenerate() {
        let points: Vec<CalibrationPoint> = (0..4)
            .map(|i| CalibrationPoint::new(format!("s{i}"), [1.0, 1.0, 1.0], [f64::from(i), 0.0, 0.0]))
            .collect();
        assert!(matches!(
            solve_similarity(&points),
            Err(CalibrationError::DegenerateConfiguration(_))
        ));
    }

    #[test]
    fn test_collinear_robot_points_are_degenerate() {
        let points: Vec<CalibrationPoint> = cube()
            .into_iter()
            .enumerate()
            .map(|(i, p)| CalibrationPoint::new(format!("r{i}"), p, [i as f64, 0.0, 0.0]))
            .collect();
        assert_eq!(
            solve_similarity(&points),
            Err(CalibrationError::DegenerateConfiguration(
                "robot points are collinear".to_string()
            ))
        );
        assert!(point_spread(&points).is_err());
    }

    #[test]
    fn test_point_spread_matches_solver() {
        let points = mapped(&Transform::identity());
        assert_eq!(point_spread(&points), Ok(PointSpread::Volumetric));

        let flat: Vec<CalibrationPoint> = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]]
            .into_iter()
            .enumerate()
            .map(|(i, [x, y])| CalibrationPoint::new(format!("f{i}"), [x, y, 0.0], [x, y, 0.0]))
            .collect();
        assert_eq!(point_spread(&flat), Ok(PointSpread::Planar));
    }

    #[test]
    fn test_coplanar_points_solve_as_planar() {
        let truth = Transform {
            rotation: *Rotation3::from_euler_angles(0.0, 0.0, 0.7).matrix(),
            scale: 0.5,
            translation: Vec3::new(1.0, 2.0, 3.0),
        };
        let points: Vec<CalibrationPoint> = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0], [0.5, 0.2]]
            .into_iter()
            .enumerate()
            .map(|(i, [x, y])| {
                let tracking = Vec3::new(x, y, 0.0);
                CalibrationPoint {
                    label: format!("f{i}"),
                    tracking,
                    robot: truth.apply(&tracking),
                }
            })
            .collect();
        let result = solve_similarity(&points).unwrap();
        assert_eq!(result.spread, PointSpread::Planar);
        assert!((result.transform.rotation - truth.rotation).amax() < 1e-9);
        assert!(result.rms_error < 1e-9);
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let mut points = mapped(&Transform::identity());
        points[0].robot.y = f64::INFINITY;
        assert!(matches!(
            solve_similarity(&points),
            Err(CalibrationError::DegenerateConfiguration(_))
        ));
    }
}
