//! Application-wide constants for handbridge.
//!
//! This module centralizes all magic numbers and configuration constants
//! to improve maintainability and discoverability. Constants are grouped
//! by domain.
//!
//! # Categories
//!
//! - **Rate control**: send frequency bounds and defaults
//! - **Replay**: recorded log playback
//! - **Timeouts**: network operation deadlines
//! - **Reconnection**: keep-alive and backoff timing
//! - **Calibration**: solver thresholds

use std::time::Duration;

// ============================================================================
// Rate control
// ============================================================================

/// Lowest accepted send frequency.
pub const MIN_SEND_RATE_HZ: u32 = 10;

/// Highest accepted send frequency.
///
/// Above this the tracking provider (nominally 100-130 updates/sec) rarely
/// has a fresh frame for every tick.
pub const MAX_SEND_RATE_HZ: u32 = 120;

/// Default send frequency.
pub const DEFAULT_SEND_RATE_HZ: u32 = 60;

/// Default update rate of the synthetic tracking source.
///
/// Matches the upper end of the provider's nominal range.
pub const DEFAULT_SYNTHETIC_RATE_HZ: u32 = 130;

/// Capacity of the push-provider ring before the oldest updates are overwritten.
pub const PROVIDER_BUFFER_CAPACITY: usize = 64;

// ============================================================================
// Replay
// ============================================================================

/// Pause between iterations of a looping replay.
pub const REPLAY_LOOP_PAUSE: Duration = Duration::from_secs(2);

/// File name prefix of recorded message logs.
pub const REPLAY_LOG_PREFIX: &str = "hand_tracking_";

/// Directory searched for recorded logs when none is given.
pub const DEFAULT_REPLAY_LOG_DIR: &str = "./logs";

// ============================================================================
// Timeouts
// ============================================================================

/// Default per-request timeout for frame delivery.
///
/// A frame older than this is stale at 10 Hz and above, so waiting longer
/// only delays the next fresh frame.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for the `/health` liveness check.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for the WebSocket handshake.
pub const WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Reconnection
// ============================================================================

/// Default interval between keep-alive pings on a persistent channel.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// First delay of the exponential reconnect backoff.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound of the exponential reconnect backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Interval between status log lines while streaming.
pub const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Calibration
// ============================================================================

/// Minimum number of correspondences for a transform.
pub const MIN_CALIBRATION_POINTS: usize = 4;

/// Relative singular value below which a direction counts as collapsed.
pub const RANK_TOLERANCE: f64 = 1e-9;

/// Absolute spread (mean squared distance to centroid) treated as zero.
pub const MIN_POINT_SPREAD: f64 = 1e-12;

/// Tolerance for orthonormality and determinant checks on loaded rotations.
pub const ROTATION_TOLERANCE: f64 = 1e-6;

// ============================================================================
// Server paths
// ============================================================================

/// Path receiving wire messages by POST.
pub const CONTROL_PATH: &str = "/control";

/// Liveness endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Default receiver address (receivers listen on port 5000 by default).
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
