//! Typed errors for every fallible core operation.
//!
//! Each subsystem has its own enum so callers can match on the exact
//! failure without string inspection:
//!
//! - [`TransportError`] - delivery to the robot-side receiver
//! - [`EncodingError`] - wire message construction and parsing
//! - [`CalibrationError`] - point collection and transform solving
//! - [`PersistenceError`] - calibration profile storage
//! - [`ReplayError`] - recorded message logs
//!
//! Transport failures are recorded in the transport status and retried on
//! the next scheduler tick. The others are returned synchronously to
//! the caller. The CLI layer wraps all of them in `anyhow`.

use thiserror::Error;

/// Failures delivering a wire message.
///
/// `Clone` so the last error can live inside the published transport
/// status snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The configured server address cannot be parsed or has no host.
    #[error("invalid server address '{0}'")]
    InvalidAddress(String),
    /// Connection, handshake or liveness check failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    /// The receiver rejected or did not acknowledge the message.
    ///
    /// Carries the HTTP status code when one was received.
    #[error("send failed{}", .0.map(|c| format!(" with status {c}")).unwrap_or_default())]
    SendFailed(Option<u16>),
    /// The operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,
}

/// Failures packing or unpacking a wire message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Internal invariant violated while encoding (joint count mismatch,
    /// frame in the wrong hand slot).
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    /// Input handed to the decoder is not a valid wire message.
    #[error("malformed wire message: {0}")]
    Malformed(String),
}

/// Failures collecting calibration points or solving the transform.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    /// A point with this label already exists in the working set.
    #[error("duplicate calibration point label '{0}'")]
    DuplicateLabel(String),
    /// Too few correspondences to solve.
    #[error("need at least {required} calibration points, got {got}")]
    InsufficientPoints {
        /// Minimum point count.
        required: usize,
        /// Points in the working set.
        got: usize,
    },
    /// Points are coincident or collinear, so rotation is underdetermined.
    #[error("degenerate calibration point configuration: {0}")]
    DegenerateConfiguration(String),
    /// Another `compute_transform` is running on this engine.
    #[error("a transform computation is already in progress")]
    ComputeBusy,
    /// No transform has been committed or activated yet.
    #[error("no active calibration transform")]
    NoActiveTransform,
    /// The result was computed from a working set that has since changed.
    #[error("calibration result no longer matches the working point set")]
    StaleResult,
    /// No point with this label exists in the working set.
    #[error("unknown calibration point label '{0}'")]
    UnknownLabel(String),
}

/// Failures storing or loading calibration profiles.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The profile could not be written or committed to disk.
    #[error("failed to write profile '{name}': {source}")]
    WriteFailed {
        /// Profile name.
        name: String,
        /// Underlying I/O or serialization error.
        #[source]
        source: std::io::Error,
    },
    /// The profile store could not be read (permissions, I/O).
    #[error("failed to read profile '{name}': {source}")]
    ReadFailed {
        /// Profile name, or the store directory for listing.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// No profile with this name exists.
    #[error("calibration profile '{0}' not found")]
    NotFound(String),
    /// The stored profile is unreadable or violates a profile invariant.
    #[error("calibration profile '{name}' is corrupt: {reason}")]
    Corrupt {
        /// Profile name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The name cannot be used as a profile file name.
    #[error("invalid profile name '{0}' (use 1-64 letters, digits, '-' or '_')")]
    InvalidName(String),
}

/// Failures loading a recorded message log.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The log file could not be read.
    #[error("failed to read log {path}: {source}")]
    ReadFailed {
        /// Log file path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The log holds no decodable messages.
    #[error("log {0} contains no replayable messages")]
    Empty(String),
}
