//! Handbridge - hand-tracking teleoperation bridge.
//!
//! Streams tracked hand-joint poses to a robot controller at a fixed rate
//! and calibrates the tracking coordinate frame onto the robot frame.
//!
//! # Architecture
//!
//! - **Tracking** - provider updates become immutable per-hand frames
//! - **Codec** - combined frames become JSON wire messages
//! - **Transport** - one in-flight send at a time over HTTP, WebSocket or memory
//! - **Session** - owns the capture task and the fixed-rate send task
//! - **Calibration** - similarity transform solver, engine and profile store
//!
//! # Modules
//!
//! - [`tracking`] - skeleton layouts, frames, providers, replay, sampler
//! - [`codec`] - wire message encoding and decoding
//! - [`transport`] - sinks, connection state machine, send scheduler
//! - [`session`] - streaming session lifecycle
//! - [`calibration`] - tracking-to-robot transform
//! - [`config`] - configuration loading/saving
//! - [`commands`] - CLI subcommand implementations

pub mod calibration;
pub mod codec;
pub mod commands;
pub mod config;
pub mod constants;
pub mod error;
pub mod session;
pub mod tracking;
pub mod transport;

// Re-export commonly used types
pub use calibration::{CalibrationEngine, CalibrationProfile, CalibrationStore, Transform};
pub use codec::FrameEncoder;
pub use config::Config;
pub use error::{
    CalibrationError, EncodingError, PersistenceError, ReplayError, TransportError,
};
pub use session::{SessionSummary, StreamSession};
pub use tracking::{HandFrame, JointSkeletonSampler, SkeletonLayout, TrackingProvider};
pub use transport::{FrameSink, SendRate, SendScheduler, Transport, TransportStatus};
