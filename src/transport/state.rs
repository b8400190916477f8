//! Transport state machine types and the published status snapshot.
//!
//! ```text
//!            connect ok                 send start
//!   Idle ──► Connecting ──────► Connected ─────────► Sending
//!    ▲           │                  ▲                   │
//!    │           │ connect err      └──── send ok ──────┤
//!    │           ▼                                      │ send err
//!    │         Failed ◄─────────────────────────────────┘
//!    │           │ retry
//!    │           └──────► Connecting
//!    └──── disconnect (from any state)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{INITIAL_BACKOFF, MAX_BACKOFF};
use crate::error::TransportError;

/// Connection state of one transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Not connected (initial state and after disconnect).
    #[default]
    Idle,
    /// Connecting or probing the receiver.
    Connecting,
    /// Ready to send.
    Connected,
    /// One message is in flight.
    Sending,
    /// Last connect or send failed.
    Failed(TransportError),
}

impl TransportState {
    /// Short lowercase label for logs and status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Sending => "sending",
            Self::Failed(_) => "failed",
        }
    }

    /// `true` in `Connected` or `Sending`.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Sending)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Snapshot of a transport's state and counters.
///
/// Written only by the owning transport; readers get a consistent copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportStatus {
    /// Current state.
    pub state: TransportState,
    /// Messages acknowledged by the receiver.
    pub messages_sent: u64,
    /// Frames discarded without a send attempt (in flight, not connected,
    /// backing off).
    pub frames_dropped: u64,
    /// Failed connect or send attempts.
    pub send_failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Time of the last acknowledged message.
    pub last_success: Option<DateTime<Utc>>,
    /// Most recent failure, kept after recovery for display.
    pub last_error: Option<TransportError>,
}

/// What the transport does after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RetryPolicy {
    /// Reconnect on the next scheduler tick.
    #[default]
    EveryTick,
    /// Reconnect after an exponentially growing delay.
    Backoff {
        /// First delay, milliseconds.
        initial_ms: u64,
        /// Delay cap, milliseconds.
        max_ms: u64,
    },
    /// Stay failed until the caller asks for a retry.
    Manual,
}

impl RetryPolicy {
    /// Backoff with the default 1 s → 30 s bounds.
    pub fn default_backoff() -> Self {
        Self::Backoff {
            initial_ms: INITIAL_BACKOFF.as_millis() as u64,
            max_ms: MAX_BACKOFF.as_millis() as u64,
        }
    }

    /// Delay before the next automatic attempt after `failures` consecutive
    /// failures, or `None` when no automatic attempt should happen.
    pub fn delay_after(self, failures: u32) -> Option<Duration> {
        match self {
            Self::EveryTick => Some(Duration::ZERO),
            Self::Backoff { initial_ms, max_ms } => {
                let exponent = failures.saturating_sub(1).min(20);
                let delay = initial_ms.saturating_mul(1u64 << exponent).min(max_ms);
                Some(Duration::from_millis(delay))
            }
            Self::Manual => None,
        }
    }
}
