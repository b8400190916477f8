//! Delivery backend abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// How messages reach the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One POST per message; success is an HTTP 200 acknowledgement.
    #[default]
    Http,
    /// Messages pushed as text frames over a long-lived WebSocket with
    /// periodic keep-alive pings.
    #[serde(alias = "ws")]
    WebSocket,
    /// In-process sink that records messages (dry runs and tests).
    Memory,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::WebSocket => write!(f, "websocket"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "websocket" | "ws" => Ok(Self::WebSocket),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown transport '{other}' (http, websocket, memory)")),
        }
    }
}

/// A backend able to deliver encoded wire messages.
///
/// Implementors only move bytes; the [`Transport`](super::Transport) that
/// owns a sink handles state, counters and the in-flight discipline. All
/// methods take `&self` so a send can run on a spawned task while the
/// owner keeps a handle for `disconnect`.
#[async_trait]
pub trait FrameSink: Send + Sync + std::fmt::Debug {
    /// Establish the connection or verify the receiver is alive.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidAddress`, `ConnectFailed` or
    /// `Timeout`.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Deliver one message and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::SendFailed` (with the status code when one
    /// was received), `Timeout`, or `ConnectFailed` when the link is gone.
    async fn send(&self, payload: &str) -> Result<(), TransportError>;

    /// Tear down the connection. Never fails.
    async fn disconnect(&self);

    /// Which backend this is.
    fn kind(&self) -> TransportKind;
}
