//! In-process sink that records every delivered message.
//!
//! Used for `stream --dry-run` and throughout the tests. Latency and
//! failures can be scripted so the in-flight discipline and the retry
//! behaviour are observable without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{FrameSink, TransportKind};
use crate::error::TransportError;

#[derive(Debug, Default)]
struct Inner {
    connected: bool,
    sent: Vec<String>,
    connect_attempts: u64,
    latency: Duration,
    connect_latency: Duration,
    connect_failures: VecDeque<TransportError>,
    send_failures: VecDeque<TransportError>,
}

/// Recording sink.
///
/// Clones share state, so a test keeps one clone for inspection and hands
/// another to the transport.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    /// New sink with zero latency and no scripted failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every send by `latency` before acknowledging.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Delay every connect by `latency` (a slow handshake).
    pub fn with_connect_latency(self, latency: Duration) -> Self {
        self.lock().connect_latency = latency;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make the next connect attempt fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.lock().connect_failures.push_back(error);
    }

    /// Make the next send fail with `error`.
    pub fn fail_next_send(&self, error: TransportError) {
        self.lock().send_failures.push_back(error);
    }

    /// Messages acknowledged so far, in delivery order.
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Number of acknowledged messages.
    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Number of connect calls, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.lock().connect_attempts
    }

    /// Whether the sink currently considers itself connected.
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Forget recorded messages.
    pub fn clear(&self) {
        self.lock().sent.clear();
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn connect(&self) -> Result<(), TransportError> {
        let latency = self.lock().connect_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.lock();
        inner.connect_attempts += 1;
        if let Some(err) = inner.connect_failures.pop_front() {
            inner.connected = false;
            return Err(err);
        }
        inner.connected = true;
        Ok(())
    }

    async fn send(&self, payload: &str) -> Result<(), TransportError> {
        let latency = {
            let inner = self.lock();
            if !inner.connected {
                return Err(TransportError::ConnectFailed("not connected".to_string()));
            }
            inner.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.lock();
        if let Some(err) = inner.send_failures.pop_front() {
            return Err(err);
        }
        inner.sent.push(payload.to_string());
        Ok(())
    }

    async fn disconnect(&self) {
        self.lock().connected = false;
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }
}
