//! Frame delivery to the robot-side receiver.
//!
//! A [`Transport`] owns one [`FrameSink`] (HTTP, WebSocket or in-memory),
//! the connection state machine and the status counters. The scheduler
//! calls [`Transport::dispatch`] once per tick; dispatch never waits on the
//! network. The send itself runs on a spawned task, and at most one send is
//! outstanding at a time: a tick that finds a send still in flight drops its
//! frame instead of queueing it.
//!
//! # Modules
//!
//! - [`state`] - `TransportState`, `TransportStatus`, `RetryPolicy`
//! - [`sink`] - the `FrameSink` trait and `TransportKind`
//! - [`http`] - request-per-message delivery
//! - [`ws`] - persistent WebSocket delivery with keep-alive
//! - [`memory`] - recording sink for dry runs and tests
//! - [`scheduler`] - the fixed-rate send loop
//!
//! # Disconnect
//!
//! Every operation captures the transport generation when it starts and
//! its completion is applied only if the generation is unchanged.
//! `disconnect` bumps the generation under the same lock that guards the
//! status, so a send finishing after a disconnect can neither clear a new
//! in-flight claim nor touch the counters.

pub mod http;
pub mod memory;
pub mod scheduler;
pub mod sink;
pub mod state;
pub mod ws;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use http::{HealthReport, HttpSink};
pub use memory::MemorySink;
pub use scheduler::{SendRate, SendScheduler};
pub use sink::{FrameSink, TransportKind};
pub use state::{RetryPolicy, TransportState, TransportStatus};
pub use ws::WebSocketSink;

use crate::error::TransportError;

/// What `dispatch` did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Send started on a connected transport.
    Issued,
    /// Transport was failed; a reconnect followed by the send started.
    Retrying,
    /// Frame discarded without a send attempt.
    Dropped(DropReason),
}

/// Why a frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Previous send (or connect) has not completed.
    InFlight,
    /// Never connected, or disconnected.
    NotConnected,
    /// Failed, and the backoff delay has not elapsed.
    BackingOff,
    /// Failed under the manual policy; waiting for `retry()`.
    AwaitingRetry,
}

#[derive(Debug)]
struct Shared {
    sink: Arc<dyn FrameSink>,
    status: watch::Sender<TransportStatus>,
    in_flight: AtomicBool,
    generation: AtomicU64,
    retry: RetryPolicy,
    retry_at: Mutex<Option<Instant>>,
    outstanding: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn try_claim(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Record a failure. Caller holds the status lock.
    fn record_failure(&self, s: &mut TransportStatus, err: TransportError) {
        s.send_failures += 1;
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        if matches!(s.state, TransportState::Failed(_)) {
            log::debug!("Transport still failing: {}", err);
        } else {
            log::warn!("Transport failed: {}", err);
        }
        s.last_error = Some(err.clone());
        s.state = TransportState::Failed(err);
        *lock(&self.retry_at) = self
            .retry
            .delay_after(s.consecutive_failures)
            .map(|delay| Instant::now() + delay);
    }

    /// Apply a connect outcome; `false` if a disconnect overtook it.
    fn finish_connect(&self, generation: u64, result: &Result<(), TransportError>) -> bool {
        self.status.send_if_modified(|s| {
            if !self.is_current(generation) {
                return false;
            }
            self.in_flight.store(false, Ordering::Release);
            match result {
                Ok(()) => {
                    log::info!("Transport connected ({})", self.sink.kind());
                    s.state = TransportState::Connected;
                    s.consecutive_failures = 0;
                }
                Err(e) => self.record_failure(s, e.clone()),
            }
            true
        })
    }

    /// Close a link opened by an operation a disconnect overtook, unless a
    /// newer connect has started since.
    async fn close_stale_link(&self) {
        if matches!(self.status.borrow().state, TransportState::Idle) {
            log::debug!("Closing link opened after disconnect");
            self.sink.disconnect().await;
        }
    }

    /// Reconnect succeeded inside a retrying send; move straight to `Sending`.
    fn resume_sending(&self, generation: u64) -> bool {
        let mut current = false;
        self.status.send_if_modified(|s| {
            if !self.is_current(generation) {
                return false;
            }
            log::info!("Transport reconnected ({})", self.sink.kind());
            s.state = TransportState::Sending;
            current = true;
            true
        });
        current
    }

    fn finish_send(&self, generation: u64, result: Result<(), TransportError>) {
        self.status.send_if_modified(|s| {
            if !self.is_current(generation) {
                return false;
            }
            self.in_flight.store(false, Ordering::Release);
            match result {
                Ok(()) => {
                    s.messages_sent += 1;
                    s.last_success = Some(Utc::now());
                    s.consecutive_failures = 0;
                    s.state = TransportState::Connected;
                }
                Err(e) => self.record_failure(s, e),
            }
            true
        });
    }

    /// Operation future dropped before completing.
    fn abandon(&self, generation: u64) {
        self.status.send_if_modified(|s| {
            if !self.is_current(generation) {
                return false;
            }
            self.in_flight.store(false, Ordering::Release);
            s.state = TransportState::Idle;
            true
        });
    }
}

async fn send_task(shared: Arc<Shared>, generation: u64, payload: String, reconnect: bool) {
    if reconnect {
        let result = shared.sink.connect().await;
        if let Err(e) = result {
            shared.finish_send(generation, Err(e));
            return;
        }
        if !shared.resume_sending(generation) {
            shared.close_stale_link().await;
            return;
        }
    } else if !shared.is_current(generation) {
        return;
    }
    let result = shared.sink.send(&payload).await;
    if result.is_ok() {
        log::debug!("Sent {} bytes", payload.len());
    }
    shared.finish_send(generation, result);
}

/// Connection state machine around one sink.
///
/// Cheap to clone; clones share the same connection, state and counters.
#[derive(Debug, Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    /// Wrap `sink` with the given failure policy.
    pub fn new(sink: Arc<dyn FrameSink>, retry: RetryPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                status: watch::Sender::new(TransportStatus::default()),
                in_flight: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                retry,
                retry_at: Mutex::new(None),
                outstanding: Mutex::new(None),
            }),
        }
    }

    /// Convenience for an owned sink.
    pub fn from_sink<S: FrameSink + 'static>(sink: S, retry: RetryPolicy) -> Self {
        Self::new(Arc::new(sink), retry)
    }

    /// Backend in use.
    pub fn kind(&self) -> TransportKind {
        self.shared.sink.kind()
    }

    /// Failure policy in use.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.shared.retry
    }

    /// Consistent snapshot of state and counters.
    pub fn status(&self) -> TransportStatus {
        self.shared.status.borrow().clone()
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.shared.status.borrow().state.clone()
    }

    /// Observe status changes.
    pub fn subscribe(&self) -> watch::Receiver<TransportStatus> {
        self.shared.status.subscribe()
    }

    /// Whether a send or connect is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Connect from `Idle` or `Failed`.
    ///
    /// Returns immediately when already connected. If another connect is
    /// running, waits for it and reports its outcome.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let shared = &self.shared;
        let mut started = None;
        shared.status.send_if_modified(|s| {
            if s.state.is_connected() {
                return false;
            }
            if matches!(s.state, TransportState::Idle | TransportState::Failed(_)) && shared.try_claim()
            {
                s.state = TransportState::Connecting;
                started = Some(shared.generation.load(Ordering::Acquire));
                return true;
            }
            false
        });

        let Some(generation) = started else {
            return self.wait_settled().await;
        };

        log::info!("Connecting ({})", shared.sink.kind());
        let guard = scopeguard::guard(Arc::clone(shared), move |shared| {
            shared.abandon(generation);
        });
        let result = shared.sink.connect().await;
        let _ = scopeguard::ScopeGuard::into_inner(guard);
        if !shared.finish_connect(generation, &result) {
            if result.is_ok() {
                shared.close_stale_link().await;
            }
            return Err(TransportError::ConnectFailed("disconnected".to_string()));
        }
        result
    }

    /// Explicit reconnect; required under [`RetryPolicy::Manual`].
    pub async fn retry(&self) -> Result<(), TransportError> {
        *lock(&self.shared.retry_at) = None;
        self.connect().await
    }

    async fn wait_settled(&self) -> Result<(), TransportError> {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(|s| !matches!(s.state, TransportState::Connecting))
            .await
            .map_err(|_closed| TransportError::ConnectFailed("transport dropped".to_string()))?;
        match &settled.state {
            TransportState::Connected | TransportState::Sending => Ok(()),
            TransportState::Failed(e) => Err(e.clone()),
            TransportState::Idle | TransportState::Connecting => {
                Err(TransportError::ConnectFailed("disconnected".to_string()))
            }
        }
    }

    /// Hand one encoded message to the transport.
    ///
    /// Never awaits; the send runs on a spawned task. Must be called from
    /// within a Tokio runtime.
    pub fn dispatch(&self, payload: String) -> DispatchOutcome {
        let shared = &self.shared;
        let mut outcome = DispatchOutcome::Dropped(DropReason::NotConnected);
        let mut started = None;

        shared.status.send_modify(|s| {
            outcome = match &s.state {
                TransportState::Idle => DispatchOutcome::Dropped(DropReason::NotConnected),
                TransportState::Connecting | TransportState::Sending => {
                    DispatchOutcome::Dropped(DropReason::InFlight)
                }
                TransportState::Connected => {
                    if shared.try_claim() {
                        s.state = TransportState::Sending;
                        started = Some((shared.generation.load(Ordering::Acquire), false));
                        DispatchOutcome::Issued
                    } else {
                        DispatchOutcome::Dropped(DropReason::InFlight)
                    }
                }
                TransportState::Failed(_) => {
                    let retry_at = *lock(&shared.retry_at);
                    match retry_at {
                        None => DispatchOutcome::Dropped(DropReason::AwaitingRetry),
                        Some(at) if Instant::now() < at => {
                            DispatchOutcome::Dropped(DropReason::BackingOff)
                        }
                        Some(_) => {
                            if shared.try_claim() {
                                s.state = TransportState::Connecting;
                                started = Some((shared.generation.load(Ordering::Acquire), true));
                                DispatchOutcome::Retrying
                            } else {
                                DispatchOutcome::Dropped(DropReason::InFlight)
                            }
                        }
                    }
                }
            };
            if matches!(outcome, DispatchOutcome::Dropped(_)) {
                s.frames_dropped += 1;
            }
        });

        if let Some((generation, reconnect)) = started {
            if reconnect {
                log::debug!("Retrying connection before send");
            }
            let handle = tokio::spawn(send_task(
                Arc::clone(shared),
                generation,
                payload,
                reconnect,
            ));
            *lock(&shared.outstanding) = Some(handle);
        }
        outcome
    }

    /// Cancel any outstanding operation and return to `Idle`.
    ///
    /// Counters are kept; the in-flight flag is cleared.
    pub async fn disconnect(&self) {
        let shared = &self.shared;
        shared.status.send_modify(|s| {
            shared.generation.fetch_add(1, Ordering::AcqRel);
            shared.in_flight.store(false, Ordering::Release);
            s.state = TransportState::Idle;
        });
        *lock(&shared.retry_at) = None;
        if let Some(handle) = lock(&shared.outstanding).take() {
            handle.abort();
        }
        shared.sink.disconnect().await;
        log::info!("Transport disconnected ({})", shared.sink.kind());
    }
}
