//! Streaming session: capture and send tasks under one owner.
//!
//! ```text
//! provider ─► capture task (sampler) ─► LatestFrames ─► send task (scheduler) ─► Transport
//!                         └────────── one CancellationToken ──────────┘
//! ```
//!
//! The session is the only place that knows about both tasks; neither the
//! sampler nor the scheduler holds a reference to the other.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::calibration::{CalibrationEngine, CalibrationStore};
use crate::codec::FrameEncoder;
use crate::tracking::{JointSkeletonSampler, LatestFrames, SamplerStats, TrackingProvider};
use crate::transport::scheduler::SchedulerStats;
use crate::transport::{SendRate, SendScheduler, Transport, TransportStatus};

/// Final counters of a stopped session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Transport status at the moment of disconnect.
    pub transport: TransportStatus,
    /// Capture counters.
    pub sampler: SamplerStats,
    /// Send loop counters.
    pub scheduler: SchedulerStats,
    /// Calibration profile in effect, if any.
    pub profile: Option<String>,
}

/// Running capture → encode → transmit pipeline.
#[derive(Debug)]
pub struct StreamSession {
    cancel: CancellationToken,
    transport: Transport,
    sampler: JointSkeletonSampler,
    scheduler: SendScheduler,
    calibration: Arc<CalibrationEngine>,
    capture: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Connect `transport` and start both tasks.
    ///
    /// A failed initial connect is logged and left to the transport's retry
    /// policy; the session still starts.
    pub async fn start<P>(
        mut provider: P,
        sampler: JointSkeletonSampler,
        encoder: FrameEncoder,
        transport: Transport,
        rate: SendRate,
    ) -> Self
    where
        P: TrackingProvider + 'static,
    {
        if let Err(e) = transport.connect().await {
            log::warn!("Initial connect failed: {}", e);
        }

        let cancel = CancellationToken::new();
        let scheduler = SendScheduler::new(transport.clone(), sampler.latest(), encoder, rate);

        let capture = {
            let sampler = sampler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { sampler.run(&mut provider, cancel).await })
        };
        let sender = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        Self {
            cancel,
            transport,
            sampler,
            scheduler,
            calibration: Arc::new(CalibrationEngine::new()),
            capture: Some(capture),
            sender: Some(sender),
        }
    }

    /// Transport snapshot.
    pub fn status(&self) -> TransportStatus {
        self.transport.status()
    }

    /// Observe transport status changes.
    pub fn subscribe(&self) -> watch::Receiver<TransportStatus> {
        self.transport.subscribe()
    }

    /// Transport handle (for an explicit `retry`).
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Latest captured frames.
    pub fn latest(&self) -> LatestFrames {
        self.sampler.latest()
    }

    /// Calibration engine of this session.
    pub fn calibration(&self) -> &Arc<CalibrationEngine> {
        &self.calibration
    }

    /// Load and activate profile `name` from `store`.
    ///
    /// A missing or corrupt profile is logged and the session streams on
    /// with no active transform.
    pub fn load_profile(&self, store: &CalibrationStore, name: &str) -> bool {
        match self.calibration.load_profile(store, name) {
            Ok(_) => true,
            Err(e) => {
                log::warn!(
                    "Calibration profile '{}' not loaded, no transform active: {}",
                    name,
                    e
                );
                false
            }
        }
    }

    /// Current counters without stopping.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            transport: self.transport.status(),
            sampler: self.sampler.stats(),
            scheduler: self.scheduler.stats(),
            profile: self
                .calibration
                .active_profile()
                .map(|profile| profile.name.clone()),
        }
    }

    /// Resolves when the tracking provider ends (or the session is stopped).
    pub async fn capture_finished(&mut self) {
        if let Some(handle) = self.capture.as_mut() {
            if let Err(e) = handle.await {
                log::warn!("Capture task ended abnormally: {}", e);
            }
            self.capture = None;
        }
    }

    /// Cancel both tasks, disconnect and return the final counters.
    pub async fn stop(mut self) -> SessionSummary {
        self.cancel.cancel();
        for handle in [self.capture.take(), self.sender.take()].into_iter().flatten() {
            if let Err(e) = handle.await {
                log::warn!("Session task ended abnormally: {}", e);
            }
        }
        let summary = self.summary();
        self.transport.disconnect().await;
        summary
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{SkeletonLayout, SyntheticHands};
    use crate::transport::{MemorySink, RetryPolicy, TransportState};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_session_streams_and_stops() {
        let layout = SkeletonLayout::VisionOs;
        let sink = MemorySink::new();
        let session = StreamSession::start(
            SyntheticHands::new(layout, 100),
            JointSkeletonSampler::new(layout),
            FrameEncoder::new(layout),
            Transport::from_sink(sink.clone(), RetryPolicy::EveryTick),
            SendRate::clamped(20),
        )
        .await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        let summary = session.stop().await;

        assert!(summary.sampler.accepted > 50);
        assert!(summary.transport.messages_sent >= 8);
        assert_eq!(summary.transport.messages_sent as usize, sink.sent_count());
        assert!(!sink.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_survives_failed_initial_connect() {
        let layout = SkeletonLayout::VisionOs;
        let sink = MemorySink::new();
        sink.fail_next_connect(crate::error::TransportError::ConnectFailed("refused".into()));
        let session = StreamSession::start(
            SyntheticHands::new(layout, 100),
            JointSkeletonSampler::new(layout),
            FrameEncoder::new(layout),
            Transport::from_sink(sink.clone(), RetryPolicy::EveryTick),
            SendRate::clamped(10),
        )
        .await;
        assert!(matches!(session.status().state, TransportState::Failed(_)));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(session.status().messages_sent >= 1);
        assert!(session.status().last_error.is_some());
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_finished_when_provider_ends() {
        let layout = SkeletonLayout::OpenXr;
        let mut session = StreamSession::start(
            SyntheticHands::new(layout, 50).with_limit(5),
            JointSkeletonSampler::new(layout),
            FrameEncoder::new(layout),
            Transport::from_sink(MemorySink::new(), RetryPolicy::EveryTick),
            SendRate::default(),
        )
        .await;
        session.capture_finished().await;
        assert_eq!(session.summary().sampler.accepted, 10);
        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_profile_streams_without_transform() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = CalibrationStore::new(dir.path());
        std::fs::write(dir.path().join("bench.json"), r#"{"name": "bench"}"#).unwrap();

        let layout = SkeletonLayout::VisionOs;
        let sink = MemorySink::new();
        let session = StreamSession::start(
            SyntheticHands::new(layout, 100),
            JointSkeletonSampler::new(layout),
            FrameEncoder::new(layout),
            Transport::from_sink(sink.clone(), RetryPolicy::EveryTick),
            SendRate::clamped(20),
        )
        .await;

        assert!(!session.load_profile(&store, "bench"));
        assert!(!session.load_profile(&store, "absent"));
        assert!(session.calibration().active_profile().is_none());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let summary = session.stop().await;
        assert!(summary.transport.messages_sent >= 4);
        assert_eq!(summary.profile, None);
    }
}
