//! Fixed-rate send loop.
//!
//! The scheduler is the only consumer of [`LatestFrames`]: on every tick it
//! snapshots the newest frame per hand, encodes them into one message and
//! hands it to the transport. Capture runs at the provider's rate, sending
//! at the configured rate, and the two are decoupled by the latest-frame
//! slots, so a 130 Hz provider and a 60 Hz rate produce about 60 sends per
//! second.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{DispatchOutcome, Transport};
use crate::codec::FrameEncoder;
use crate::constants::{DEFAULT_SEND_RATE_HZ, MAX_SEND_RATE_HZ, MIN_SEND_RATE_HZ};
use crate::tracking::LatestFrames;

/// Send frequency, bounded to the supported range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SendRate(u32);

impl SendRate {
    /// `Some` when `hz` is within 10..=120.
    pub fn new(hz: u32) -> Option<Self> {
        (MIN_SEND_RATE_HZ..=MAX_SEND_RATE_HZ)
            .contains(&hz)
            .then_some(Self(hz))
    }

    /// Nearest supported rate.
    pub fn clamped(hz: u32) -> Self {
        Self(hz.clamp(MIN_SEND_RATE_HZ, MAX_SEND_RATE_HZ))
    }

    /// Frequency in hertz.
    pub fn hz(self) -> u32 {
        self.0
    }

    /// Time between ticks.
    pub fn period(self) -> Duration {
        Duration::from_secs(1) / self.0
    }
}

impl Default for SendRate {
    fn default() -> Self {
        Self(DEFAULT_SEND_RATE_HZ)
    }
}

impl TryFrom<u32> for SendRate {
    type Error = String;

    fn try_from(hz: u32) -> Result<Self, Self::Error> {
        Self::new(hz).ok_or_else(|| {
            format!("send rate {hz} Hz outside {MIN_SEND_RATE_HZ}..={MAX_SEND_RATE_HZ}")
        })
    }
}

impl From<SendRate> for u32 {
    fn from(rate: SendRate) -> Self {
        rate.0
    }
}

impl std::fmt::Display for SendRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz", self.0)
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No frame captured yet for either hand.
    NothingCaptured,
    /// Encoding failed; the frame was discarded.
    EncodeFailed,
    /// Message handed to the transport.
    Dispatched(DispatchOutcome),
}

/// Scheduler counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Ticks fired.
    pub ticks: u64,
    /// Ticks skipped because nothing had been captured.
    pub idle_ticks: u64,
    /// Ticks whose frame failed to encode.
    pub encode_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    idle_ticks: AtomicU64,
    encode_failures: AtomicU64,
}

/// Drives snapshot → encode → dispatch at a fixed rate.
#[derive(Debug, Clone)]
pub struct SendScheduler {
    transport: Transport,
    latest: LatestFrames,
    encoder: FrameEncoder,
    rate: SendRate,
    counters: Arc<Counters>,
}

impl SendScheduler {
    /// Scheduler sending `latest` through `transport` at `rate`.
    pub fn new(
        transport: Transport,
        latest: LatestFrames,
        encoder: FrameEncoder,
        rate: SendRate,
    ) -> Self {
        Self {
            transport,
            latest,
            encoder,
            rate,
            counters: Arc::default(),
        }
    }

    /// Configured rate.
    pub fn rate(&self) -> SendRate {
        self.rate
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            idle_ticks: self.counters.idle_ticks.load(Ordering::Relaxed),
            encode_failures: self.counters.encode_failures.load(Ordering::Relaxed),
        }
    }

    /// Run one tick now.
    pub fn tick(&self) -> TickOutcome {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let timestamp = Utc::now().timestamp_micros() as f64 / 1e6;
        let combined = self.latest.snapshot(timestamp);
        if combined.is_empty() {
            self.counters.idle_ticks.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::NothingCaptured;
        }

        match self.encoder.encode(&combined) {
            Ok(payload) => TickOutcome::Dispatched(self.transport.dispatch(payload)),
            Err(e) => {
                self.counters.encode_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("Skipping frame: {}", e);
                TickOutcome::EncodeFailed
            }
        }
    }

    /// Tick at the configured rate until `cancel` fires.
    ///
    /// Uses the monotonic clock; ticks missed while the runtime was busy
    /// are skipped rather than fired in a burst.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.rate.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!(
            "Sending at {} over {}",
            self.rate,
            self.transport.kind()
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let outcome = self.tick();
                    log::trace!("Tick: {:?}", outcome);
                }
            }
        }
        log::info!("Send loop stopped after {} ticks", self.stats().ticks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemorySink, RetryPolicy};
    use crate::tracking::{Chirality, HandFrame, SkeletonLayout};

    fn left_frame() -> Arc<HandFrame> {
        let layout = SkeletonLayout::VisionOs;
        Arc::new(
            HandFrame::new(
                layout,
                Chirality::Left,
                1.0,
                (0..layout.joint_count()).map(|i| ([i as f32, 0.0, 0.0], true)),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_send_rate_bounds() {
        assert!(SendRate::new(9).is_none());
        assert_eq!(SendRate::new(10).map(SendRate::hz), Some(10));
        assert_eq!(SendRate::new(120).map(SendRate::hz), Some(120));
        assert!(SendRate::new(121).is_none());
        assert_eq!(SendRate::clamped(500).hz(), 120);
        assert_eq!(SendRate::clamped(0).hz(), 10);
        assert_eq!(SendRate::default().hz(), 60);
    }

    #[test]
    fn test_send_rate_period() {
        assert_eq!(SendRate::clamped(10).period(), Duration::from_millis(100));
        assert_eq!(SendRate::clamped(100).period(), Duration::from_millis(10));
    }

    #[test]
    fn test_send_rate_serde_validates() {
        let rate: SendRate = serde_json::from_str("30").unwrap();
        assert_eq!(rate.hz(), 30);
        assert!(serde_json::from_str::<SendRate>("1000").is_err());
    }

    #[tokio::test]
    async fn test_tick_without_capture_sends_nothing() {
        let sink = MemorySink::new();
        let transport = Transport::from_sink(sink.clone(), RetryPolicy::EveryTick);
        transport.connect().await.unwrap();
        let scheduler = SendScheduler::new(
            transport,
            LatestFrames::default(),
            FrameEncoder::new(SkeletonLayout::VisionOs),
            SendRate::default(),
        );

        assert_eq!(scheduler.tick(), TickOutcome::NothingCaptured);
        assert_eq!(scheduler.stats().idle_ticks, 1);
        assert_eq!(sink.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_dispatches_latest_frame() {
        let sink = MemorySink::new();
        let transport = Transport::from_sink(sink.clone(), RetryPolicy::EveryTick);
        transport.connect().await.unwrap();
        let latest = LatestFrames::default();
        latest.publish(left_frame());
        let scheduler = SendScheduler::new(
            transport.clone(),
            latest,
            FrameEncoder::new(SkeletonLayout::VisionOs),
            SendRate::default(),
        );

        assert_eq!(
            scheduler.tick(),
            TickOutcome::Dispatched(DispatchOutcome::Issued)
        );
        let mut rx = transport.subscribe();
        rx.wait_for(|s| s.messages_sent == 1).await.unwrap();

        let sent = sink.sent();
        let decoded = FrameEncoder::new(SkeletonLayout::VisionOs)
            .decode(&sent[0])
            .unwrap();
        assert!(decoded.left.is_some());
        assert!(decoded.right.is_none());
    }

    #[tokio::test]
    async fn test_encode_failure_is_counted_not_sent() {
        let sink = MemorySink::new();
        let transport = Transport::from_sink(sink.clone(), RetryPolicy::EveryTick);
        transport.connect().await.unwrap();
        let latest = LatestFrames::default();
        latest.publish(left_frame());
        let scheduler = SendScheduler::new(
            transport,
            latest,
            FrameEncoder::new(SkeletonLayout::OpenXr),
            SendRate::default(),
        );

        assert_eq!(scheduler.tick(), TickOutcome::EncodeFailed);
        assert_eq!(scheduler.stats().encode_failures, 1);
        assert_eq!(sink.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_drops_ticks_instead_of_queueing() {
        // 100 ms per send at 20 Hz: every other tick finds a send in flight.
        let sink = MemorySink::new().with_latency(Duration::from_millis(100));
        let transport = Transport::from_sink(sink.clone(), RetryPolicy::EveryTick);
        transport.connect().await.unwrap();
        let latest = LatestFrames::default();
        latest.publish(left_frame());
        let scheduler = SendScheduler::new(
            transport.clone(),
            latest,
            FrameEncoder::new(SkeletonLayout::VisionOs),
            SendRate::clamped(20),
        );

        let cancel = CancellationToken::new();
        let runner = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(1010)).await;
        cancel.cancel();
        runner.await.unwrap();

        // 21 ticks; a send occupies two or three of them.
        let status = transport.status();
        let sent = sink.sent_count();
        assert!((6..=11).contains(&sent), "sent {sent}");
        assert!(status.frames_dropped >= 8, "dropped {}", status.frames_dropped);
        assert_eq!(scheduler.stats().ticks, 21);
    }
}
