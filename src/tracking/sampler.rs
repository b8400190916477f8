//! Turns provider updates into immutable hand frames.
//!
//! # Data flow
//!
//! ```text
//! TrackingProvider ──HandUpdate──► JointSkeletonSampler ──Arc<HandFrame>──► LatestFrames
//!                                                                              │
//!                                              scheduler tick ── snapshot() ◄──┘
//! ```
//!
//! The sampler never waits on the network: publishing a frame replaces
//! the previous one for that hand and returns immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Chirality, CombinedFrame, HandFrame, HandUpdate, SkeletonLayout, TrackingProvider};

type Slot = watch::Sender<Option<Arc<HandFrame>>>;

/// Most recent frame per hand.
///
/// Cheap to clone; all clones share the same slots. Each slot is replaced
/// wholesale, so readers never observe a partially built frame.
#[derive(Debug, Clone)]
pub struct LatestFrames {
    left: Arc<Slot>,
    right: Arc<Slot>,
}

impl Default for LatestFrames {
    fn default() -> Self {
        Self {
            left: Arc::new(watch::Sender::new(None)),
            right: Arc::new(watch::Sender::new(None)),
        }
    }
}

impl LatestFrames {
    fn slot(&self, hand: Chirality) -> &Slot {
        match hand {
            Chirality::Left => &self.left,
            Chirality::Right => &self.right,
        }
    }

    /// Replace the latest frame for the frame's hand.
    pub fn publish(&self, frame: Arc<HandFrame>) {
        self.slot(frame.chirality()).send_replace(Some(frame));
    }

    /// Latest frame for `hand`, if one was ever captured.
    pub fn latest(&self, hand: Chirality) -> Option<Arc<HandFrame>> {
        self.slot(hand).borrow().clone()
    }

    /// Combine the latest frame of each hand under one send timestamp.
    pub fn snapshot(&self, timestamp: f64) -> CombinedFrame {
        CombinedFrame {
            timestamp,
            left: self.latest(Chirality::Left),
            right: self.latest(Chirality::Right),
        }
    }

    /// Observe updates for one hand.
    pub fn watch(&self, hand: Chirality) -> watch::Receiver<Option<Arc<HandFrame>>> {
        self.slot(hand).subscribe()
    }

    /// Forget both hands.
    pub fn clear(&self) {
        self.left.send_replace(None);
        self.right.send_replace(None);
    }
}

/// Builds [`HandFrame`]s from provider updates and publishes them.
#[derive(Debug, Clone)]
pub struct JointSkeletonSampler {
    layout: SkeletonLayout,
    latest: LatestFrames,
    counters: Arc<SamplerCounters>,
}

#[derive(Debug, Default)]
struct SamplerCounters {
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// Sampler counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplerStats {
    /// Updates turned into frames.
    pub accepted: u64,
    /// Updates discarded for not matching the layout.
    pub rejected: u64,
}

impl JointSkeletonSampler {
    /// Create a sampler for `layout`.
    pub fn new(layout: SkeletonLayout) -> Self {
        Self {
            layout,
            latest: LatestFrames::default(),
            counters: Arc::default(),
        }
    }

    /// Layout every frame is checked against.
    pub fn layout(&self) -> SkeletonLayout {
        self.layout
    }

    /// Shared handle to the latest frames.
    pub fn latest(&self) -> LatestFrames {
        self.latest.clone()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Build and publish a frame for one update.
    ///
    /// Updates whose joint count does not match the layout are dropped and
    /// counted; tracking loss is not an error and produces a frame with an
    /// empty mask.
    pub fn sample(&self, update: HandUpdate) -> Option<Arc<HandFrame>> {
        let HandUpdate {
            chirality,
            timestamp,
            joints,
        } = update;

        match HandFrame::new(
            self.layout,
            chirality,
            timestamp,
            joints.into_iter().map(|j| (j.position, j.tracked)),
        ) {
            Ok(frame) => {
                let frame = Arc::new(frame);
                self.latest.publish(Arc::clone(&frame));
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Some(frame)
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("Dropping tracking update: {}", e);
                None
            }
        }
    }

    /// Subscribe to `provider` and yield each frame as it is built.
    ///
    /// Every yielded frame has already been published to [`latest`](Self::latest).
    pub fn subscribe<P: TrackingProvider + ?Sized>(
        &self,
        provider: &mut P,
    ) -> impl Stream<Item = Arc<HandFrame>> + Send + 'static {
        let sampler = self.clone();
        provider
            .updates()
            .filter_map(move |update| std::future::ready(sampler.sample(update)))
    }

    /// Drive `provider` until it ends or `cancel` fires.
    pub async fn run<P: TrackingProvider + ?Sized>(
        &self,
        provider: &mut P,
        cancel: CancellationToken,
    ) {
        let mut frames = Box::pin(self.subscribe(provider));
        log::info!("Capture started ({} layout)", self.layout);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    log::info!("Capture cancelled");
                    break;
                }
                frame = frames.next() => {
                    if frame.is_none() {
                        log::info!("Tracking provider ended");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{ChannelProvider, RawJoint};

    fn update(hand: Chirality, ts: f64, count: usize, tracked: bool) -> HandUpdate {
        HandUpdate {
            chirality: hand,
            timestamp: ts,
            joints: (0..count)
                .map(|i| RawJoint {
                    position: [i as f32, ts as f32, 0.0],
                    tracked,
                })
                .collect(),
        }
    }

    #[test]
    fn test_sample_publishes_latest_per_hand() {
        let sampler = JointSkeletonSampler::new(SkeletonLayout::VisionOs);
        sampler.sample(update(Chirality::Left, 1.0, 27, true));
        sampler.sample(update(Chirality::Right, 1.5, 27, true));
        sampler.sample(update(Chirality::Left, 2.0, 27, true));

        let snap = sampler.latest().snapshot(3.0);
        assert_eq!(snap.timestamp, 3.0);
        assert_eq!(snap.left.unwrap().timestamp(), 2.0);
        assert_eq!(snap.right.unwrap().timestamp(), 1.5);
    }

    #[test]
    fn test_wrong_joint_count_rejected_and_counted() {
        let sampler = JointSkeletonSampler::new(SkeletonLayout::VisionOs);
        assert!(sampler.sample(update(Chirality::Left, 1.0, 26, true)).is_none());
        assert!(sampler.latest().latest(Chirality::Left).is_none());
        assert_eq!(
            sampler.stats(),
            SamplerStats {
                accepted: 0,
                rejected: 1
            }
        );
    }

    #[test]
    fn test_tracking_loss_is_an_empty_mask_not_an_error() {
        let sampler = JointSkeletonSampler::new(SkeletonLayout::OpenXr);
        let frame = sampler
            .sample(update(Chirality::Right, 1.0, 26, false))
            .unwrap();
        assert!(frame.tracked_mask().is_empty());
        assert!(sampler.latest().latest(Chirality::Right).is_some());
    }

    #[test]
    fn test_empty_snapshot_before_any_update() {
        let sampler = JointSkeletonSampler::new(SkeletonLayout::VisionOs);
        assert!(sampler.latest().snapshot(0.0).is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_yields_built_frames() {
        let sampler = JointSkeletonSampler::new(SkeletonLayout::VisionOs);
        let (mut provider, pusher) = ChannelProvider::new();
        let frames = sampler.subscribe(&mut provider);

        pusher.push(update(Chirality::Left, 1.0, 27, true));
        pusher.push(update(Chirality::Left, 2.0, 3, true));
        pusher.push(update(Chirality::Right, 3.0, 27, true));
        drop(pusher);

        let frames: Vec<Arc<HandFrame>> = frames.collect().await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].chirality(), Chirality::Right);
        assert_eq!(sampler.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let sampler = JointSkeletonSampler::new(SkeletonLayout::VisionOs);
        let (mut provider, _pusher) = ChannelProvider::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Provider is silent; run must still return once cancelled.
        sampler.run(&mut provider, cancel).await;
    }
}
