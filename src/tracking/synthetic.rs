//! Synthetic tracking source.
//!
//! Produces plausible joint positions for both hands at a fixed rate so the
//! streaming path can be exercised without a headset. Positions hover
//! around a resting pose with small seeded jitter.

use futures_util::stream::{self, BoxStream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use super::{Chirality, HandUpdate, RawJoint, SkeletonLayout, TrackingProvider};

/// Rate-driven generator of left and right hand updates.
#[derive(Debug, Clone)]
pub struct SyntheticHands {
    layout: SkeletonLayout,
    rate_hz: u32,
    seed: u64,
    lost: Option<Chirality>,
    limit: Option<u64>,
    taken: bool,
}

struct GeneratorState {
    layout: SkeletonLayout,
    period: Duration,
    interval: Option<tokio::time::Interval>,
    rng: StdRng,
    lost: Option<Chirality>,
    limit: Option<u64>,
    ticks: u64,
    start: Instant,
    epoch_start: f64,
    pending: Option<HandUpdate>,
}

impl SyntheticHands {
    /// Emit one update per hand `rate_hz` times per second.
    pub fn new(layout: SkeletonLayout, rate_hz: u32) -> Self {
        Self {
            layout,
            rate_hz: rate_hz.max(1),
            seed: 0x68_61_6e_64,
            lost: None,
            limit: None,
            taken: false,
        }
    }

    /// Seed for the jitter generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Report every joint of `hand` as untracked.
    pub fn with_lost_hand(mut self, hand: Chirality) -> Self {
        self.lost = Some(hand);
        self
    }

    /// Stop after `ticks` ticks instead of running forever.
    pub fn with_limit(mut self, ticks: u64) -> Self {
        self.limit = Some(ticks);
        self
    }

    /// Update ticks per second.
    pub fn rate_hz(&self) -> u32 {
        self.rate_hz
    }
}

impl GeneratorState {
    fn hand(&mut self, chirality: Chirality, timestamp: f64) -> HandUpdate {
        let base_x = match chirality {
            Chirality::Left => -0.1,
            Chirality::Right => 0.1,
        };
        let tracked = self.lost != Some(chirality);
        let joints = (0..self.layout.joint_count())
            .map(|i| RawJoint {
                position: [
                    base_x + self.rng.random_range(-0.02..0.02),
                    0.5 + i as f32 * 0.01 + self.rng.random_range(-0.01..0.01),
                    -0.3 + self.rng.random_range(-0.02..0.02),
                ],
                tracked,
            })
            .collect();
        HandUpdate {
            chirality,
            timestamp,
            joints,
        }
    }
}

impl TrackingProvider for SyntheticHands {
    fn updates(&mut self) -> BoxStream<'static, HandUpdate> {
        if std::mem::replace(&mut self.taken, true) {
            log::warn!("Synthetic hand stream already taken");
            return stream::empty().boxed();
        }

        let state = GeneratorState {
            layout: self.layout,
            period: Duration::from_secs_f64(1.0 / f64::from(self.rate_hz)),
            interval: None,
            rng: StdRng::seed_from_u64(self.seed),
            lost: self.lost,
            limit: self.limit,
            ticks: 0,
            start: Instant::now(),
            epoch_start: chrono::Utc::now().timestamp_micros() as f64 / 1e6,
            pending: None,
        };

        stream::unfold(state, |mut state| async move {
            if let Some(update) = state.pending.take() {
                return Some((update, state));
            }
            if state.limit.is_some_and(|limit| state.ticks >= limit) {
                return None;
            }
            // Created on first poll so the timer belongs to the consuming runtime.
            let period = state.period;
            let interval = state.interval.get_or_insert_with(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            interval.tick().await;
            if state.ticks == 0 {
                state.start = Instant::now();
            }
            state.ticks += 1;

            let timestamp = state.epoch_start + state.start.elapsed().as_secs_f64();
            let left = state.hand(Chirality::Left, timestamp);
            state.pending = Some(state.hand(Chirality::Right, timestamp));
            Some((left, state))
        })
        .boxed()
    }
}
