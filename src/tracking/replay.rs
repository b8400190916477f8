//! Recorded message playback.
//!
//! A receiver can record every wire message it accepts as one JSON object
//! per line:
//!
//! ```text
//! {"type": "metadata", "timestamp": 1718000000.0, "datetime": "2024-06-10T08:13:20", "version": "1.0"}
//! {"server_timestamp": 1718000000.51, "message_index": 0, "data": {"timestamp": ..., "leftHand": ..., "rightHand": ...}}
//! {"type": "session_end", "total_messages": 1, "duration": 12.5, ...}
//! ```
//!
//! [`ReplayLog`] decodes the `data` entries and [`ReplayProvider`] feeds
//! them back as tracking updates, keeping the recorded gaps between
//! messages (scaled by a speed factor).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tokio::time::Instant;

use super::{Chirality, HandFrame, HandUpdate, RawJoint, SkeletonLayout, TrackingProvider};
use crate::codec::{DecodedMessage, FrameEncoder};
use crate::constants::REPLAY_LOOP_PAUSE;
use crate::error::ReplayError;

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(rename = "type")]
    kind: Option<String>,
    server_timestamp: Option<f64>,
    datetime: Option<String>,
    total_messages: Option<u64>,
    duration: Option<f64>,
    data: Option<serde_json::Value>,
}

/// One decoded message and when it was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayMessage {
    /// Seconds after the first message of the log.
    pub offset: f64,
    /// Decoded hands.
    pub message: DecodedMessage,
}

/// Decoded contents of one recorded log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayLog {
    layout: SkeletonLayout,
    messages: Vec<ReplayMessage>,
    skipped: usize,
    started_at: Option<String>,
    recorded_messages: Option<u64>,
    recorded_duration: Option<f64>,
}

impl ReplayLog {
    /// Read and decode the log at `path`.
    pub fn load(path: &Path, encoder: &FrameEncoder) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path).map_err(|source| ReplayError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let log = Self::parse(&text, encoder, &path.display().to_string())?;
        log::info!(
            "Loaded {} messages from {} ({} skipped)",
            log.len(),
            path.display(),
            log.skipped
        );
        Ok(log)
    }

    /// Decode log `text`; `name` only labels errors.
    ///
    /// Lines that are not JSON, and `data` entries that do not decode for
    /// the encoder's layout, are skipped with a warning.
    pub fn parse(text: &str, encoder: &FrameEncoder, name: &str) -> Result<Self, ReplayError> {
        let mut log = Self {
            layout: encoder.layout(),
            messages: Vec::new(),
            skipped: 0,
            started_at: None,
            recorded_messages: None,
            recorded_duration: None,
        };
        let mut first: Option<f64> = None;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: LogLine = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("{}:{}: unreadable line: {}", name, number + 1, e);
                    log.skipped += 1;
                    continue;
                }
            };
            match entry.kind.as_deref() {
                Some("metadata") => log.started_at = entry.datetime,
                Some("session_end") => {
                    log.recorded_messages = entry.total_messages;
                    log.recorded_duration = entry.duration;
                }
                _ => {}
            }
            let Some(data) = entry.data.filter(|data| !data.is_null()) else {
                continue;
            };
            let message = match encoder.decode(&data.to_string()) {
                Ok(message) => message,
                Err(e) => {
                    log::warn!("{}:{}: {}", name, number + 1, e);
                    log.skipped += 1;
                    continue;
                }
            };
            let recorded = entry.server_timestamp.unwrap_or(message.timestamp);
            let origin = *first.get_or_insert(recorded);
            log.messages.push(ReplayMessage {
                offset: (recorded - origin).max(0.0),
                message,
            });
        }

        if log.messages.is_empty() {
            return Err(ReplayError::Empty(name.to_string()));
        }
        Ok(log)
    }

    /// Layout the messages were decoded with.
    pub fn layout(&self) -> SkeletonLayout {
        self.layout
    }

    /// Decoded messages in log order.
    pub fn messages(&self) -> &[ReplayMessage] {
        &self.messages
    }

    /// Number of decoded messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false for a successfully parsed log.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Lines that could not be read or decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Recorded span from the first to the last message, seconds.
    pub fn duration(&self) -> f64 {
        self.messages.last().map_or(0.0, |m| m.offset)
    }

    /// Recording start as written by the receiver.
    pub fn started_at(&self) -> Option<&str> {
        self.started_at.as_deref()
    }

    /// Message count and duration from the receiver's closing entry.
    pub fn recorded_totals(&self) -> Option<(u64, f64)> {
        self.recorded_messages.zip(self.recorded_duration)
    }
}

/// Tracking provider replaying a [`ReplayLog`].
///
/// Each message becomes one update per hand; a hand that is `null` in the
/// message is reported with every joint untracked.
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    log: Arc<ReplayLog>,
    speed: f64,
    looping: bool,
    taken: bool,
}

struct PlaybackState {
    log: Arc<ReplayLog>,
    speed: f64,
    looping: bool,
    index: usize,
    iteration: u64,
    start: Option<Instant>,
    pending: Option<HandUpdate>,
}

impl ReplayProvider {
    /// Play `log` once at recorded speed.
    pub fn new(log: ReplayLog) -> Self {
        Self {
            log: Arc::new(log),
            speed: 1.0,
            looping: false,
            taken: false,
        }
    }

    /// Playback speed multiplier; must be finite and positive.
    pub fn with_speed(mut self, speed: f64) -> Self {
        if speed.is_finite() && speed > 0.0 {
            self.speed = speed;
        } else {
            log::warn!("Ignoring replay speed {}, playing at 1x", speed);
        }
        self
    }

    /// Restart from the first message after a pause instead of ending.
    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Effective speed multiplier.
    pub fn speed(&self) -> f64 {
        self.speed
    }
}

impl PlaybackState {
    fn due(&self, offset: f64) -> Duration {
        Duration::try_from_secs_f64(offset / self.speed).unwrap_or(Duration::ZERO)
    }

    fn update(&self, chirality: Chirality, timestamp: f64, frame: Option<&HandFrame>) -> HandUpdate {
        let joints = match frame {
            Some(frame) => frame
                .joints()
                .iter()
                .map(|j| RawJoint {
                    position: j.position,
                    tracked: j.tracked,
                })
                .collect(),
            None => vec![
                RawJoint {
                    position: [0.0; 3],
                    tracked: false,
                };
                self.log.layout().joint_count()
            ],
        };
        HandUpdate {
            chirality,
            timestamp,
            joints,
        }
    }
}

impl TrackingProvider for ReplayProvider {
    fn updates(&mut self) -> BoxStream<'static, HandUpdate> {
        if std::mem::replace(&mut self.taken, true) {
            log::warn!("Replay stream already taken");
            return stream::empty().boxed();
        }

        let state = PlaybackState {
            log: Arc::clone(&self.log),
            speed: self.speed,
            looping: self.looping,
            index: 0,
            iteration: 1,
            start: None,
            pending: None,
        };

        stream::unfold(state, |mut state| async move {
            if let Some(update) = state.pending.take() {
                return Some((update, state));
            }
            if state.index == state.log.len() {
                log::info!("Replay iteration {} complete", state.iteration);
                if !state.looping {
                    return None;
                }
                tokio::time::sleep(REPLAY_LOOP_PAUSE).await;
                state.index = 0;
                state.iteration += 1;
                state.start = None;
            }
            if state.index == 0 {
                log::info!(
                    "Replaying {} messages at {}x (iteration {})",
                    state.log.len(),
                    state.speed,
                    state.iteration
                );
            }

            let start = *state.start.get_or_insert_with(Instant::now);
            let entry = state.log.messages().get(state.index)?.clone();
            tokio::time::sleep_until(start + state.due(entry.offset)).await;
            state.index += 1;

            let DecodedMessage {
                timestamp,
                left,
                right,
            } = entry.message;
            let left = state.update(Chirality::Left, timestamp, left.as_ref());
            state.pending = Some(state.update(Chirality::Right, timestamp, right.as_ref()));
            Some((left, state))
        })
        .boxed()
    }
}
