//! Tracking provider abstraction.
//!
//! The platform's push-style joint callback is modelled as a stream of
//! [`HandUpdate`]s. The core depends only on this shape, never on a
//! platform session object.

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use super::Chirality;
use crate::constants::PROVIDER_BUFFER_CAPACITY;

/// Raw joint data as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawJoint {
    /// Joint position in tracking space.
    pub position: [f32; 3],
    /// Whether the provider considers this joint tracked.
    pub tracked: bool,
}

/// One provider update for one hand.
#[derive(Debug, Clone, PartialEq)]
pub struct HandUpdate {
    /// Which hand this update is for.
    pub chirality: Chirality,
    /// Provider capture time, seconds.
    pub timestamp: f64,
    /// Joints in provider order.
    pub joints: Vec<RawJoint>,
}

/// Source of per-hand joint updates.
///
/// The stream is lazy, lossy and infinite. It may pause for any length of
/// time; silence is not an error. Dropping the stream cancels the
/// subscription. A provider hands out its stream once: later calls yield
/// an empty stream.
pub trait TrackingProvider: Send {
    /// Take the update stream.
    fn updates(&mut self) -> BoxStream<'static, HandUpdate>;
}

/// Provider fed by a push-style callback through [`UpdatePusher`].
///
/// Updates sit in a ring of fixed capacity. When the capture task falls
/// behind, the oldest buffered updates are overwritten, so the stream always
/// resumes at the most recent data.
#[derive(Debug)]
pub struct ChannelProvider {
    rx: Option<broadcast::Receiver<HandUpdate>>,
}

/// Cloneable push handle for [`ChannelProvider`].
///
/// Safe to call from the provider's callback thread: [`push`](Self::push)
/// never blocks.
#[derive(Debug, Clone)]
pub struct UpdatePusher {
    tx: broadcast::Sender<HandUpdate>,
}

impl ChannelProvider {
    /// Create a provider with the default buffer capacity.
    pub fn new() -> (Self, UpdatePusher) {
        Self::with_capacity(PROVIDER_BUFFER_CAPACITY)
    }

    /// Create a provider buffering at most `capacity` updates (rounded up
    /// to a power of two).
    pub fn with_capacity(capacity: usize) -> (Self, UpdatePusher) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { rx: Some(rx) }, UpdatePusher { tx })
    }
}

impl TrackingProvider for ChannelProvider {
    fn updates(&mut self) -> BoxStream<'static, HandUpdate> {
        match self.rx.take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(update) => return Some((update, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::debug!("Capture fell behind, skipped {} stale updates", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            })
            .boxed(),
            None => {
                log::warn!("Tracking provider stream already taken");
                stream::empty().boxed()
            }
        }
    }
}

impl UpdatePusher {
    /// Offer an update. A full buffer evicts its oldest update. Returns
    /// `false` only if the subscription is gone.
    pub fn push(&self, update: HandUpdate) -> bool {
        self.tx.send(update).is_ok()
    }
}
