//! Hand tracking capture.
//!
//! Converts a tracking provider's asynchronous joint updates into immutable
//! [`HandFrame`] values and keeps the most recent frame per hand for the
//! transport scheduler.
//!
//! - [`skeleton`] - provider joint layouts (joint count and names)
//! - [`frame`] - `HandFrame`, `JointSample`, `TrackedMask`
//! - [`provider`] - the provider trait and a push-callback adapter
//! - [`sampler`] - frame building and latest-frame publication
//! - [`synthetic`] - a rate-driven fake provider
//! - [`replay`] - playback of recorded wire message logs

pub mod frame;
pub mod provider;
pub mod replay;
pub mod sampler;
pub mod skeleton;
pub mod synthetic;

pub use frame::{Chirality, CombinedFrame, HandFrame, JointSample, TrackedMask};
pub use provider::{ChannelProvider, HandUpdate, RawJoint, TrackingProvider, UpdatePusher};
pub use replay::{ReplayLog, ReplayMessage, ReplayProvider};
pub use sampler::{JointSkeletonSampler, LatestFrames, SamplerStats};
pub use skeleton::SkeletonLayout;
pub use synthetic::SyntheticHands;
