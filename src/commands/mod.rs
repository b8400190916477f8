//! CLI subcommand implementations for handbridge.
//!
//! Each submodule holds the logic behind one subcommand; `main.rs` only
//! parses arguments and dispatches here.
//!
//! - [`stream`] - run a streaming session against the configured receiver
//! - [`replay`] - play a recorded message log back to the receiver
//! - [`health`] - check the receiver's liveness endpoint
//! - [`calibrate`] - solve, save and optionally activate a profile
//! - [`profiles`] - list, show and delete saved profiles
//! - [`map`] - map one tracking-space point through a profile
//!
//! # Usage
//!
//! ```ignore
//! use handbridge::commands;
//!
//! let report = commands::health::run(&config).await?;
//! commands::profiles::list(&store, config.active_profile.as_deref())?;
//! ```

pub mod calibrate;
pub mod health;
pub mod map;
pub mod profiles;
pub mod replay;
pub mod stream;

#[doc(inline)]
pub use replay::ReplayOptions;
#[doc(inline)]
pub use stream::StreamOptions;
