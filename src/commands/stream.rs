//! Streaming command.
//!
//! Runs the capture → encode → transmit pipeline with the synthetic hand
//! source until the duration elapses, the source ends, or Ctrl-C.
//!
//! ```bash
//! handbridge stream --server http://robot.local:5000 --rate 60 --duration 30
//! handbridge stream --dry-run --rate 120
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::MissedTickBehavior;

use crate::calibration::CalibrationStore;
use crate::codec::FrameEncoder;
use crate::config::Config;
use crate::constants::{DEFAULT_SYNTHETIC_RATE_HZ, STATUS_LOG_INTERVAL};
use crate::session::{SessionSummary, StreamSession};
use crate::tracking::{JointSkeletonSampler, SyntheticHands};
use crate::transport::{TransportKind, TransportStatus};

/// Options of one `stream` invocation not covered by [`Config`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Stop after this long; `None` streams until Ctrl-C.
    pub duration: Option<Duration>,
    /// Update rate of the synthetic hand source.
    pub source_rate_hz: u32,
    /// Seed for the synthetic jitter.
    pub seed: Option<u64>,
    /// Send into memory instead of the network.
    pub dry_run: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            duration: None,
            source_rate_hz: DEFAULT_SYNTHETIC_RATE_HZ,
            seed: None,
            dry_run: false,
        }
    }
}

/// Stream until stopped and print a summary.
///
/// The configured active profile is loaded from `store` at start. A profile
/// that fails to load is reported and streaming continues uncalibrated.
pub async fn run(
    config: &Config,
    store: &CalibrationStore,
    options: StreamOptions,
) -> Result<SessionSummary> {
    let mut config = config.clone();
    if options.dry_run {
        config.transport = TransportKind::Memory;
    }
    config.validate().context("Invalid configuration")?;

    let rate = config.send_rate()?;
    let layout = config.skeleton;
    let transport = config
        .build_transport()
        .with_context(|| format!("Failed to set up {} transport", config.transport))?;

    let mut source = SyntheticHands::new(layout, options.source_rate_hz);
    if let Some(seed) = options.seed {
        source = source.with_seed(seed);
    }

    log::info!(
        "Streaming {} hands at {} over {} to {}",
        layout,
        rate,
        config.transport,
        config.server_url
    );
    let mut session = StreamSession::start(
        source,
        JointSkeletonSampler::new(layout),
        FrameEncoder::new(layout),
        transport,
        rate,
    )
    .await;
    if let Some(name) = config.active_profile.as_deref() {
        session.load_profile(store, name);
    }

    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut status_log = tokio::time::interval_at(
        tokio::time::Instant::now() + STATUS_LOG_INTERVAL,
        STATUS_LOG_INTERVAL,
    );
    status_log.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = &mut deadline => {
                log::info!("Stream duration reached");
                break;
            }
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    log::warn!("Ctrl-C handler failed: {}", e);
                }
                log::info!("Interrupted");
                break;
            }
            () = session.capture_finished() => break,
            _ = status_log.tick() => log_status(&session.status()),
        }
    }

    let summary = session.stop().await;
    print_summary(&summary);
    Ok(summary)
}

fn log_status(status: &TransportStatus) {
    log::info!(
        "{} | sent {} dropped {} failures {}",
        status.state,
        status.messages_sent,
        status.frames_dropped,
        status.send_failures
    );
}

fn print_summary(summary: &SessionSummary) {
    let t = &summary.transport;
    println!("Frames captured: {}", summary.sampler.accepted);
    match &summary.profile {
        Some(name) => println!("Calibration profile: {}", name),
        None => println!("Calibration profile: none"),
    }
    if summary.sampler.rejected > 0 {
        println!("Updates rejected: {}", summary.sampler.rejected);
    }
    println!("Ticks: {}", summary.scheduler.ticks);
    println!("Messages sent: {}", t.messages_sent);
    println!("Frames dropped: {}", t.frames_dropped);
    println!("Send failures: {}", t.send_failures);
    if let Some(at) = t.last_success {
        println!("Last success: {}", at.to_rfc3339());
    }
    if let Some(e) = &t.last_error {
        println!("Last error: {}", e);
    }
}
