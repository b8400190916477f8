//! Replay command.
//!
//! Streams a recorded message log back to the receiver, keeping the
//! recorded timing between messages.
//!
//! ```bash
//! handbridge replay list --log-dir ./logs
//! handbridge replay --latest --speed 2 --loop
//! handbridge replay --log-file ./logs/hand_tracking_20240610_081320.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};

use super::health;
use crate::codec::FrameEncoder;
use crate::config::Config;
use crate::constants::{DEFAULT_REPLAY_LOG_DIR, REPLAY_LOG_PREFIX};
use crate::session::{SessionSummary, StreamSession};
use crate::tracking::{JointSkeletonSampler, ReplayLog, ReplayProvider};
use crate::transport::TransportKind;

/// Options of one `replay` invocation.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Log to play; `None` requires `latest`.
    pub log_file: Option<PathBuf>,
    /// Directory searched by `latest`.
    pub log_dir: PathBuf,
    /// Play the newest log in `log_dir`.
    pub latest: bool,
    /// Playback speed multiplier.
    pub speed: f64,
    /// Restart when the log ends.
    pub looping: bool,
    /// Send into memory instead of the network.
    pub dry_run: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            log_file: None,
            log_dir: PathBuf::from(DEFAULT_REPLAY_LOG_DIR),
            latest: false,
            speed: 1.0,
            looping: false,
            dry_run: false,
        }
    }
}

/// A recorded log found by [`list`].
#[derive(Debug, Clone)]
pub struct LogInfo {
    /// Full path.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Number of `data` entries.
    pub messages: usize,
    /// Last modification time.
    pub modified: Option<DateTime<Local>>,
}

fn log_files(log_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory {}", log_dir.display()))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| {
                    name.starts_with(REPLAY_LOG_PREFIX)
                        && Path::new(name).extension().is_some_and(|ext| ext == "json")
                })
        })
        .collect();
    // Names embed the recording time, so name order is age order.
    files.sort();
    Ok(files)
}

fn count_messages(path: &Path) -> usize {
    let Ok(text) = fs::read_to_string(path) else {
        log::debug!("Could not read {}", path.display());
        return 0;
    };
    text.lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|entry| entry.get("data").is_some_and(|data| !data.is_null()))
        .count()
}

/// Recorded logs in `log_dir`, oldest first, printed as a numbered list.
pub fn list(log_dir: &Path) -> Result<Vec<LogInfo>> {
    let logs: Vec<LogInfo> = log_files(log_dir)?
        .into_iter()
        .map(|path| {
            let meta = fs::metadata(&path).ok();
            LogInfo {
                size: meta.as_ref().map_or(0, fs::Metadata::len),
                modified: meta
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Local>::from),
                messages: count_messages(&path),
                path,
            }
        })
        .collect();

    if logs.is_empty() {
        println!("No logs in {}", log_dir.display());
    }
    for (i, log) in logs.iter().enumerate() {
        let name = log
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let modified = log
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}. {} - {:.1}KB, {} messages, {}",
            i + 1,
            name,
            log.size as f64 / 1024.0,
            log.messages,
            modified
        );
    }
    Ok(logs)
}

/// Newest recorded log in `log_dir`.
pub fn latest(log_dir: &Path) -> Result<PathBuf> {
    log_files(log_dir)?
        .pop()
        .with_context(|| format!("No logs in {}", log_dir.display()))
}

fn resolve_log(options: &ReplayOptions) -> Result<PathBuf> {
    if options.latest {
        let path = latest(&options.log_dir)?;
        log::info!("Using latest log {}", path.display());
        Ok(path)
    } else if let Some(path) = &options.log_file {
        Ok(PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref()))
    } else {
        bail!("Specify a log file or use --latest")
    }
}

/// Check the receiver, then replay the selected log until it ends (or,
/// when looping, until Ctrl-C).
pub async fn run(config: &Config, options: ReplayOptions) -> Result<SessionSummary> {
    let mut config = config.clone();
    if options.dry_run {
        config.transport = TransportKind::Memory;
    }
    config.validate().context("Invalid configuration")?;
    if !(options.speed.is_finite() && options.speed > 0.0) {
        bail!("--speed must be a positive number, got {}", options.speed);
    }

    if config.transport != TransportKind::Memory {
        let report = health::run(&config)
            .await
            .context("Receiver is not responding")?;
        if !report.is_healthy() {
            bail!("Receiver reported an unhealthy status");
        }
    }

    let path = resolve_log(&options)?;
    let layout = config.skeleton;
    let replay_log = ReplayLog::load(&path, &FrameEncoder::new(layout))?;
    if let Some(started) = replay_log.started_at() {
        log::info!("Recording started at {}", started);
    }
    if let Some((messages, duration)) = replay_log.recorded_totals() {
        log::info!("Recording ended with {} messages over {:.2}s", messages, duration);
    }

    let rate = config.send_rate()?;
    let transport = config
        .build_transport()
        .with_context(|| format!("Failed to set up {} transport", config.transport))?;
    let provider = ReplayProvider::new(replay_log)
        .with_speed(options.speed)
        .with_loop(options.looping);

    let mut session = StreamSession::start(
        provider,
        JointSkeletonSampler::new(layout),
        FrameEncoder::new(layout),
        transport,
        rate,
    )
    .await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    tokio::select! {
        () = session.capture_finished() => {
            // one more tick carries the final message
            tokio::time::sleep(rate.period()).await;
        }
        result = &mut ctrl_c => {
            if let Err(e) = result {
                log::warn!("Ctrl-C handler failed: {}", e);
            }
            log::info!("Replay interrupted");
        }
    }

    let summary = session.stop().await;
    println!("Updates replayed: {}", summary.sampler.accepted);
    println!("Messages sent: {}", summary.transport.messages_sent);
    println!("Send failures: {}", summary.transport.send_failures);
    Ok(summary)
}
