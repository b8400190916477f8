//! handbridge command-line entry point.

use anyhow::{Context, Result};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use handbridge::calibration::CalibrationStore;
use handbridge::commands::{self, ReplayOptions, StreamOptions};
use handbridge::config::Config;
use handbridge::constants::{DEFAULT_REPLAY_LOG_DIR, DEFAULT_SYNTHETIC_RATE_HZ};
use handbridge::tracking::SkeletonLayout;
use handbridge::transport::TransportKind;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "handbridge")]
#[command(version = VERSION)]
#[command(about = "Stream hand-tracking poses to a robot and calibrate tracking space")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream synthetic hand frames to the receiver
    Stream {
        /// Receiver URL (http(s):// or ws(s)://)
        #[arg(long)]
        server: Option<String>,
        /// Transport backend: http, websocket or memory
        #[arg(long)]
        transport: Option<TransportKind>,
        /// Send rate in Hz (10-120)
        #[arg(long)]
        rate: Option<u32>,
        /// Joint layout: vision_os or open_xr
        #[arg(long)]
        skeleton: Option<SkeletonLayout>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<f64>,
        /// Synthetic source update rate in Hz
        #[arg(long, default_value_t = DEFAULT_SYNTHETIC_RATE_HZ)]
        source_rate: u32,
        /// Seed for the synthetic source
        #[arg(long)]
        seed: Option<u64>,
        /// Send into memory instead of the network
        #[arg(long)]
        dry_run: bool,
    },
    /// Replay a recorded message log, or list recorded logs
    Replay {
        /// What to do
        #[arg(value_enum, default_value_t = ReplayMode::Replay)]
        action: ReplayMode,
        /// Log file to replay
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// Directory containing recorded logs
        #[arg(long, default_value = DEFAULT_REPLAY_LOG_DIR)]
        log_dir: PathBuf,
        /// Replay the newest log in --log-dir
        #[arg(long)]
        latest: bool,
        /// Receiver URL
        #[arg(long)]
        server: Option<String>,
        /// Playback speed multiplier
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
        /// Restart when the log ends
        #[arg(long = "loop")]
        looping: bool,
        /// Send into memory instead of the network
        #[arg(long)]
        dry_run: bool,
    },
    /// Check the receiver's /health endpoint
    Health {
        /// Receiver URL
        #[arg(long)]
        server: Option<String>,
    },
    /// Solve and save a calibration profile from a points file
    Calibrate {
        /// Profile name
        #[arg(long)]
        name: String,
        /// JSON file with [{label, tracking, robot}, ...]
        #[arg(long)]
        points: String,
        /// Make this the active profile
        #[arg(long)]
        activate: bool,
    },
    /// Manage saved calibration profiles
    Profiles {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Map a tracking-space point to robot space
    Map {
        #[arg(long, allow_negative_numbers = true)]
        x: f64,
        #[arg(long, allow_negative_numbers = true)]
        y: f64,
        #[arg(long, allow_negative_numbers = true)]
        z: f64,
        /// Profile to use instead of the active one
        #[arg(long)]
        profile: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReplayMode {
    /// Stream a log to the receiver
    Replay,
    /// List recorded logs
    List,
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List saved profiles (* marks the active one)
    List,
    /// Show a profile's transform and points
    Show { name: String },
    /// Delete a profile
    Delete { name: String },
}

fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    // HANDBRIDGE_LOG_FILE keeps log lines out of command output
    if let Ok(path) = std::env::var("HANDBRIDGE_LOG_FILE") {
        let path = shellexpand::tilde(&path).into_owned();
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Stream {
            server,
            transport,
            rate,
            skeleton,
            duration,
            source_rate,
            seed,
            dry_run,
        } => {
            let mut config = Config::load()?;
            if let Some(server) = server {
                config.server_url = server;
            }
            if let Some(transport) = transport {
                config.transport = transport;
            }
            if let Some(rate) = rate {
                config.send_rate_hz = rate;
            }
            if let Some(skeleton) = skeleton {
                config.skeleton = skeleton;
            }
            let duration = duration
                .map(Duration::try_from_secs_f64)
                .transpose()
                .context("--duration must be a non-negative number of seconds")?;
            let store = CalibrationStore::in_config_dir(&Config::config_dir()?);
            commands::stream::run(
                &config,
                &store,
                StreamOptions {
                    duration,
                    source_rate_hz: source_rate,
                    seed,
                    dry_run,
                },
            )
            .await?;
        }
        Commands::Replay {
            action: ReplayMode::List,
            log_dir,
            ..
        } => {
            commands::replay::list(&log_dir)?;
        }
        Commands::Replay {
            action: ReplayMode::Replay,
            log_file,
            log_dir,
            latest,
            server,
            speed,
            looping,
            dry_run,
        } => {
            let mut config = Config::load()?;
            if let Some(server) = server {
                config.server_url = server;
            }
            commands::replay::run(
                &config,
                ReplayOptions {
                    log_file,
                    log_dir,
                    latest,
                    speed,
                    looping,
                    dry_run,
                },
            )
            .await?;
        }
        Commands::Health { server } => {
            let mut config = Config::load()?;
            if let Some(server) = server {
                config.server_url = server;
            }
            let report = commands::health::run(&config).await?;
            if !report.is_healthy() {
                eprintln!("Receiver reported an unhealthy status");
                std::process::exit(1);
            }
        }
        Commands::Calibrate {
            name,
            points,
            activate,
        } => {
            commands::calibrate::run(&Config::config_dir()?, &name, &points, activate)?;
        }
        Commands::Profiles { action } => {
            let config = Config::load()?;
            let store = CalibrationStore::in_config_dir(&Config::config_dir()?);
            match action {
                ProfileAction::List => {
                    commands::profiles::list(&store, config.active_profile.as_deref())?;
                }
                ProfileAction::Show { name } => {
                    commands::profiles::show(&store, &name)?;
                }
                ProfileAction::Delete { name } => {
                    commands::profiles::delete(&store, &name)?;
                }
            }
        }
        Commands::Map { x, y, z, profile } => {
            let config = Config::load()?;
            let store = CalibrationStore::in_config_dir(&Config::config_dir()?);
            let name = profile.or(config.active_profile);
            commands::map::run(&store, name.as_deref(), [x, y, z])?;
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("# {}", Config::config_dir()?.join("config.json").display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Err(e) = config.validate() {
                eprintln!("Warning: {:#}", e);
            }
        }
    }

    Ok(())
}
