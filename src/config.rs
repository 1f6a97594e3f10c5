//! Configuration and CLI argument handling

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, warn};

use crate::error::ConfigError;

/// Timing and storage constants shared by the countdown, activity and submission modules
pub mod constants {
    use std::time::Duration;

    /// Idle time after the last activity before the countdown resumes
    pub const INACTIVITY_THRESHOLD: Duration = Duration::from_secs(60);

    /// Smallest custom timeout accepted from the user (seconds)
    pub const MIN_CUSTOM_TIMEOUT: u64 = 30;
    /// Timeout used when the page does not provide a usable value (seconds)
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

    pub const MAX_RETRY_ATTEMPTS: usize = 3;
    pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(10);
    pub const RETRY_DELAYS: [Duration; 3] = [
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(4),
    ];

    pub const COUNTDOWN_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

    /// Style thresholds for the countdown readout (seconds)
    pub const DANGER_THRESHOLD: u64 = 30;
    pub const WARNING_THRESHOLD: u64 = 60;

    pub const MAX_LOCAL_BACKUPS: usize = 10;

    pub const NOTIFICATION_AUTO_HIDE_DELAY: Duration = Duration::from_secs(5);

    /// Received submissions the receiver keeps in memory; older ones only count
    pub const RECEIVER_RETAINED_SUBMISSIONS: usize = 100;
}

use constants::{DEFAULT_TIMEOUT_SECONDS, MAX_LOCAL_BACKUPS, MIN_CUSTOM_TIMEOUT, WARNING_THRESHOLD};

/// CLI argument parsing structure
#[derive(Parser, Debug)]
#[command(name = "timeout-capture")]
#[command(
    about = "Feedback countdown that auto-submits or backs up input when the session times out"
)]
#[command(version)]
pub struct Config {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an interactive feedback session in the terminal
    Watch(WatchArgs),
    /// Run a feedback receiver exposing POST /submit_feedback
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct WatchArgs {
    /// Base URL of the feedback receiver
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    pub endpoint: String,

    /// Session timeout in seconds (falls back to 300 when missing or invalid)
    #[arg(short, long)]
    pub timeout: Option<String>,

    /// Seconds remaining at which a one-time warning is raised
    #[arg(long, default_value_t = WARNING_THRESHOLD)]
    pub warning: u64,

    /// Server time (RFC 3339) used to compute the clock offset
    #[arg(long)]
    pub server_time: Option<String>,

    /// Directory holding local backups
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,

    /// Number of local backups to keep
    #[arg(
        long,
        default_value_t = MAX_LOCAL_BACKUPS,
        value_parser = parse_backup_capacity
    )]
    pub max_backups: usize,

    /// CSRF token sent with every submission
    #[arg(long)]
    pub csrf_token: Option<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to bind the receiver to
    #[arg(short, long, default_value = "5000")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Answer the first N submissions with 503 to exercise client retries
    #[arg(long, default_value_t = 0)]
    pub fail_first: usize,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Get the appropriate log level based on verbose flag
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

impl ServeArgs {
    /// Get the receiver address as a formatted string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl WatchArgs {
    /// Resolve the backup directory, defaulting to the platform data dir
    pub fn backup_dir(&self) -> PathBuf {
        if let Some(dir) = &self.backup_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "timeout-capture")
            .map(|dirs| dirs.data_dir().join("backups"))
            .unwrap_or_else(|| PathBuf::from(".timeout-capture-backups"))
    }
}

/// Countdown configuration for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    pub total_seconds: u64,
    pub warning_threshold_seconds: u64,
    pub server_time_offset_ms: i64,
}

impl TimerConfig {
    /// Build a config; the warning threshold is clamped to the total
    pub fn new(total_seconds: u64, warning_threshold_seconds: u64) -> Result<Self, ConfigError> {
        if total_seconds == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(Self {
            total_seconds,
            warning_threshold_seconds: warning_threshold_seconds.min(total_seconds),
            server_time_offset_ms: 0,
        })
    }

    pub fn with_offset(mut self, server_time_offset_ms: i64) -> Self {
        self.server_time_offset_ms = server_time_offset_ms;
        self
    }

    /// Same config with a different total, keeping threshold and offset
    pub fn with_total(&self, total_seconds: u64) -> Result<Self, ConfigError> {
        Ok(Self::new(total_seconds, self.warning_threshold_seconds)?
            .with_offset(self.server_time_offset_ms))
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            total_seconds: DEFAULT_TIMEOUT_SECONDS,
            warning_threshold_seconds: WARNING_THRESHOLD,
            server_time_offset_ms: 0,
        }
    }
}

/// Parse the initial timeout provided by the page, falling back to the default
pub fn parse_initial_timeout(raw: Option<&str>) -> u64 {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_TIMEOUT_SECONDS;
    };
    match raw.parse::<i64>() {
        Ok(value) if value > 0 => value as u64,
        _ => {
            warn!("Ignoring invalid timeout value {:?}, using {}s", raw, DEFAULT_TIMEOUT_SECONDS);
            DEFAULT_TIMEOUT_SECONDS
        }
    }
}

/// Validate a user-entered custom timeout
/// `--max-backups` must leave room for at least one record
fn parse_backup_capacity(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

pub fn parse_custom_timeout(raw: &str) -> Result<u64, ConfigError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidTimeout(raw.to_string()))?;
    if value < MIN_CUSTOM_TIMEOUT as i64 {
        debug!("Rejecting custom timeout {} below minimum {}", value, MIN_CUSTOM_TIMEOUT);
        return Err(ConfigError::BelowMinimum { value, minimum: MIN_CUSTOM_TIMEOUT });
    }
    Ok(value as u64)
}
