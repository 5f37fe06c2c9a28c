//! Process configuration, read from the environment at startup

use std::path::PathBuf;
use std::time::Duration;

/// Prefix for per-domain backend overrides in the environment,
/// e.g. `IDLEWAKE__app.example.com__container=my-app`.
pub const REGISTRY_ENV_PREFIX: &str = "IDLEWAKE__";

/// Runtime settings for the controller
#[derive(Debug, Clone)]
pub struct Settings {
    /// Log at info level instead of warn (affects log output only)
    pub verbose: bool,

    /// Minutes without traffic before a running container is stopped
    pub timeout_minutes: u64,

    /// Seconds between inactivity sweeps
    pub sweep_interval_secs: u64,

    /// Milliseconds between polls for access log growth
    pub poll_interval_ms: u64,

    /// Seconds to back off after an ingest cycle error
    pub error_backoff_secs: u64,

    /// Directory holding per-container activity markers
    pub marker_dir: PathBuf,

    /// Proxy access log to tail
    pub access_log: PathBuf,

    /// File-based registry source (TOML, re-read per lookup)
    pub registry_file: PathBuf,

    /// Where to publish the domain currently being activated, for the
    /// proxy's loading page. `None` disables the side channel.
    pub announce_file: Option<PathBuf>,

    /// Token whose presence in a log line marks an upstream failure
    pub failure_marker: String,
}

impl Settings {
    /// Load settings from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let announce_file = match std::env::var("IDLEWAKE_ANNOUNCE_FILE") {
            Ok(v) if v.is_empty() => None,
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => Some(default_announce_file()),
        };

        Self {
            verbose: env_flag("VERBOSE_LOGGING"),
            timeout_minutes: env_u64("IDLEWAKE_TIMEOUT_MINUTES", default_timeout_minutes()),
            sweep_interval_secs: env_u64(
                "IDLEWAKE_SWEEP_INTERVAL_SECS",
                default_sweep_interval_secs(),
            ),
            poll_interval_ms: env_u64("IDLEWAKE_LOG_POLL_INTERVAL_MS", default_poll_interval_ms()),
            error_backoff_secs: env_u64(
                "IDLEWAKE_ERROR_BACKOFF_SECS",
                default_error_backoff_secs(),
            ),
            marker_dir: env_path("IDLEWAKE_MARKER_DIR", default_marker_dir),
            access_log: env_path("IDLEWAKE_ACCESS_LOG", default_access_log),
            registry_file: env_path("IDLEWAKE_REGISTRY_FILE", default_registry_file),
            announce_file,
            failure_marker: std::env::var("IDLEWAKE_FAILURE_MARKER")
                .unwrap_or_else(|_| default_failure_marker()),
        }
    }

    /// Inactivity timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    /// Sweep cadence as a duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Log poll cadence as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Post-error backoff as a duration
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbose: false,
            timeout_minutes: default_timeout_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_secs: default_error_backoff_secs(),
            marker_dir: default_marker_dir(),
            access_log: default_access_log(),
            registry_file: default_registry_file(),
            announce_file: Some(default_announce_file()),
            failure_marker: default_failure_marker(),
        }
    }
}

fn default_timeout_minutes() -> u64 {
    10
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_error_backoff_secs() -> u64 {
    5
}

fn default_marker_dir() -> PathBuf {
    PathBuf::from("/tmp/idlewake_last_access")
}

fn default_access_log() -> PathBuf {
    PathBuf::from("/var/log/nginx/access.log")
}

fn default_registry_file() -> PathBuf {
    PathBuf::from("/etc/idlewake/services.toml")
}

fn default_announce_file() -> PathBuf {
    PathBuf::from("/usr/share/nginx/html/current_domain.txt")
}

fn default_failure_marker() -> String {
    " 502 ".to_string()
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: fn() -> PathBuf) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}
