//! Configuration system for the `RelayChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/relaychat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::delivery::RetryPolicy;
use crate::session::SessionConfig;

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:9000/ws";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The relay URL is not a usable WebSocket URL.
    #[error("invalid relay url {url}: {reason}")]
    InvalidRelayUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    delivery: DeliveryFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    relay_url: Option<String>,
    connect_timeout_ms: Option<u64>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    event_buffer: Option<usize>,
}

/// `[delivery]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DeliveryFileConfig {
    max_retries: Option<u32>,
    retry_timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Reconnection backoff for the WebSocket transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Give up after this many consecutive failed attempts; `None` retries
    /// forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnection attempt `attempt` (1-based): the initial
    /// delay doubled per attempt, capped at the maximum.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// Relay server WebSocket URL.
    pub relay_url: String,
    /// Fixed participant id; a random one is generated when unset.
    pub participant_id: Option<String>,
    /// Timeout for each connection attempt.
    pub connect_timeout: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
    /// Capacity of the transport event channel.
    pub event_buffer: usize,

    // -- Delivery --
    /// Retry bound and acknowledgment timeout.
    pub delivery: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            participant_id: None,
            connect_timeout: Duration::from_secs(20),
            reconnect: ReconnectConfig::default(),
            event_buffer: 256,
            delivery: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/relaychat/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// any config file cannot be parsed, or the resolved relay URL is not a
    /// `ws://` or `wss://` URL.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        validate_relay_url(&config.relay_url)?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let net = &file.network;

        Self {
            relay_url: cli
                .relay_url
                .clone()
                .or_else(|| net.relay_url.clone())
                .unwrap_or(defaults.relay_url),
            participant_id: cli.participant_id.clone(),
            connect_timeout: net
                .connect_timeout_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
            reconnect: ReconnectConfig {
                initial_delay: net
                    .reconnect_initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: net
                    .reconnect_max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                max_attempts: net
                    .reconnect_max_attempts
                    .or(defaults.reconnect.max_attempts),
            },
            event_buffer: net.event_buffer.unwrap_or(defaults.event_buffer),
            delivery: RetryPolicy {
                max_retries: cli
                    .max_retries
                    .or(file.delivery.max_retries)
                    .unwrap_or(defaults.delivery.max_retries),
                retry_timeout: cli
                    .retry_timeout_ms
                    .or(file.delivery.retry_timeout_ms)
                    .map_or(defaults.delivery.retry_timeout, Duration::from_millis),
            },
        }
    }

    /// Session tunables derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retry: self.delivery,
            ..SessionConfig::default()
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Reliable broadcast chat client")]
pub struct CliArgs {
    /// WebSocket URL of the relay server.
    #[arg(long, env = "RELAYCHAT_RELAY_URL")]
    pub relay_url: Option<String>,

    /// Participant id to send as (default: random per session).
    #[arg(long, env = "RELAYCHAT_PARTICIPANT")]
    pub participant_id: Option<String>,

    /// Path to config file (default: `~/.config/relaychat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Retransmissions allowed after the original send.
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Milliseconds to wait for an acknowledgment before retrying.
    #[arg(long)]
    pub retry_timeout_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RELAYCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/relaychat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("relaychat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

/// Accept only absolute `ws://` or `wss://` URLs with a host.
fn validate_relay_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRelayUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(invalid(format!(
            "scheme must be ws or wss, got {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}
