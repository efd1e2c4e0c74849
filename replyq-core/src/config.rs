use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// replyq configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub poller: PollerConfig,
    pub reply: ReplyConfig,
    pub sweeper: SweeperConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline applied by `send_request_default`.
    pub default_request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_request_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub const fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay between polls that returned no messages.
    pub poll_interval_ms: u64,
    /// Maximum messages per receive call.
    pub max_batch: usize,
    /// Transport-side long-poll wait per receive call.
    pub long_poll_wait_ms: u64,
    /// How long a received-but-unacknowledged message stays hidden
    /// before the transport redelivers it.
    pub visibility_timeout_s: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_batch: 10,
            long_poll_wait_ms: 20_000,
            visibility_timeout_s: 30,
        }
    }
}

impl PollerConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn long_poll_wait(&self) -> Duration {
        Duration::from_millis(self.long_poll_wait_ms)
    }

    #[must_use]
    pub const fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Name prefix for per-process reply destinations. The idle sweeper
    /// scans the same prefix.
    pub destination_prefix: String,
    /// Message retention requested when creating a reply destination.
    pub retention_s: u64,
    /// How long a destination lingers after its last release before it is
    /// torn down. Long enough to ride out acquire/release churn between
    /// back-to-back requests.
    pub teardown_grace_ms: u64,
    /// Interval between heartbeat tags on a live destination.
    pub heartbeat_interval_s: u64,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            destination_prefix: "replyq-reply-".to_string(),
            retention_s: 60,
            teardown_grace_ms: 5_000,
            heartbeat_interval_s: 300,
        }
    }
}

impl ReplyConfig {
    #[must_use]
    pub const fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_s)
    }

    #[must_use]
    pub const fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Whether the idle destination sweeper runs at all. Only one process
    /// per deployment needs it.
    pub enabled: bool,
    /// Interval between sweeps.
    pub interval_s: u64,
    /// Destinations whose heartbeat is older than this are deleted.
    pub idle_retention_s: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_s: 600,
            idle_retention_s: 1_200,
        }
    }
}

impl SweeperConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_s)
    }

    #[must_use]
    pub const fn idle_retention(&self) -> Duration {
        Duration::from_secs(self.idle_retention_s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (REPLYQ_POLLER_MAX_BATCH, etc.)
        builder = builder.add_source(
            Environment::with_prefix("REPLYQ")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}
