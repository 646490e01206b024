//! Configuration management for Foreman
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (FOREMAN_*)
//! 3. Config file (~/.config/foreman/config.toml)
//! 4. Default values

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default Jules API endpoint
pub const DEFAULT_BASE_URL: &str = "https://jules.googleapis.com";

/// Default Jules API version path segment
pub const DEFAULT_API_VERSION: &str = "v1alpha";

/// Remote API connection settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the remote service
    pub base_url: String,

    /// API version appended to the base URL
    pub api_version: String,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// User-Agent header value
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("foreman/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiConfig {
    /// Full endpoint root, e.g. `https://jules.googleapis.com/v1alpha/`
    pub fn endpoint(&self) -> Result<url::Url> {
        let root = format!(
            "{}/{}/",
            self.base_url.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        );
        url::Url::parse(&root)
            .map_err(|e| Error::Config(format!("Invalid base URL {}: {}", self.base_url, e)))
    }
}

/// Retry/backoff settings for transport calls
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Background polling settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Time between poll cycles for one session
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Maximum total time a session is polled before giving up
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,

    /// Silence after which a session is flagged as blocked
    #[serde(with = "humantime_serde")]
    pub stuck_timeout: Duration,

    /// Approve generated plans without waiting for an operator
    pub auto_approve: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_duration: Duration::from_secs(3600),
            stuck_timeout: Duration::from_secs(300),
            auto_approve: false,
        }
    }
}

/// Sliding-window rate limit settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Length of the trailing window
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Calls admitted per resource within one window
    pub max_calls: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_calls: 60,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Remote API settings
    pub api: ApiConfig,

    /// Retry settings
    pub retry: RetryConfig,

    /// Polling settings
    pub polling: PollingConfig,

    /// Rate limiting settings
    pub rate_limit: RateLimitConfig,
}

/// Overrides supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub base_url: Option<String>,
    pub poll_interval: Option<Duration>,
    pub auto_approve: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();

        if let Some(path) = config_path {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/foreman/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("foreman").join("config.toml"))
    }

    /// Reject settings that would make the manager misbehave
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.polling.interval.is_zero() {
            return Err(Error::Config("polling.interval must be non-zero".into()));
        }
        if self.rate_limit.max_calls == 0 {
            return Err(Error::Config("rate_limit.max_calls must be at least 1".into()));
        }
        self.api.endpoint()?;
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - FOREMAN_BASE_URL: API base URL
    /// - FOREMAN_TIMEOUT: request timeout (e.g. "30s")
    /// - FOREMAN_RETRY_ATTEMPTS: total attempts per call
    /// - FOREMAN_POLL_INTERVAL: polling interval (e.g. "5s")
    /// - FOREMAN_MAX_POLL_DURATION: polling budget per session (e.g. "1h")
    /// - FOREMAN_AUTO_APPROVE: "true"/"1" to approve plans automatically
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(base_url) = lookup("FOREMAN_BASE_URL") {
            self.api.base_url = base_url;
        }

        if let Some(timeout) = lookup("FOREMAN_TIMEOUT").and_then(|v| parse_duration(&v)) {
            self.api.timeout = timeout;
        }

        if let Some(attempts) = lookup("FOREMAN_RETRY_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.retry.max_attempts = attempts;
        }

        if let Some(interval) = lookup("FOREMAN_POLL_INTERVAL").and_then(|v| parse_duration(&v)) {
            self.polling.interval = interval;
        }

        if let Some(max) = lookup("FOREMAN_MAX_POLL_DURATION").and_then(|v| parse_duration(&v)) {
            self.polling.max_duration = max;
        }

        if let Some(flag) = lookup("FOREMAN_AUTO_APPROVE") {
            self.polling.auto_approve = matches!(flag.trim(), "1" | "true" | "yes");
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, overrides: CliOverrides) -> Self {
        if let Some(base_url) = overrides.base_url {
            self.api.base_url = base_url;
        }

        if let Some(interval) = overrides.poll_interval {
            self.polling.interval = interval;
        }

        if let Some(auto_approve) = overrides.auto_approve {
            self.polling.auto_approve = auto_approve;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(overrides: CliOverrides) -> Result<Self> {
        let config = Self::load()?
            .with_env_overrides()
            .with_cli_overrides(overrides);
        config.validate()?;
        Ok(config)
    }
}

/// Parse a human-readable duration such as `5s` or `1h 30m`
pub fn parse_duration(value: &str) -> Option<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim()).ok()
}
