//! Configuration management for Conclave
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Environment variables (CONCLAVE_*)
//! 2. Config file (~/.config/conclave/config.toml)
//! 3. Default values

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wait::RetryPolicy;
use crate::{Error, Result};

/// Mention waiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WaitConfig {
    /// How long a single wait attempt blocks
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Empty attempts before a collaborator is treated as unresponsive
    pub max_attempts: u32,

    /// Delay between attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Multiplier applied to the delay after each attempt (1.0 = fixed)
    pub backoff_factor: f64,

    /// Upper bound for the backoff delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_attempts: 10,
            retry_delay: Duration::from_secs(2),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl WaitConfig {
    /// Retry policy between wait attempts
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_delay)
            .with_backoff(self.backoff_factor)
            .with_max_delay(self.max_delay)
    }
}

/// Broker transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Retries for a transient transport failure within one operation
    pub max_retries: u32,

    /// Initial delay between transport retries (doubles each retry)
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Times a responder agent reconnects after retries are exhausted
    pub reconnect_attempts: u32,

    /// Pause before each reconnect
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    /// Retry policy for transient transport errors
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_delay).with_backoff(2.0)
    }
}

/// Head summary memory configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Total byte budget of a memory snapshot
    pub budget_bytes: usize,

    /// Cap on a single verbatim entry
    pub max_entry_bytes: usize,

    /// Records between instruction refreshes
    pub reinforce_every: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 16 * 1024,
            max_entry_bytes: 4 * 1024,
            reinforce_every: 10,
        }
    }
}

/// Tool gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Number of tool calls kept in the audit log
    pub audit_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            audit_capacity: 256,
        }
    }
}

/// Workflow configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Maximum files a repository summary reads
    pub max_files: usize,

    /// Empty wait attempts before a collaborator counts as unresponsive
    pub reply_attempts: u32,

    /// Pause between idle loop iterations of a responder agent
    #[serde(with = "humantime_serde")]
    pub idle_delay: Duration,

    /// Captured test output kept in a test report, in bytes
    pub max_output_bytes: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_files: 40,
            reply_attempts: 10,
            idle_delay: Duration::from_secs(2),
            max_output_bytes: 4096,
        }
    }
}

/// Pull request checkout configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckoutConfig {
    /// Where clones live; defaults to `~/.cache/conclave/repos`
    pub cache_dir: Option<PathBuf>,

    /// Base that `owner/repo` is appended to for cloning
    pub remote_base: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            remote_base: "https://github.com".to_string(),
        }
    }
}

impl CheckoutConfig {
    /// Clone cache directory, resolving the default location
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        let cache = dirs::cache_dir()
            .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))?;
        Ok(cache.join("conclave").join("repos"))
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub wait: WaitConfig,
    pub transport: TransportConfig,
    pub memory: MemoryConfig,
    pub gateway: GatewayConfig,
    pub workflow: WorkflowConfig,
    pub checkout: CheckoutConfig,
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
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/conclave/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("conclave").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - CONCLAVE_WAIT_TIMEOUT_MS: Per-attempt wait timeout
    /// - CONCLAVE_WAIT_ATTEMPTS: Wait attempts of an idle agent
    /// - CONCLAVE_REPLY_ATTEMPTS: Wait attempts per collaborator reply
    /// - CONCLAVE_MEMORY_BUDGET: Memory budget in bytes
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(ms) = lookup("CONCLAVE_WAIT_TIMEOUT_MS") {
            self.wait.timeout = Duration::from_millis(parse_env("CONCLAVE_WAIT_TIMEOUT_MS", &ms)?);
        }

        if let Some(attempts) = lookup("CONCLAVE_WAIT_ATTEMPTS") {
            self.wait.max_attempts = parse_env("CONCLAVE_WAIT_ATTEMPTS", &attempts)?;
        }

        if let Some(attempts) = lookup("CONCLAVE_REPLY_ATTEMPTS") {
            self.workflow.reply_attempts = parse_env("CONCLAVE_REPLY_ATTEMPTS", &attempts)?;
        }

        if let Some(budget) = lookup("CONCLAVE_MEMORY_BUDGET") {
            self.memory.budget_bytes = parse_env("CONCLAVE_MEMORY_BUDGET", &budget)?;
        }

        Ok(self)
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: env > config file > defaults
    pub fn load_with_overrides() -> Result<Self> {
        Self::load()?.with_env_overrides()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {}", key, value)))
}
