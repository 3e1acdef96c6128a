//! Relay Configuration
//!
//! Loaded once at process start from a TOML file. Every section has defaults,
//! so an empty file (or no file at the default location) is a valid config.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default reCAPTCHA verification endpoint
pub const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP/WebSocket listener binds to
    pub bind: String,
    /// Root under which per-session scratch directories are created
    pub temp_root: PathBuf,
    /// Optional directory served as static files (the deploy form)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_root: Option<PathBuf>,
    pub resolver: ResolverConfig,
    pub transfer: TransferConfig,
    pub rate_limit: RateLimitConfig,
    pub queue: QueueConfig,
    pub captcha: CaptchaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            temp_root: PathBuf::from("./temp"),
            web_root: None,
            resolver: ResolverConfig::default(),
            transfer: TransferConfig::default(),
            rate_limit: RateLimitConfig::default(),
            queue: QueueConfig::default(),
            captcha: CaptchaConfig::default(),
        }
    }
}

/// Dependency resolution tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Executable to launch
    pub executable: String,
    /// Argument template. `{working_dir}` and `{memory_limit}` are substituted.
    pub args: Vec<String>,
    /// Memory ceiling handed to the tool
    pub memory_limit: String,
    /// File name the manifest is written to inside the scratch directory
    pub manifest_name: String,
    /// Kill the tool after this many seconds (0 = never)
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            executable: "php".to_string(),
            args: vec![
                "-d".to_string(),
                "memory_limit={memory_limit}".to_string(),
                "composer.phar".to_string(),
                "install".to_string(),
                "--no-interaction".to_string(),
                "--working-dir={working_dir}".to_string(),
            ],
            memory_limit: "64M".to_string(),
            manifest_name: "composer.json".to_string(),
            timeout_secs: 600,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Remote transfer endpoint defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Port used when the endpoint descriptor has none
    pub default_port: u16,
    pub connect_timeout_secs: u64,
    /// Ceiling on any single read, write or data connect after login starts
    pub io_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            default_port: 21,
            connect_timeout_secs: 15,
            io_timeout_secs: 60,
        }
    }
}

impl TransferConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// Per-address connection cooldown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 120,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Admission control
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Make sessions wait for a free slot instead of running unbounded
    pub queue_when_resources: bool,
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_when_resources: false,
            max_concurrent: 4,
        }
    }
}

/// CAPTCHA verification of job requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    pub enabled: bool,
    pub secret_key: String,
    pub verify_url: String,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret_key: String::new(),
            verify_url: RECAPTCHA_VERIFY_URL.to_string(),
        }
    }
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("deploy-relay").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is tried
    /// and built-in defaults are used when nothing is there.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => {
                    info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolver.executable.trim().is_empty() {
            return Err(ConfigError::Invalid("resolver.executable is empty".into()));
        }
        if self.queue.max_concurrent == 0 {
            return Err(ConfigError::Invalid("queue.max_concurrent must be at least 1".into()));
        }
        if self.transfer.io_timeout_secs == 0 {
            return Err(ConfigError::Invalid("transfer.io_timeout_secs must be at least 1".into()));
        }
        if self.rate_limit.enabled && self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid("rate_limit.window_secs must be at least 1".into()));
        }
        if self.captcha.enabled && self.captcha.secret_key.is_empty() {
            return Err(ConfigError::Invalid(
                "captcha.secret_key is required when captcha is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
