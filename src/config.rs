// Configuration File Support
//
// TOML configuration for the stt-gate binary with environment variable overrides.
// Configuration files are loaded from the XDG config directory: ~/.config/stt-gate/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::rate_limit::RateLimitConfig;

/// Default transcription endpoint (OpenAI-compatible)
pub const DEFAULT_API_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
/// Media larger than this is rejected before download
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 500 * 1024 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Admission quota configuration
    pub rate_limit: RateLimitConfig,

    /// Quota store configuration
    pub store: StoreConfig,

    /// HTTP API configuration
    pub server: ServerConfig,

    /// Transcription pipeline configuration
    pub pipeline: PipelineConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Log file path (if log_to_file is true). Defaults to a dated file under `logs/`.
    pub log_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
            log_to_file: false,
            log_file: None,
        }
    }
}

impl LoggingConfig {
    /// File that log output goes to when `log_to_file` is set
    pub fn log_file_path(&self) -> PathBuf {
        match &self.log_file {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("logs").join(format!(
                "stt-gate_{}.log",
                chrono::Local::now().format("%Y%m%d")
            )),
        }
    }
}

/// Quota store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "rate_limit.db".to_string(),
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port for the admission API and metrics endpoint
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Transcription pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory for downloaded media
    pub cache_dir: String,

    /// Media larger than this is rejected before download
    pub max_file_size_bytes: u64,

    /// Transcription endpoint
    pub api_url: String,

    /// Bearer token for the transcription endpoint
    pub api_key: Option<String>,

    /// Model name sent with each request
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: "cache".to_string(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model: "whisper-large-v3".to_string(),
            timeout_secs: 300,
        }
    }
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, an
    /// environment override cannot be parsed, or validation fails.
    /// If the config file does not exist, defaults are used.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, an
    /// environment override cannot be parsed, or validation fails.
    /// If the config file does not exist, defaults are used.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/stt-gate/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "stt-gate", "stt-gate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("stt-gate")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or boolean override cannot be parsed.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up through `lookup`
    ///
    /// Variables take precedence over config file values:
    /// - STT_GATE_RATE_LIMITS (on/off)
    /// - STT_GATE_MAX_QUOTA
    /// - STT_GATE_RECOVERY_INTERVAL_SECS
    /// - STT_GATE_DB_PATH
    /// - STT_GATE_API_URL, STT_GATE_API_KEY
    /// - STT_GATE_LOG_LEVEL, STT_GATE_LOG_FORMAT
    /// - STT_GATE_PORT
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or boolean override cannot be parsed.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Rate limit overrides
        if let Some(flag) = lookup("STT_GATE_RATE_LIMITS") {
            self.rate_limit.enabled = parse_switch(&flag)
                .with_context(|| format!("Invalid STT_GATE_RATE_LIMITS: {:?}", flag))?;
        }
        if let Some(max) = lookup("STT_GATE_MAX_QUOTA") {
            self.rate_limit.max_quota = max
                .trim()
                .parse()
                .with_context(|| format!("Invalid STT_GATE_MAX_QUOTA: {:?}", max))?;
        }
        if let Some(secs) = lookup("STT_GATE_RECOVERY_INTERVAL_SECS") {
            self.rate_limit.recovery_interval_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("Invalid STT_GATE_RECOVERY_INTERVAL_SECS: {:?}", secs))?;
        }

        // Store overrides
        if let Some(path) = lookup("STT_GATE_DB_PATH") {
            self.store.path = path;
        }

        // Pipeline overrides
        if let Some(url) = lookup("STT_GATE_API_URL") {
            self.pipeline.api_url = url;
        }
        if let Some(key) = lookup("STT_GATE_API_KEY") {
            self.pipeline.api_key = Some(key);
        }

        // Logging overrides
        if let Some(level) = lookup("STT_GATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("STT_GATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Server overrides
        if let Some(port) = lookup("STT_GATE_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid STT_GATE_PORT: {:?}", port))?;
        }

        Ok(self)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        // Validate logging format
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        // Validate quota
        self.rate_limit.validate()?;

        // Validate store
        if self.store.path.trim().is_empty() {
            anyhow::bail!("Store path must not be empty");
        }

        // Validate server
        if self.server.port == 0 {
            anyhow::bail!("Server port must be > 0");
        }

        // Validate pipeline
        if self.pipeline.max_file_size_bytes == 0 {
            anyhow::bail!("Pipeline max_file_size_bytes must be > 0");
        }
        if !(self.pipeline.api_url.starts_with("http://")
            || self.pipeline.api_url.starts_with("https://"))
        {
            anyhow::bail!(
                "Pipeline api_url must be an http(s) URL: {}",
                self.pipeline.api_url
            );
        }
        if self.pipeline.timeout_secs == 0 {
            anyhow::bail!("Pipeline timeout_secs must be > 0");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

fn parse_switch(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Ok(true),
        "off" | "false" | "0" | "no" => Ok(false),
        other => anyhow::bail!("expected on/off, got {:?}", other),
    }
}
