//! Configuration loading and management for linkdigest.
//!
//! Loads settings from `linkdigest.toml` with environment variable overrides for sensitive data.
//! Every section has defaults, so the service also runs without a config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE: &str = "linkdigest.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("missing required API key for provider: {0}")]
    MissingApiKey(String),
    #[error("missing SMTP credentials: {0}")]
    MissingCredentials(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub addr: String,
}

/// Summarization model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model identifier (e.g., "gpt-4.1")
    pub model: String,
    /// Instruction placed in front of the article URL
    pub prompt: String,
}

/// API endpoint and keys (keys loaded from environment)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    pub openai_key: Option<String>,
}

/// Outbound mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// SMTP user, also used as the sender address
    pub username: Option<String>,
    pub password: Option<String>,
    /// Subject line of every digest
    pub subject: String,
}

/// Which link store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per email address
    #[default]
    File,
    /// A sled tree keyed by email address
    Sled,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base path for data storage
    pub path: PathBuf,
    pub backend: StorageBackend,
}

/// Batching and worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of pending links that triggers a digest
    pub threshold: usize,
    /// Pause between consecutive summarization calls
    pub delay_secs: u64,
    /// Number of concurrent digest workers
    pub workers: usize,
    /// Jobs that may wait for a free worker before submissions are refused
    pub queue_capacity: usize,
    /// Upper bound on the time one digest job may take
    pub deadline_secs: u64,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl Config {
    /// Load configuration from the default location (linkdigest.toml in cwd or home),
    /// falling back to built-in defaults when no file exists
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::parse_file(&path)?,
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::parse_file(path)?;
        config.apply_env();
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override secrets from environment variables
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.api.openai_key = Some(key);
        }
        if let Ok(user) = std::env::var("SMTP_USER") {
            self.mail.username = Some(user);
        }
        if let Ok(pass) = std::env::var("SMTP_PASS") {
            self.mail.password = Some(pass);
        }
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // Check current directory first
        let local_config = PathBuf::from(CONFIG_FILE);
        if local_config.exists() {
            return Some(local_config);
        }

        // Check home directory
        let home_config = dirs::home_dir()?
            .join(".config")
            .join("linkdigest")
            .join(CONFIG_FILE);
        home_config.exists().then_some(home_config)
    }

    /// Get the summarization API key
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api
            .openai_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey("openai".to_string()))
    }

    /// Reject settings the service cannot run with
    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.threshold == 0 {
            return Err(ConfigError::Invalid("batch.threshold must be at least 1"));
        }
        Ok(())
    }
}

impl MailConfig {
    /// Get the SMTP username and password
    pub fn credentials(&self) -> Result<(&str, &str), ConfigError> {
        let user = self
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingCredentials("SMTP_USER"))?;
        let pass = self
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::MissingCredentials("SMTP_PASS"))?;
        Ok((user, pass))
    }
}

impl BatchConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl StorageConfig {
    /// Location of the per-email link records
    pub fn links_path(&self) -> PathBuf {
        match self.backend {
            StorageBackend::File => self.path.join("userlinks"),
            StorageBackend::Sled => self.path.join("userlinks.sled"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1".to_string(),
            prompt: "Please summarize this article in 2-3 sentences:".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            openai_key: None,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            username: None,
            password: None,
            subject: "Your Article Summaries".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./storage"),
            backend: StorageBackend::File,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            delay_secs: 2,
            workers: 2,
            queue_capacity: 32,
            deadline_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_service_constants() {
        let config = Config::default();
        assert_eq!(config.batch.threshold, 5);
        assert_eq!(config.batch.delay(), Duration::from_secs(2));
        assert_eq!(config.mail.subject, "Your Article Summaries");
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.links_path(), PathBuf::from("./storage/userlinks"));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[batch]\nthreshold = 3\n\n[storage]\npath = \"/tmp/ld\"\nbackend = \"sled\""
        )
        .unwrap();

        let config = Config::parse_file(file.path()).unwrap();
        assert_eq!(config.batch.threshold, 3);
        assert_eq!(config.batch.workers, 2);
        assert_eq!(config.server.addr, "0.0.0.0:8080");
        assert_eq!(
            config.storage.links_path(),
            PathBuf::from("/tmp/ld/userlinks.sled")
        );
    }

    #[test]
    fn test_missing_secrets_are_reported() {
        let config = Config::default();
        assert!(matches!(
            config.api_key(),
            Err(ConfigError::MissingApiKey(_))
        ));
        assert!(matches!(
            config.mail.credentials(),
            Err(ConfigError::MissingCredentials("SMTP_USER"))
        ));
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[batch]\nthreshold = 0").unwrap();

        assert!(matches!(
            Config::load_from(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
