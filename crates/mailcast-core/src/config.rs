//! Mailcast configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MailcastError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailcastConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub alert: AlertConfig,
}

impl MailcastConfig {
    /// Load config from the default path (~/.mailcast/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MailcastError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MailcastError::Config(format!("Failed to parse config: {e}")))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| MailcastError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.smtp.from_address.trim().is_empty() {
            return Err(MailcastError::Config("smtp.from_address is empty".into()));
        }
        if self.dispatch.max_concurrent_sends == 0 {
            return Err(MailcastError::Config(
                "dispatch.max_concurrent_sends must be at least 1".into(),
            ));
        }
        if self.dispatch.send_timeout_secs == 0 {
            return Err(MailcastError::Config(
                "dispatch.send_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the mailcast home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mailcast")
    }
}

fn bool_true() -> bool { true }

/// Where campaigns and the attempt log live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.mailcast/mailcast.db".into() }

impl DatabaseConfig {
    /// The configured path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Outgoing relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default = "bool_true")]
    pub starttls: bool,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_host() -> String { "localhost".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_from_address() -> String { "mailcast@localhost".into() }
fn default_smtp_timeout() -> u64 { 30 }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: default_from_address(),
            starttls: true,
            timeout_secs: default_smtp_timeout(),
        }
    }
}

/// Dispatch cycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on sends in flight during one cycle.
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    /// Per-send deadline; a send that exceeds it is recorded as an error.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Period of the built-in `watch` loop.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_max_concurrent_sends() -> usize { 8 }
fn default_send_timeout() -> u64 { 30 }
fn default_interval() -> u64 { 300 }

impl DispatchConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sends: default_max_concurrent_sends(),
            send_timeout_secs: default_send_timeout(),
            interval_secs: default_interval(),
        }
    }
}

/// Statistics cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

fn default_cache_ttl() -> u64 { 300 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// Operator alerts raised on transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub admin_emails: Vec<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// Only log alerts, never send them anywhere.
    #[serde(default)]
    pub log_only: bool,
}

fn default_subject_prefix() -> String { "[mailcast] ".into() }

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            admin_emails: Vec::new(),
            webhook_url: None,
            subject_prefix: default_subject_prefix(),
            log_only: false,
        }
    }
}
