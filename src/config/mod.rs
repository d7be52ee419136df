//! Configuration management.
//!
//! Configuration is read from an optional TOML file and then overridden by
//! environment variables:
//!
//! ```toml
//! database_url = "/var/lib/hookcord/hookcord.db"
//! bind_addr = "0.0.0.0:3000"
//! public_url = "https://relay.example.com"
//!
//! [discord]
//! api_base = "https://discord.com/api/v10"
//!
//! [timeouts]
//! connect_secs = 15
//! send_secs = 10
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! The encryption key is normally supplied through `HOOKCORD_ENCRYPTION_KEY`
//! rather than the file.

use crate::observability::LogFormat;
use crate::security::{EncryptionKey, Encryptor};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name inside the platform config directory.
const CONFIG_FILE_NAME: &str = "hookcord.toml";

/// Default Discord REST API base.
pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Main configuration for hookcord.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Field encryption key (64 hex characters).
    pub encryption_key: Option<SecretString>,
    /// `SQLite` database path, or `:memory:`.
    pub database_url: String,
    /// HTTP listen address.
    pub bind_addr: String,
    /// Base URL used when building webhook URLs for callers.
    pub public_url: Option<String>,
    /// Discord settings.
    pub discord: DiscordConfig,
    /// Timeouts for connection construction and sends.
    pub timeouts: TimeoutConfig,
    /// Connect every active tenant at startup.
    pub preload: bool,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,
}

/// Discord settings.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// REST API base URL.
    pub api_base: String,
    /// OAuth application id used by reconnect flows.
    pub oauth_client_id: Option<String>,
    /// OAuth application secret used by reconnect flows.
    pub oauth_client_secret: Option<SecretString>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_DISCORD_API_BASE.to_string(),
            oauth_client_id: None,
            oauth_client_secret: None,
        }
    }
}

/// Timeouts for outbound chat operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Bound on connection construction.
    pub connect: Duration,
    /// Bound on a single send.
    pub send: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            send: Duration::from_secs(10),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Whether to start the exporter.
    pub enabled: bool,
    /// Exporter listen port.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Encryption key.
    pub encryption_key: Option<String>,
    /// Database path.
    pub database_url: Option<String>,
    /// Listen address.
    pub bind_addr: Option<String>,
    /// Public base URL.
    pub public_url: Option<String>,
    /// Startup preload.
    pub preload: Option<bool>,
    /// Discord section.
    pub discord: Option<ConfigFileDiscord>,
    /// Timeouts section.
    pub timeouts: Option<ConfigFileTimeouts>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
    /// Metrics section.
    pub metrics: Option<ConfigFileMetrics>,
}

/// Discord section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileDiscord {
    /// REST API base URL.
    pub api_base: Option<String>,
    /// OAuth client id.
    pub oauth_client_id: Option<String>,
    /// OAuth client secret.
    pub oauth_client_secret: Option<String>,
}

/// Timeouts section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileTimeouts {
    /// Connection construction timeout in seconds.
    pub connect_secs: Option<u64>,
    /// Send timeout in seconds.
    pub send_secs: Option<u64>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// Filter directive.
    pub level: Option<String>,
    /// `pretty` or `json`.
    pub format: Option<String>,
}

/// Metrics section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMetrics {
    /// Enable the exporter.
    pub enabled: Option<bool>,
    /// Exporter port.
    pub port: Option<u16>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            database_url: "hookcord.db".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            public_url: None,
            discord: DiscordConfig::default(),
            timeouts: TimeoutConfig::default(),
            preload: true,
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn parse_env_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{key}: expected a boolean, got {other:?}"))),
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: expected a number, got {value:?}")))
}

impl RelayConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from `path` (or the default location) and applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an explicit file cannot be read or parsed,
    /// or if an environment override is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;

        let file: ConfigFile = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;

        Ok(Self::from_config_file(file))
    }

    /// Returns the default config file path, if a home directory is known.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("hookcord").join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from the default location.
    ///
    /// Returns default configuration if no readable config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                Self::default()
            },
        }
    }

    /// Converts a `ConfigFile` to `RelayConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        config.encryption_key = file.encryption_key.map(SecretString::from);
        if let Some(database_url) = file.database_url {
            config.database_url = database_url;
        }
        if let Some(bind_addr) = file.bind_addr {
            config.bind_addr = bind_addr;
        }
        config.public_url = file.public_url;
        if let Some(preload) = file.preload {
            config.preload = preload;
        }
        if let Some(discord) = file.discord {
            if let Some(api_base) = discord.api_base {
                config.discord.api_base = api_base;
            }
            config.discord.oauth_client_id = discord.oauth_client_id;
            config.discord.oauth_client_secret = discord.oauth_client_secret.map(SecretString::from);
        }
        if let Some(timeouts) = file.timeouts {
            if let Some(secs) = timeouts.connect_secs {
                config.timeouts.connect = Duration::from_secs(secs);
            }
            if let Some(secs) = timeouts.send_secs {
                config.timeouts.send = Duration::from_secs(secs);
            }
        }
        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                config.logging.level = level;
            }
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
        }
        if let Some(metrics) = file.metrics {
            if let Some(enabled) = metrics.enabled {
                config.metrics.enabled = enabled;
            }
            if let Some(port) = metrics.port {
                config.metrics.port = port;
            }
        }

        config
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a numeric or boolean override is malformed.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(key));

        if let Some(key) = first(&["HOOKCORD_ENCRYPTION_KEY", "ENCRYPTION_KEY"]) {
            self.encryption_key = Some(SecretString::from(key));
        }
        if let Some(url) = first(&["HOOKCORD_DATABASE_URL", "DATABASE_URL"]) {
            self.database_url = url;
        }
        if let Some(addr) = lookup("HOOKCORD_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(url) = lookup("HOOKCORD_PUBLIC_URL") {
            self.public_url = Some(url);
        }
        if let Some(base) = lookup("HOOKCORD_DISCORD_API_BASE") {
            self.discord.api_base = base;
        }
        if let Some(id) = lookup("DISCORD_OAUTH_CLIENT_ID") {
            self.discord.oauth_client_id = Some(id);
        }
        if let Some(secret) = lookup("DISCORD_OAUTH_CLIENT_SECRET") {
            self.discord.oauth_client_secret = Some(SecretString::from(secret));
        }
        if let Some(value) = lookup("HOOKCORD_CONNECT_TIMEOUT_SECS") {
            let secs = parse_env_number("HOOKCORD_CONNECT_TIMEOUT_SECS", &value)?;
            self.timeouts.connect = Duration::from_secs(secs);
        }
        if let Some(value) = lookup("HOOKCORD_SEND_TIMEOUT_SECS") {
            let secs = parse_env_number("HOOKCORD_SEND_TIMEOUT_SECS", &value)?;
            self.timeouts.send = Duration::from_secs(secs);
        }
        if let Some(value) = lookup("HOOKCORD_PRELOAD") {
            self.preload = parse_env_bool("HOOKCORD_PRELOAD", &value)?;
        }
        if let Some(level) = lookup("HOOKCORD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("HOOKCORD_LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&format);
        }
        if let Some(value) = lookup("HOOKCORD_METRICS_ENABLED") {
            self.metrics.enabled = parse_env_bool("HOOKCORD_METRICS_ENABLED", &value)?;
        }
        if let Some(value) = lookup("HOOKCORD_METRICS_PORT") {
            self.metrics.port = parse_env_number("HOOKCORD_METRICS_PORT", &value)?;
        }

        Ok(self)
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Sets the encryption key.
    #[must_use]
    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(SecretString::from(key.into()));
        self
    }

    /// Parses the configured encryption key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key is missing or malformed. There is
    /// no generated fallback.
    pub fn encryption_key(&self) -> Result<EncryptionKey> {
        let key = self.encryption_key.as_ref().ok_or_else(|| {
            Error::Config(
                "HOOKCORD_ENCRYPTION_KEY is not set; generate one with `hookcord generate-key`"
                    .to_string(),
            )
        })?;
        EncryptionKey::from_hex(key.expose_secret())
    }

    /// Builds the field encryptor from the configured key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key is missing or malformed.
    pub fn encryptor(&self) -> Result<Encryptor> {
        Encryptor::new(&self.encryption_key()?)
    }

    /// Builds the webhook URL for a delivery token.
    ///
    /// Uses `public_url` when configured, otherwise `fallback_base`.
    #[must_use]
    pub fn webhook_url(&self, fallback_base: &str, token: &str) -> String {
        let base = self.public_url.as_deref().unwrap_or(fallback_base);
        format!("{}/webhook/{token}", base.trim_end_matches('/'))
    }
}
