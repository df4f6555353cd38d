//! Layered configuration loader.
//!
//! Precedence, later layers winning:
//! 1. Built-in defaults
//! 2. `config.toml` in the beacon home (`$BEACON_HOME`, else `~/.beacon`)
//! 3. `BEACON_*` environment overrides
//!
//! ## Example
//!
//! ```no_run
//! use beacon_core::config_loader::ConfigLoader;
//! use std::path::PathBuf;
//!
//! let config = ConfigLoader::new()
//!     .with_beacon_home(PathBuf::from("/etc/beacon"))
//!     .load()
//!     .expect("Failed to load config");
//! ```

use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use beacon_backend_client::ClientConfig;
use beacon_push_client::PushConfig;
use serde::Deserialize;
use serde_with::DurationMilliSeconds;
use serde_with::DurationSeconds;
use serde_with::serde_as;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },

    #[error("config validation error: {0}")]
    Validation(String),

    #[error("cannot determine home directory")]
    NoHomeDir,
}

/// Session-level knobs that are neither REST nor push settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub health_check_interval: Duration,
    pub page_size: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            page_size: 20,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct BeaconConfig {
    pub api: ClientConfig,
    pub push: PushConfig,
    pub session: SessionSettings,
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiSection,
    push: PushSection,
    session: SessionSection,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiSection {
    base_url: Option<String>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    request_timeout_secs: Option<Duration>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PushSection {
    address: Option<String>,
    virtual_host: Option<String>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    reconnect_delay_ms: Option<Duration>,
    max_reconnect_attempts: Option<usize>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    connect_timeout_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    heartbeat_send_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    heartbeat_receive_ms: Option<Duration>,
    notifications_topic: Option<String>,
    unread_count_topic: Option<String>,
    broadcast_topic: Option<String>,
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionSection {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    health_check_interval_secs: Option<Duration>,
    page_size: Option<u32>,
}

/// Builder for layered configuration loading.
pub struct ConfigLoader {
    beacon_home: Option<PathBuf>,
    env_prefix: String,
    skip_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    /// Home auto-detected, prefix `BEACON`, all layers enabled.
    pub fn new() -> Self {
        Self {
            beacon_home: None,
            env_prefix: "BEACON".to_string(),
            skip_file: false,
            skip_env: false,
        }
    }

    pub fn with_beacon_home(mut self, path: PathBuf) -> Self {
        self.beacon_home = Some(path);
        self
    }

    /// Default is `BEACON`, i.e. `BEACON_API_URL`, `BEACON_PAGE_SIZE`, ...
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn load(self) -> Result<BeaconConfig, ConfigError> {
        let mut config = BeaconConfig::default();

        if !self.skip_file {
            let home = self.resolve_beacon_home()?;
            Self::merge_file(&mut config, Self::load_from_file(&home)?);
        }

        if !self.skip_env {
            Self::apply_env_overrides(&mut config, &self.env_prefix)?;
        }

        Self::validate(&config)?;
        Ok(config)
    }

    /// Explicit home, then `${prefix}_HOME`, then `~/.beacon`.
    fn resolve_beacon_home(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.beacon_home {
            return Ok(path.clone());
        }
        if let Ok(path) = env::var(format!("{}_HOME", self.env_prefix))
            && !path.trim().is_empty()
        {
            return Ok(PathBuf::from(path));
        }
        dirs::home_dir()
            .map(|home| home.join(".beacon"))
            .ok_or(ConfigError::NoHomeDir)
    }

    /// A missing file is not an error.
    fn load_from_file(home: &Path) -> Result<ConfigFile, ConfigError> {
        let path = home.join(CONFIG_FILE_NAME);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("{} not found, using defaults", path.display());
                return Ok(ConfigFile::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Toml { path, source })
    }

    fn merge_file(config: &mut BeaconConfig, file: ConfigFile) {
        let ConfigFile { api, push, session } = file;

        if let Some(base_url) = api.base_url {
            config.api.base_url = base_url;
        }
        if let Some(timeout) = api.request_timeout_secs {
            config.api.timeout = timeout;
        }

        let target = &mut config.push;
        if let Some(address) = push.address {
            target.address = address;
        }
        if push.virtual_host.is_some() {
            target.virtual_host = push.virtual_host;
        }
        if let Some(delay) = push.reconnect_delay_ms {
            target.reconnect_delay = delay;
        }
        if let Some(attempts) = push.max_reconnect_attempts {
            target.max_reconnect_attempts = attempts;
        }
        if let Some(timeout) = push.connect_timeout_secs {
            target.connect_timeout = timeout;
        }
        if let Some(send) = push.heartbeat_send_ms {
            target.heartbeat_send = send;
        }
        if let Some(receive) = push.heartbeat_receive_ms {
            target.heartbeat_receive = receive;
        }
        if let Some(topic) = push.notifications_topic {
            target.notifications_topic = topic;
        }
        if let Some(topic) = push.unread_count_topic {
            target.unread_count_topic = topic;
        }
        if let Some(topic) = push.broadcast_topic {
            target.broadcast_topic = topic;
        }

        if let Some(interval) = session.health_check_interval_secs {
            config.session.health_check_interval = interval;
        }
        if let Some(size) = session.page_size {
            config.session.page_size = size;
        }
    }

    /// Supported variables, for prefix `P`: `P_API_URL`, `P_PUSH_ADDR`,
    /// `P_MAX_RECONNECT_ATTEMPTS`, `P_PAGE_SIZE`. Blank values are ignored.
    fn apply_env_overrides(config: &mut BeaconConfig, prefix: &str) -> Result<(), ConfigError> {
        if let Some(url) = env_value(&format!("{prefix}_API_URL")) {
            tracing::debug!("Applying env override: {prefix}_API_URL={url}");
            config.api.base_url = url;
        }
        if let Some(address) = env_value(&format!("{prefix}_PUSH_ADDR")) {
            tracing::debug!("Applying env override: {prefix}_PUSH_ADDR={address}");
            config.push.address = address;
        }
        if let Some(attempts) =
            parse_env::<usize>(&format!("{prefix}_MAX_RECONNECT_ATTEMPTS"), "a whole number")?
        {
            config.push.max_reconnect_attempts = attempts;
        }
        if let Some(size) = parse_env::<u32>(&format!("{prefix}_PAGE_SIZE"), "a positive integer")? {
            config.session.page_size = size;
        }
        Ok(())
    }

    fn validate(config: &BeaconConfig) -> Result<(), ConfigError> {
        if config.api.base_url.trim().is_empty() {
            return Err(ConfigError::Validation("api.base_url is empty".to_string()));
        }
        if config.push.address.trim().is_empty() {
            return Err(ConfigError::Validation("push.address is empty".to_string()));
        }
        if config.session.page_size == 0 {
            return Err(ConfigError::Validation(
                "session.page_size must be at least 1".to_string(),
            ));
        }
        if config.session.health_check_interval.is_zero() {
            return Err(ConfigError::Validation(
                "session.health_check_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn env_value(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: FromStr>(var: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    let Some(value) = env_value(var) else {
        return Ok(None);
    };
    match value.parse() {
        Ok(parsed) => {
            tracing::debug!("Applying env override: {var}={value}");
            Ok(Some(parsed))
        }
        Err(_) => Err(ConfigError::InvalidEnvValue {
            var: var.to_string(),
            value,
            expected: expected.to_string(),
        }),
    }
}
