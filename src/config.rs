// src/config.rs
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat};
use serde::Deserialize;

use crate::connection::{ReconnectPolicy, DEFAULT_RECONNECT_DELAY};

/// Single-underscore variable names older `.env` files use. They only fill
/// in values that neither the settings file nor `MISSKEY__*` provide.
const LEGACY_ENV: [(&str, &str); 2] = [
    ("MISSKEY_INSTANCE_URL", "misskey.instance_url"),
    ("MISSKEY_API_TOKEN", "misskey.api_token"),
];

#[derive(Debug, Deserialize)]
pub struct MisskeySettings {
    pub instance_url: String,
    pub api_token: String,
}

#[derive(Debug, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,
    #[serde(default)]
    pub max_reconnect_delay_ms: Option<u64>,
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

fn default_reconnect_multiplier() -> f64 {
    1.0
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_multiplier: default_reconnect_multiplier(),
            max_reconnect_delay_ms: None,
        }
    }
}

impl StreamSettings {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let delay = Duration::from_millis(self.reconnect_delay_ms);
        ReconnectPolicy {
            delay,
            multiplier: self.reconnect_multiplier,
            max_delay: self
                .max_reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(delay),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub misskey: MisskeySettings,
    #[serde(default)]
    pub stream: StreamSettings,
}

impl Settings {
    /// Load `Settings.toml` (optional) plus environment overrides such as
    /// `MISSKEY__INSTANCE_URL`.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Settings")
    }

    pub fn from_file(name: &str) -> Result<Self, ConfigError> {
        let builder = legacy_env_defaults(Config::builder(), |var| std::env::var(var).ok())?
            .add_source(File::new(name, FileFormat::Toml).required(false))
            .add_source(config::Environment::default().separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.misskey.instance_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "misskey.instance_url (MISSKEY__INSTANCE_URL or MISSKEY_INSTANCE_URL) must be set".to_string(),
            ));
        }
        if self.misskey.api_token.is_empty() {
            return Err(ConfigError::Message(
                "misskey.api_token (MISSKEY__API_TOKEN or MISSKEY_API_TOKEN) must be set".to_string(),
            ));
        }
        Ok(())
    }
}

fn legacy_env_defaults<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    for (var, key) in LEGACY_ENV {
        if let Some(value) = lookup(var) {
            builder = builder.set_default(key, value)?;
        }
    }
    Ok(builder)
}
