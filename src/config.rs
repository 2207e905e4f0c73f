/// Service configuration
///
/// Hotword definitions, the default wake word and the default language, read from an
/// OVOS-style JSON file. Everything here is read-only once the server starts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Wake word used when a client never names one
pub const DEFAULT_WAKE_WORD: &str = "hey_mycroft";

/// Language reported for hotwords without their own `lang`
pub const DEFAULT_LANGUAGE: &str = "en";

/// Module of the built-in energy detector
pub const ENERGY_MODULE: &str = "energy";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One entry of the `hotwords` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotwordDefinition {
    /// Engine module identifier, resolved by the detector registry
    pub module: String,

    /// Language of the wake phrase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    /// Engine-specific options, passed through untouched
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl HotwordDefinition {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            lang: None,
            options: Map::new(),
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }
}

/// Read-only source of detector configuration
///
/// Values may be re-queried on every access; callers keep nothing beyond what a session
/// caches itself.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigProvider: Send + Sync {
    fn hotword_definitions(&self) -> BTreeMap<String, HotwordDefinition>;

    fn default_wake_word(&self) -> String;

    fn default_language(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_wake_word")]
    pub wake_word: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            wake_word: default_wake_word(),
        }
    }
}

/// Full service configuration as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_language")]
    pub lang: String,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default = "default_hotwords")]
    pub hotwords: BTreeMap<String, HotwordDefinition>,
}

fn default_wake_word() -> String {
    DEFAULT_WAKE_WORD.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

fn default_hotwords() -> BTreeMap<String, HotwordDefinition> {
    let mut hotwords = BTreeMap::new();
    hotwords.insert(
        DEFAULT_WAKE_WORD.to_string(),
        HotwordDefinition::new(ENERGY_MODULE),
    );
    hotwords
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            lang: default_language(),
            listener: ListenerConfig::default(),
            hotwords: default_hotwords(),
        }
    }
}

impl ServiceConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&contents)
    }

    /// Resolve configuration the way the service binary does
    ///
    /// An explicit path wins over `WAKEWORD_CONFIG`; with neither, built-in defaults are
    /// used. `WAKEWORD_DEFAULT` and `WAKEWORD_LANG` override the loaded values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var("WAKEWORD_CONFIG").ok();

        let mut config = match path.map(Path::to_path_buf).or(env_path.map(Into::into)) {
            Some(path) => Self::from_file(path)?,
            None => {
                info!("No configuration file given, using defaults");
                Self::default()
            }
        };

        if let Ok(wake_word) = std::env::var("WAKEWORD_DEFAULT") {
            config.listener.wake_word = wake_word;
        }

        if let Ok(lang) = std::env::var("WAKEWORD_LANG") {
            config.lang = lang;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listener.wake_word.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "listener.wake_word must not be empty".to_string(),
            ));
        }

        if let Some((name, _)) = self
            .hotwords
            .iter()
            .find(|(_, def)| def.module.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "hotword '{}' has no module",
                name
            )));
        }

        Ok(())
    }
}

impl ConfigProvider for ServiceConfig {
    fn hotword_definitions(&self) -> BTreeMap<String, HotwordDefinition> {
        self.hotwords.clone()
    }

    fn default_wake_word(&self) -> String {
        self.listener.wake_word.clone()
    }

    fn default_language(&self) -> String {
        self.lang.clone()
    }
}
