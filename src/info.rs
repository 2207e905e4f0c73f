/// Capability description
///
/// Answers `describe` with the catalog of configured wake words. Reads configuration
/// only, so one responder is shared by every session.

use crate::config::ConfigProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the single wake program this service exposes
pub const PROGRAM_NAME: &str = "ovos-wakeword-plugins";

pub const PROGRAM_DESCRIPTION: &str = "wake word detection via OpenVoiceOS plugins";

/// Version reported for the program and its models
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

impl Attribution {
    fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeModel {
    pub name: String,
    pub attribution: Attribution,
    pub installed: bool,
    pub description: String,
    pub version: String,
    pub languages: Vec<String>,
    pub phrase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeProgram {
    pub name: String,
    pub attribution: Attribution,
    pub installed: bool,
    pub description: String,
    pub version: String,
    pub models: Vec<WakeModel>,
}

/// Reply to `describe`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub wake: Vec<WakeProgram>,
}

/// Human phrase for a hotword name: separators become spaces, words are title-cased
///
/// `hey_mycroft` -> `Hey Mycroft`
pub fn phrase_from_name(name: &str) -> String {
    let mut phrase = String::with_capacity(name.len());
    let mut previous_is_letter = false;

    for c in name.chars() {
        let c = if c == '_' || c == '-' { ' ' } else { c };

        if c.is_alphabetic() {
            if previous_is_letter {
                phrase.extend(c.to_lowercase());
            } else {
                phrase.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            phrase.push(c);
            previous_is_letter = false;
        }
    }

    phrase
}

pub struct CapabilityResponder {
    config: Arc<dyn ConfigProvider>,
}

impl CapabilityResponder {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self { config }
    }

    /// Snapshot of every configured wake word
    pub fn describe(&self) -> Info {
        let default_language = self.config.default_language();

        let models = self
            .config
            .hotword_definitions()
            .into_iter()
            .map(|(name, definition)| WakeModel {
                description: format!("wake-word detection via {}", definition.module),
                phrase: phrase_from_name(&name),
                attribution: Attribution::new(
                    "OpenVoiceOS",
                    "https://github.com/OpenVoiceOS/ovos-plugin-manager",
                ),
                installed: true,
                languages: vec![definition.lang.unwrap_or_else(|| default_language.clone())],
                version: VERSION.to_string(),
                name,
            })
            .collect();

        Info {
            wake: vec![WakeProgram {
                name: PROGRAM_NAME.to_string(),
                attribution: Attribution::new("TigreGótico", "https://github.com/TigreGotico"),
                installed: true,
                description: PROGRAM_DESCRIPTION.to_string(),
                version: VERSION.to_string(),
                models,
            }],
        }
    }
}
