/// Detector registry
///
/// Looks hotwords up in the configuration and builds engines for them through the
/// factory registered for their module.

use crate::config::ConfigProvider;
use crate::engine::{builtin_factories, EngineFactory, HotwordEngine};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Unknown hotword {0}")]
    UnknownDetector(String),

    #[error("Failed to construct detector '{name}': {reason}")]
    Construction { name: String, reason: String },
}

pub struct DetectorRegistry {
    config: Arc<dyn ConfigProvider>,
    factories: HashMap<String, EngineFactory>,
}

impl DetectorRegistry {
    /// Registry with the built-in backends
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self::with_factories(config, builtin_factories())
    }

    /// Registry with an explicit factory table
    pub fn with_factories(
        config: Arc<dyn ConfigProvider>,
        factories: HashMap<String, EngineFactory>,
    ) -> Self {
        debug!(
            "Detector registry modules: {:?}",
            factories.keys().collect::<Vec<_>>()
        );

        Self { config, factories }
    }

    /// Add or replace the factory for `module`
    pub fn register(&mut self, module: impl Into<String>, factory: EngineFactory) {
        self.factories.insert(module.into(), factory);
    }

    pub fn config(&self) -> &Arc<dyn ConfigProvider> {
        &self.config
    }

    /// Build a fresh engine for the hotword `name`
    pub fn instantiate(&self, name: &str) -> Result<Box<dyn HotwordEngine>, DetectorError> {
        let definitions = self.config.hotword_definitions();
        let definition = definitions
            .get(name)
            .ok_or_else(|| DetectorError::UnknownDetector(name.to_string()))?;

        let factory = self.factories.get(&definition.module).ok_or_else(|| {
            warn!("No backend for module '{}'", definition.module);
            DetectorError::Construction {
                name: name.to_string(),
                reason: format!("unknown module '{}'", definition.module),
            }
        })?;

        let engine = factory(name, definition)?;
        debug!("Constructed detector '{}' ({})", name, definition.module);

        Ok(engine)
    }
}
