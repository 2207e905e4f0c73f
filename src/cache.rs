/// Per-session detector instance cache
///
/// Detectors are expensive to build and keep adaptive state between utterances, so a
/// loaded name is never rebuilt for the life of the session.

use crate::engine::HotwordEngine;
use crate::registry::{DetectorError, DetectorRegistry};
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
pub struct DetectorCache {
    instances: HashMap<String, Box<dyn HotwordEngine>>,
}

impl DetectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure every name in `names` has a live detector
    ///
    /// Missing names are all built before any is inserted: if one fails, the cache is
    /// left exactly as it was.
    pub fn ensure_loaded(
        &mut self,
        registry: &DetectorRegistry,
        names: &[String],
    ) -> Result<(), DetectorError> {
        let mut loaded: Vec<(String, Box<dyn HotwordEngine>)> = Vec::new();

        for name in names {
            if self.instances.contains_key(name) || loaded.iter().any(|(n, _)| n == name) {
                continue;
            }

            let engine = registry.instantiate(name)?;
            loaded.push((name.clone(), engine));
        }

        for (name, engine) in loaded {
            debug!("Loaded model: {}", name);
            self.instances.insert(name, engine);
        }

        Ok(())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn HotwordEngine + 'static)> {
        self.instances.get_mut(name).map(|engine| engine.as_mut())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
