/// Detector engine capability
///
/// Every wake-word backend is driven through `HotwordEngine`. Backends are created by
/// factories keyed by module identifier; the registry picks the factory when a detector
/// is first requested.

use crate::audio::AudioSample;
use crate::config::{HotwordDefinition, ENERGY_MODULE};
use crate::energy::EnergyDetector;
use crate::registry::DetectorError;
use std::collections::HashMap;
use std::sync::Arc;

/// A stateful wake-word detector bound to one configured hotword
pub trait HotwordEngine: Send {
    /// Feed 16kHz 16-bit mono samples
    fn update(&mut self, samples: &[AudioSample]);

    /// True once per detection, cleared by the call
    fn fired_since_last_check(&mut self) -> bool;

    /// Drop partial-match state before a new utterance
    fn reset(&mut self);
}

/// Builds an engine for `(name, definition)`
pub type EngineFactory = Arc<
    dyn Fn(&str, &HotwordDefinition) -> Result<Box<dyn HotwordEngine>, DetectorError>
        + Send
        + Sync,
>;

/// Factories for the backends compiled into this crate
pub fn builtin_factories() -> HashMap<String, EngineFactory> {
    let mut factories: HashMap<String, EngineFactory> = HashMap::new();

    let energy: EngineFactory = Arc::new(|name: &str, definition: &HotwordDefinition| {
        let detector = EnergyDetector::from_definition(name, definition)?;
        Ok(Box::new(detector) as Box<dyn HotwordEngine>)
    });
    factories.insert(ENERGY_MODULE.to_string(), energy);

    factories
}
