/// Energy-trigger detector backend
///
/// Fires when the RMS energy of consecutive frames stays above a threshold for long
/// enough. It stands in for a trained model wherever one is not installed and gives the
/// session something deterministic to drive.

use crate::audio::AudioSample;
use crate::config::HotwordDefinition;
use crate::engine::HotwordEngine;
use crate::frame_buffer::FrameBuffer;
use crate::registry::DetectorError;
use serde_json::Value;
use tracing::{debug, trace};

/// Energy detector parameters
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyConfig {
    /// RMS threshold (0.0 - 1.0) a frame must exceed
    pub threshold: f32,

    /// Frame size in samples
    pub frame_size: usize,

    /// Consecutive loud frames needed to fire
    pub trigger_frames: usize,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            frame_size: 512,    // 32ms at 16kHz
            trigger_frames: 8,  // ~256ms of sustained energy
        }
    }
}

impl EnergyConfig {
    /// Read overrides from a hotword's engine options
    pub fn from_options(definition: &HotwordDefinition) -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(value) = definition.options.get("threshold") {
            config.threshold = value
                .as_f64()
                .ok_or_else(|| format!("threshold must be a number, got {}", value))?
                as f32;
        }

        if let Some(value) = definition.options.get("frame_size") {
            config.frame_size = positive_integer("frame_size", value)?;
        }

        if let Some(value) = definition.options.get("trigger_frames") {
            config.trigger_frames = positive_integer("trigger_frames", value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err("threshold must be between 0.0 and 1.0".to_string());
        }

        if self.frame_size == 0 {
            return Err("frame_size must be greater than 0".to_string());
        }

        if self.trigger_frames == 0 {
            return Err("trigger_frames must be greater than 0".to_string());
        }

        Ok(())
    }
}

fn positive_integer(key: &str, value: &Value) -> Result<usize, String> {
    value
        .as_u64()
        .filter(|&n| n > 0)
        .map(|n| n as usize)
        .ok_or_else(|| format!("{} must be a positive integer, got {}", key, value))
}

/// RMS of a frame, normalized to 0.0 - 1.0
fn frame_energy(samples: &[AudioSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

pub struct EnergyDetector {
    name: String,
    config: EnergyConfig,
    frames: FrameBuffer,
    loud_streak: usize,
    fired: bool,
}

impl EnergyDetector {
    pub fn new(name: impl Into<String>, config: EnergyConfig) -> Self {
        let name = name.into();
        debug!("Initializing energy detector '{}': {:?}", name, config);

        Self {
            name,
            frames: FrameBuffer::new(config.frame_size),
            config,
            loud_streak: 0,
            fired: false,
        }
    }

    pub fn from_definition(
        name: &str,
        definition: &HotwordDefinition,
    ) -> Result<Self, DetectorError> {
        let config =
            EnergyConfig::from_options(definition).map_err(|reason| DetectorError::Construction {
                name: name.to_string(),
                reason,
            })?;

        Ok(Self::new(name, config))
    }

    pub fn config(&self) -> &EnergyConfig {
        &self.config
    }
}

impl HotwordEngine for EnergyDetector {
    fn update(&mut self, samples: &[AudioSample]) {
        let Self {
            name,
            config,
            frames,
            loud_streak,
            fired,
        } = self;

        frames.write(samples, |frame| {
            let energy = frame_energy(frame);
            trace!("'{}' frame energy={:.4} streak={}", name, energy, loud_streak);

            if energy > config.threshold {
                *loud_streak += 1;
                if *loud_streak >= config.trigger_frames {
                    debug!("'{}' triggered after {} loud frames", name, loud_streak);
                    *fired = true;
                    *loud_streak = 0;
                }
            } else {
                *loud_streak = 0;
            }
        });
    }

    fn fired_since_last_check(&mut self) -> bool {
        std::mem::take(&mut self.fired)
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.loud_streak = 0;
        self.fired = false;
    }
}
