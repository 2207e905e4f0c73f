/// Per-connection session state machine
///
/// Consumes one connection's events strictly in order, keeps the detector cache for the
/// connection, and decides what to send back.

use crate::audio::{AudioChunk, AudioError, AudioNormalizer};
use crate::cache::DetectorCache;
use crate::info::CapabilityResponder;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::registry::{DetectorError, DetectorRegistry};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Between utterances
    Idle,

    /// Between AudioStart and AudioStop
    InUtterance,
}

pub struct Session {
    client_id: String,
    registry: Arc<DetectorRegistry>,
    responder: Arc<CapabilityResponder>,
    normalizer: AudioNormalizer,
    detectors: DetectorCache,
    active_detectors: Vec<String>,
    state: SessionState,
    detected: bool,
}

impl Session {
    pub fn new(
        client_id: impl Into<String>,
        registry: Arc<DetectorRegistry>,
        responder: Arc<CapabilityResponder>,
    ) -> Self {
        let client_id = client_id.into();
        let default_wake_word = registry.config().default_wake_word();
        debug!("Client connected: {}", client_id);

        Self {
            client_id,
            registry,
            responder,
            normalizer: AudioNormalizer::new(),
            detectors: DetectorCache::new(),
            active_detectors: vec![default_wake_word],
            state: SessionState::Idle,
            detected: false,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_detectors(&self) -> &[String] {
        &self.active_detectors
    }

    pub fn loaded_detectors(&self) -> usize {
        self.detectors.len()
    }

    /// Process one inbound event and return the events to send back
    ///
    /// A failure aborts only this event; the session stays usable and the caller decides
    /// whether to keep the connection.
    pub fn handle_event(
        &mut self,
        event: InboundEvent,
    ) -> Result<Vec<OutboundEvent>, SessionError> {
        match event {
            InboundEvent::Describe => {
                debug!("Sent info to client: {}", self.client_id);
                Ok(vec![OutboundEvent::Info(self.responder.describe())])
            }
            InboundEvent::Detect { names } => {
                self.handle_detect(names.unwrap_or_default())?;
                Ok(Vec::new())
            }
            InboundEvent::AudioStart { .. } => {
                self.handle_audio_start()?;
                Ok(Vec::new())
            }
            InboundEvent::AudioChunk(chunk) => self.handle_audio_chunk(&chunk),
            InboundEvent::AudioStop { .. } => Ok(self.handle_audio_stop()),
            InboundEvent::Other { event_type } => {
                debug!("Unexpected event: type={}", event_type);
                Ok(Vec::new())
            }
        }
    }

    fn handle_detect(&mut self, names: Vec<String>) -> Result<(), DetectorError> {
        if names.is_empty() {
            return Ok(());
        }

        let mut requested: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if !requested.contains(&name) {
                requested.push(name);
            }
        }

        // Load before arming so a failed request keeps the previous set
        self.detectors.ensure_loaded(&self.registry, &requested)?;
        debug!(
            "Client {} armed detectors: {:?}",
            self.client_id, requested
        );
        self.active_detectors = requested;

        Ok(())
    }

    fn handle_audio_start(&mut self) -> Result<(), DetectorError> {
        if self.state == SessionState::InUtterance {
            debug!(
                "Audio restarted without stop from client: {}",
                self.client_id
            );
        }

        self.detected = false;

        if self.active_detectors.is_empty() {
            self.active_detectors = vec![self.registry.config().default_wake_word()];
        }

        self.detectors
            .ensure_loaded(&self.registry, &self.active_detectors)?;

        for name in &self.active_detectors {
            if let Some(detector) = self.detectors.get_mut(name) {
                detector.reset();
            }
        }

        self.state = SessionState::InUtterance;
        Ok(())
    }

    fn handle_audio_chunk(
        &mut self,
        chunk: &AudioChunk,
    ) -> Result<Vec<OutboundEvent>, SessionError> {
        if self.state != SessionState::InUtterance {
            debug!(
                "Dropping audio received outside an utterance from client: {}",
                self.client_id
            );
            return Ok(Vec::new());
        }

        let samples = self.normalizer.convert(chunk)?;
        let mut emitted = Vec::new();

        for name in &self.active_detectors {
            let Some(detector) = self.detectors.get_mut(name) else {
                // AudioStart loads every active name before the state changes
                warn!("No detector loaded for active hotword {}", name);
                continue;
            };

            detector.update(&samples);

            if detector.fired_since_last_check() {
                debug!("Detected {} from client {}", name, self.client_id);
                emitted.push(OutboundEvent::Detection {
                    name: name.clone(),
                    timestamp: chunk.timestamp,
                });
                self.detected = true;
            }
        }

        Ok(emitted)
    }

    fn handle_audio_stop(&mut self) -> Vec<OutboundEvent> {
        if self.state != SessionState::InUtterance {
            debug!(
                "Ignoring audio stop outside an utterance from client: {}",
                self.client_id
            );
            return Vec::new();
        }

        self.state = SessionState::Idle;

        if self.detected {
            return Vec::new();
        }

        debug!(
            "Audio stopped without detection from client: {}",
            self.client_id
        );
        vec![OutboundEvent::NotDetected]
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("Client disconnected: {}", self.client_id);
    }
}
