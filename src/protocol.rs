/// Wyoming wire protocol
///
/// Each event is a JSON header line, optionally followed by a JSON data block
/// (`data_length` bytes) and a binary payload (`payload_length` bytes). This module
/// frames events on any tokio stream and maps them to the typed events the session
/// understands.

use crate::audio::{AudioChunk, AudioFormat};
use crate::info::Info;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Protocol version written in every header
pub const PROTOCOL_VERSION: &str = "1.5.4";

/// Longest header line accepted, newline included
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Largest data block accepted
pub const MAX_DATA_BYTES: usize = 1024 * 1024;

/// Largest binary payload accepted
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

pub const DESCRIBE: &str = "describe";
pub const INFO: &str = "info";
pub const DETECT: &str = "detect";
pub const DETECTION: &str = "detection";
pub const NOT_DETECTED: &str = "not-detected";
pub const AUDIO_START: &str = "audio-start";
pub const AUDIO_CHUNK: &str = "audio-chunk";
pub const AUDIO_STOP: &str = "audio-stop";

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event header: {0}")]
    InvalidHeader(String),

    #[error("Invalid data block: {0}")]
    InvalidData(String),

    #[error("{what} of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Invalid '{event_type}' event: {reason}")]
    InvalidEvent { event_type: String, reason: String },

    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Untyped protocol event
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub event_type: String,
    pub data: Map<String, Value>,
    pub payload: Option<Bytes>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Read the next event
///
/// Returns `Ok(None)` when the stream ends cleanly before a header. Lengths are checked
/// against the size limits before anything is allocated. `InvalidHeader` and
/// `InvalidData` leave the stream positioned at the next event; any other error means
/// the stream can no longer be framed.
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_HEADER_BYTES as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if read == MAX_HEADER_BYTES && line.last() != Some(&b'\n') {
        return Err(ProtocolError::FrameTooLarge {
            what: "header line",
            len: read,
            max: MAX_HEADER_BYTES,
        });
    }

    let header: Header = serde_json::from_slice(&line)
        .map_err(|e| ProtocolError::InvalidHeader(e.to_string()))?;

    let data_length = checked_length("data block", header.data_length, MAX_DATA_BYTES)?;
    let payload_length =
        checked_length("payload", header.payload_length, MAX_PAYLOAD_BYTES)?;

    let block = match data_length {
        Some(length) => {
            let mut block = vec![0u8; length];
            reader.read_exact(&mut block).await?;
            Some(block)
        }
        None => None,
    };

    let payload = match payload_length {
        Some(length) => {
            let mut payload = vec![0u8; length];
            reader.read_exact(&mut payload).await?;
            Some(Bytes::from(payload))
        }
        None => None,
    };

    // Parsed only once the whole frame is consumed
    let mut data = header.data.unwrap_or_default();
    if let Some(block) = block {
        let extra: Map<String, Value> = serde_json::from_slice(&block)
            .map_err(|e| ProtocolError::InvalidData(e.to_string()))?;
        data.extend(extra);
    }

    trace!(
        "Read event: type={}, data keys={}, payload={} bytes",
        header.event_type,
        data.len(),
        payload.as_ref().map_or(0, |p| p.len())
    );

    Ok(Some(Event {
        event_type: header.event_type,
        data,
        payload,
    }))
}

fn checked_length(
    what: &'static str,
    length: Option<usize>,
    max: usize,
) -> Result<Option<usize>, ProtocolError> {
    match length.filter(|&n| n > 0) {
        Some(len) if len > max => Err(ProtocolError::FrameTooLarge { what, len, max }),
        other => Ok(other),
    }
}

/// Write one event and flush
pub async fn write_event<W>(writer: &mut W, event: &Event) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let data_block = if event.data.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&event.data)?)
    };

    let header = Header {
        event_type: event.event_type.clone(),
        data: None,
        data_length: data_block.as_ref().map(Vec::len),
        payload_length: event.payload.as_ref().map(Bytes::len).filter(|&n| n > 0),
        version: Some(PROTOCOL_VERSION.to_string()),
    };

    let mut line = serde_json::to_vec(&header)?;
    line.push(b'\n');
    writer.write_all(&line).await?;

    if let Some(block) = &data_block {
        writer.write_all(block).await?;
    }

    if let Some(payload) = event.payload.as_ref().filter(|p| !p.is_empty()) {
        writer.write_all(payload).await?;
    }

    writer.flush().await?;
    trace!("Wrote event: type={}", event.event_type);

    Ok(())
}

/// Events the session consumes
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Describe,
    Detect { names: Option<Vec<String>> },
    AudioStart { timestamp: Option<u64> },
    AudioChunk(AudioChunk),
    AudioStop { timestamp: Option<u64> },
    Other { event_type: String },
}

impl InboundEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::Describe => DESCRIBE,
            Self::Detect { .. } => DETECT,
            Self::AudioStart { .. } => AUDIO_START,
            Self::AudioChunk(_) => AUDIO_CHUNK,
            Self::AudioStop { .. } => AUDIO_STOP,
            Self::Other { event_type } => event_type.as_str(),
        }
    }
}

#[derive(Deserialize)]
struct DetectData {
    #[serde(default)]
    names: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct TimestampData {
    #[serde(default)]
    timestamp: Option<u64>,
}

#[derive(Deserialize)]
struct ChunkData {
    rate: u32,
    width: u16,
    channels: u16,
    #[serde(default)]
    timestamp: Option<u64>,
}

fn parse_data<T>(event_type: &str, data: Map<String, Value>) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(Value::Object(data)).map_err(|e| ProtocolError::InvalidEvent {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}

impl TryFrom<Event> for InboundEvent {
    type Error = ProtocolError;

    fn try_from(event: Event) -> Result<Self, Self::Error> {
        let Event {
            event_type,
            data,
            payload,
        } = event;

        let inbound = match event_type.as_str() {
            DESCRIBE => Self::Describe,
            DETECT => {
                let detect: DetectData = parse_data(&event_type, data)?;
                Self::Detect {
                    names: detect.names,
                }
            }
            AUDIO_START => {
                let start: TimestampData = parse_data(&event_type, data)?;
                Self::AudioStart {
                    timestamp: start.timestamp,
                }
            }
            AUDIO_CHUNK => {
                let chunk: ChunkData = parse_data(&event_type, data)?;
                Self::AudioChunk(AudioChunk {
                    format: AudioFormat::new(chunk.rate, chunk.width, chunk.channels),
                    timestamp: chunk.timestamp,
                    audio: payload.unwrap_or_default(),
                })
            }
            AUDIO_STOP => {
                let stop: TimestampData = parse_data(&event_type, data)?;
                Self::AudioStop {
                    timestamp: stop.timestamp,
                }
            }
            _ => Self::Other { event_type },
        };

        Ok(inbound)
    }
}

/// Events the session emits
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Info(Info),
    Detection {
        name: String,
        timestamp: Option<u64>,
    },
    NotDetected,
}

impl OutboundEvent {
    pub fn into_event(self) -> Result<Event, ProtocolError> {
        let event = match self {
            Self::Info(info) => match serde_json::to_value(info)? {
                Value::Object(data) => Event::new(INFO).with_data(data),
                other => {
                    return Err(ProtocolError::InvalidData(format!(
                        "info serialized to non-object: {}",
                        other
                    )))
                }
            },
            Self::Detection { name, timestamp } => {
                let mut data = Map::new();
                data.insert("name".to_string(), Value::String(name));
                data.insert(
                    "timestamp".to_string(),
                    timestamp.map_or(Value::Null, Value::from),
                );
                Event::new(DETECTION).with_data(data)
            }
            Self::NotDetected => Event::new(NOT_DETECTED),
        };

        Ok(event)
    }
}
