//! Wire protocol: one event = a single-line JSON header, an optional
//! JSON data section, an optional binary payload.
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────┬────────────────┐
//! │ {"type":"...", ...}\n        │ {...}            │ raw bytes      │
//! │ header (always)              │ data_length B    │ payload_length │
//! └──────────────────────────────┴──────────────────┴────────────────┘
//! ```
//!
//! The header declares `data_length` / `payload_length` for the parts
//! that follow; there is no separator after the header newline.

use crate::error::Result;
use bytes::{BufMut, Bytes, BytesMut};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;

// ═══════════════════════════════════════════════════════════════════════
//  Constants
// ═══════════════════════════════════════════════════════════════════════

/// Default TCP port the voice-assistant server connects to.
pub const DEFAULT_PORT: u16 = 10700;

/// Size of the decoder staging buffer; also the upper bound for a
/// header line and for a declared `data_length`.
pub const DECODER_BUFFER_SIZE: usize = 4096;

/// Upper bound for a declared `payload_length` (128 KiB).
pub const MAX_PAYLOAD_LENGTH: usize = 128 * 1024;

/// Protocol version stamped into outbound event headers.
pub const PROTOCOL_VERSION: &str = "1.5.2";

/// Version stamped into `pong` headers specifically; the header-level
/// `version` field is per-event metadata and peers expect this exact
/// value on pong.
pub const PONG_VERSION: &str = "1.7.2";

// ═══════════════════════════════════════════════════════════════════════
//  Event types
// ═══════════════════════════════════════════════════════════════════════

/// The closed set of inbound event types the satellite reacts to.
/// Anything else decodes as `Unknown` and is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Describe,
    Ping,
    RunSatellite,
    PauseSatellite,
    AudioStart,
    AudioChunk,
    AudioStop,
    Detection,
    VoiceStopped,
    Error,
    Transcript,
    Unknown,
}

/// Fixed wire-string → type table, scanned linearly.
const EVENT_TYPE_TABLE: &[(&str, EventType)] = &[
    ("describe", EventType::Describe),
    ("ping", EventType::Ping),
    ("run-satellite", EventType::RunSatellite),
    ("pause-satellite", EventType::PauseSatellite),
    ("audio-start", EventType::AudioStart),
    ("audio-chunk", EventType::AudioChunk),
    ("audio-stop", EventType::AudioStop),
    ("detection", EventType::Detection),
    ("voice-stopped", EventType::VoiceStopped),
    ("error", EventType::Error),
    ("transcript", EventType::Transcript),
];

impl EventType {
    pub fn from_wire(type_str: &str) -> EventType {
        for (wire, event_type) in EVENT_TYPE_TABLE {
            if *wire == type_str {
                return *event_type;
            }
        }
        EventType::Unknown
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Outbound event + codec
// ═══════════════════════════════════════════════════════════════════════

/// An outbound protocol event.
///
/// The header is a JSON object; `encode` injects `data_length` /
/// `payload_length` to match the parts actually present, replacing any
/// stale values.
#[derive(Debug, Clone)]
pub struct Event {
    pub header: Map<String, Value>,
    pub data: Option<Value>,
    pub payload: Option<Vec<u8>>,
}

impl Event {
    /// Header-only event stamped with [`PROTOCOL_VERSION`].
    pub fn new(event_type: &str) -> Event {
        Event::with_version(event_type, PROTOCOL_VERSION)
    }

    pub fn with_version(event_type: &str, version: &str) -> Event {
        let mut header = Map::new();
        header.insert("type".to_string(), Value::String(event_type.to_string()));
        header.insert("version".to_string(), Value::String(version.to_string()));
        Event {
            header,
            data: None,
            payload: None,
        }
    }

    /// Serialize to the wire frame: compact header line, then the data
    /// JSON (no separator), then the payload bytes.
    pub fn encode(mut self) -> Result<Bytes> {
        let data_bytes = match &self.data {
            Some(data) => {
                let bytes = serde_json::to_vec(data)?;
                self.header.insert("data_length".to_string(), Value::from(bytes.len()));
                Some(bytes)
            }
            None => {
                self.header.remove("data_length");
                None
            }
        };

        match &self.payload {
            Some(payload) => {
                self.header
                    .insert("payload_length".to_string(), Value::from(payload.len()));
            }
            None => {
                self.header.remove("payload_length");
            }
        }

        let header_bytes = serde_json::to_vec(&self.header)?;
        let data_len = data_bytes.as_ref().map(|b| b.len()).unwrap_or(0);
        let payload_len = self.payload.as_ref().map(|p| p.len()).unwrap_or(0);

        let mut frame = BytesMut::with_capacity(header_bytes.len() + 1 + data_len + payload_len);
        frame.put_slice(&header_bytes);
        frame.put_u8(b'\n');
        if let Some(data) = data_bytes {
            frame.put_slice(&data);
        }
        if let Some(payload) = &self.payload {
            frame.put_slice(payload);
        }
        Ok(frame.freeze())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Typed outbound payloads
// ═══════════════════════════════════════════════════════════════════════

/// Data section of the `run-pipeline` event.
#[derive(Debug, Clone, Serialize)]
pub struct RunPipelineData<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    pub start_stage: &'a str,
    pub end_stage: &'a str,
    pub restart_on_end: bool,
}

/// Data section of an outbound `audio-chunk` event.
#[derive(Debug, Clone, Serialize)]
pub struct AudioChunkData {
    pub rate: u32,
    pub width: u8,
    pub channels: u8,
    pub timestamp: u64,
}

/// Data section of the `detection` event.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionData<'a> {
    pub name: &'a str,
    pub timestamp: u64,
}

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic microseconds since process start, used for event
/// timestamps. The protocol peer does not pin the epoch or unit.
pub fn monotonic_timestamp_us() -> u64 {
    PROCESS_START.elapsed().as_micros() as u64
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
