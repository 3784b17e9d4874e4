//! Event dispatcher: maps the decoded `type` string onto the internal
//! enum and hands the event to the active mode, whose handler runs the
//! default handlers below before applying its own transitions. Whatever
//! neither of them recognizes is only logged.

use crate::components::{AudioFormat, SystemEvent};
use crate::decoder::DecodedEvent;
use crate::protocol::{Event, EventType, PONG_VERSION};
use crate::satellite::Satellite;
use serde_json::{json, Value};
use tracing::{debug, warn};

pub(crate) fn handle_event(sat: &Satellite, event: &DecodedEvent<'_>) {
    let event_type = EventType::from_wire(&event.header.event_type);

    let handled = match sat.mode() {
        Some(mode) => mode.handle_event(sat, event_type, event),
        None => handle_default(sat, event_type, event),
    };

    if !handled {
        debug!(
            event_type = %event.header.event_type,
            header = %event.header.json,
            "event was not handled"
        );
        if let Some(data) = event.data {
            debug!(data = %data, "unhandled event data");
        }
        sat.stats().record_unhandled();
    }
}

/// The mode-independent handlers. Returns whether the event was one of
/// the known server-driven requests.
pub(crate) fn handle_default(
    sat: &Satellite,
    event_type: EventType,
    event: &DecodedEvent<'_>,
) -> bool {
    match event_type {
        EventType::Describe => {
            handle_describe(sat);
            true
        }
        EventType::Ping => {
            handle_ping(sat, event);
            true
        }
        EventType::AudioStart => {
            handle_audio_start(sat, event);
            true
        }
        EventType::AudioChunk => {
            if let Some(chunk) = event.payload {
                sat.dispatch_system_event(&SystemEvent::SndAudioData { data: chunk.data });
            }
            true
        }
        EventType::AudioStop => {
            sat.dispatch_system_event(&SystemEvent::SndAudioEnd);
            true
        }
        EventType::Error => {
            let text = event
                .data
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("-");
            let code = event
                .data
                .and_then(|d| d.get("code"))
                .and_then(Value::as_str)
                .unwrap_or("-");
            warn!(text = %text, code = %code, "server reported an error");
            true
        }
        _ => false,
    }
}

// ── describe → info ────────────────────────────────────────────────────

/// Capability advertisement. The shape is fixed by the protocol peer:
/// stage arrays for services the satellite does not provide itself stay
/// empty, wake models are listed when a detector is attached.
fn handle_describe(sat: &Satellite) {
    let wake = match sat.wake() {
        Some(wake) => json!([{
            "name": "wakeword-detector",
            "attribution": {"name": "-", "url": "-"},
            "installed": true,
            "description": "On-device wake word detector",
            "version": "1.0.0",
            "models": [{
                "name": wake.model_name(),
                "attribution": {"name": "-", "url": "-"},
                "installed": true,
                "description": "Wake word model",
                "version": "1.0.0",
                "languages": [],
                "phrase": wake.model_name(),
            }],
        }]),
        None => json!([]),
    };

    let config = sat.config();
    let data = json!({
        "asr": [],
        "tts": [],
        "handle": [],
        "intent": [],
        "wake": wake,
        "satellite": {
            "name": config.name,
            "attribution": {"name": "", "url": ""},
            "installed": true,
            "description": config.description,
            "version": "1.0.0",
            "area": null,
            "snd_format": null,
        },
    });

    let mut reply = Event::new("info");
    reply.data = Some(data);
    if let Err(e) = sat.send_event(reply) {
        debug!(error = %e, "info send failed");
    }
}

// ── ping → pong ────────────────────────────────────────────────────────

fn handle_ping(sat: &Satellite, event: &DecodedEvent<'_>) {
    let mut reply = Event::with_version("pong", PONG_VERSION);
    reply.data = event
        .data
        .map(|d| json!({"text": d.get("text").cloned().unwrap_or(Value::Null)}));
    if let Err(e) = sat.send_event(reply) {
        debug!(error = %e, "pong send failed");
    }
}

// ── audio-start → speaker ──────────────────────────────────────────────

fn handle_audio_start(sat: &Satellite, event: &DecodedEvent<'_>) {
    if sat.sound().is_none() {
        return;
    }
    let Some(data) = event.data else {
        return;
    };
    match serde_json::from_value::<AudioFormat>(data.clone()) {
        Ok(format) => sat.dispatch_system_event(&SystemEvent::SndAudioStart { format }),
        Err(e) => debug!(error = %e, "malformed audio-start data"),
    }
}
