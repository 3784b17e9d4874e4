//! Always-stream mode: the server decides when audio flows. A
//! `run-satellite` opens the gate and kicks off a remote-wake pipeline;
//! `pause-satellite` closes it. Microphone data outside the gate is
//! dropped.

use crate::components::SystemEvent;
use crate::decoder::DecodedEvent;
use crate::dispatch;
use crate::mode::{Mode, ModeKind};
use crate::protocol::EventType;
use crate::satellite::Satellite;
use parking_lot::Mutex;
use tracing::debug;

pub(crate) struct AlwaysStreamMode {
    streaming: Mutex<bool>,
}

impl AlwaysStreamMode {
    pub(crate) fn new() -> AlwaysStreamMode {
        AlwaysStreamMode {
            streaming: Mutex::new(false),
        }
    }

    #[cfg(test)]
    fn is_streaming(&self) -> bool {
        *self.streaming.lock()
    }
}

impl Mode for AlwaysStreamMode {
    fn kind(&self) -> ModeKind {
        ModeKind::AlwaysStream
    }

    fn init(&self) {
        *self.streaming.lock() = false;
    }

    fn handle_event(
        &self,
        sat: &Satellite,
        event_type: EventType,
        event: &DecodedEvent<'_>,
    ) -> bool {
        let mut handled = dispatch::handle_default(sat, event_type, event);
        match event_type {
            EventType::RunSatellite => {
                if let Err(e) = sat.send_run_pipeline(None) {
                    debug!(error = %e, "run-pipeline send failed");
                }
                *self.streaming.lock() = true;
                handled = true;
            }
            EventType::PauseSatellite => {
                *self.streaming.lock() = false;
                handled = true;
            }
            _ => {}
        }
        handled
    }

    fn handle_system_event(&self, sat: &Satellite, event: &SystemEvent<'_>) {
        match event {
            SystemEvent::MicData { data } => {
                let streaming = *self.streaming.lock();
                if !streaming {
                    return;
                }
                if let Err(e) = sat.send_audio_chunk(data) {
                    debug!(error = %e, "audio chunk send failed");
                }
            }
            SystemEvent::SatDisconnect => {
                *self.streaming.lock() = false;
            }
            _ => {}
        }
    }
}
