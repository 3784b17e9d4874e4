//! Wake-stream mode: audio only flows after the local wake-word
//! detector fires. Idle microphone data feeds the detector instead of
//! the wire; `pause-satellite` freezes both paths until the next
//! `run-satellite`.

use crate::components::SystemEvent;
use crate::decoder::DecodedEvent;
use crate::dispatch;
use crate::mode::{Mode, ModeKind};
use crate::protocol::EventType;
use crate::satellite::Satellite;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
struct WakeState {
    streaming: bool,
    paused: bool,
}

pub(crate) struct WakeStreamMode {
    state: Mutex<WakeState>,
}

impl WakeStreamMode {
    pub(crate) fn new() -> WakeStreamMode {
        WakeStreamMode {
            state: Mutex::new(WakeState::default()),
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (bool, bool) {
        let state = self.state.lock();
        (state.streaming, state.paused)
    }
}

impl Mode for WakeStreamMode {
    fn kind(&self) -> ModeKind {
        ModeKind::WakeStream
    }

    fn init(&self) {
        *self.state.lock() = WakeState::default();
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
                let mut state = self.state.lock();
                state.streaming = false;
                state.paused = false;
                handled = true;
            }
            EventType::PauseSatellite => {
                let mut state = self.state.lock();
                state.streaming = false;
                state.paused = true;
                handled = true;
            }
            // The pipeline finished (or died); go back to listening for
            // the wake word.
            EventType::Transcript | EventType::Error => {
                self.state.lock().streaming = false;
                handled = true;
            }
            _ => {}
        }
        handled
    }

    fn handle_system_event(&self, sat: &Satellite, event: &SystemEvent<'_>) {
        match event {
            SystemEvent::SatDisconnect => {
                *self.state.lock() = WakeState::default();
            }
            SystemEvent::MicData { data } => {
                let WakeState { streaming, paused } = *self.state.lock();
                if paused {
                    return;
                }
                if streaming {
                    if let Err(e) = sat.send_audio_chunk(data) {
                        debug!(error = %e, "audio chunk send failed");
                    }
                } else if let Some(wake) = sat.wake() {
                    wake.process_audio(data);
                }
            }
            SystemEvent::WakeDetection => {
                let (was_streaming, was_paused) = {
                    let mut state = self.state.lock();
                    let snapshot = (state.streaming, state.paused);
                    if !state.streaming && !state.paused {
                        state.streaming = true;
                    }
                    snapshot
                };
                if was_streaming || was_paused {
                    return;
                }

                if let Some(wake) = sat.wake() {
                    if let Err(e) = sat.send_detection(wake.model_name()) {
                        debug!(error = %e, "detection send failed");
                    }
                }
                if let Err(e) = sat.send_run_pipeline(None) {
                    debug!(error = %e, "run-pipeline send failed");
                }
            }
            _ => {}
        }
    }
}
