//! The satellite handle: component fabric, connection state, and the
//! embedder-facing control surface.
//!
//! All state lives in one [`Satellite`] value; embedders register
//! adapters, wrap it in an `Arc`, call [`Satellite::run`] on a dedicated
//! thread and poke [`Satellite::mic_write_data`] /
//! [`Satellite::wake_detection`] from their device threads.

use crate::components::{ComponentKind, Microphone, Sound, SystemEvent, Wake};
use crate::config::SatelliteConfig;
use crate::error::{Result, SatelliteError};
use crate::mode::{Mode, ModeKind};
use crate::mode_always_stream::AlwaysStreamMode;
use crate::mode_wake_stream::WakeStreamMode;
use crate::protocol::{
    monotonic_timestamp_us, AudioChunkData, DetectionData, Event, RunPipelineData,
};
use crate::server;
use crate::stats::Stats;
use parking_lot::{Mutex, RwLock};
use std::net::TcpStream;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
struct ConnectionState {
    conn: Option<Arc<TcpStream>>,
    stop_requested: bool,
}

/// A voice-satellite instance.
///
/// Accepts one voice-assistant server connection at a time, advertises
/// its capabilities, streams captured audio up and plays synthesized
/// audio back, gated by the active mode (wake-stream iff a wake
/// component is registered, always-stream otherwise).
pub struct Satellite {
    config: SatelliteConfig,
    state: Mutex<ConnectionState>,
    /// Held for the full duration of one frame write so concurrent
    /// senders cannot interleave bytes.
    send_lock: Mutex<()>,
    mic: Option<Arc<dyn Microphone>>,
    snd: Option<Arc<dyn Sound>>,
    wake: Option<Arc<dyn Wake>>,
    mode: RwLock<Option<Arc<dyn Mode>>>,
    stats: Arc<Stats>,
}

impl Satellite {
    pub fn new(config: SatelliteConfig) -> Satellite {
        Satellite {
            config,
            state: Mutex::new(ConnectionState::default()),
            send_lock: Mutex::new(()),
            mic: None,
            snd: None,
            wake: None,
            mode: RwLock::new(None),
            stats: Stats::new(),
        }
    }

    pub fn config(&self) -> &SatelliteConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Register the microphone adapter. Must happen before `run`.
    pub fn set_microphone(&mut self, mic: Arc<dyn Microphone>) {
        self.mic = Some(mic);
    }

    /// Register the speaker adapter. Must happen before `run`.
    pub fn set_sound(&mut self, snd: Arc<dyn Sound>) {
        self.snd = Some(snd);
    }

    /// Register the wake-word adapter; this switches `run` into
    /// wake-stream mode. Must happen before `run`.
    pub fn set_wake(&mut self, wake: Arc<dyn Wake>) {
        self.wake = Some(wake);
    }

    pub(crate) fn microphone(&self) -> Option<&Arc<dyn Microphone>> {
        self.mic.as_ref()
    }

    pub(crate) fn sound(&self) -> Option<&Arc<dyn Sound>> {
        self.snd.as_ref()
    }

    pub(crate) fn wake(&self) -> Option<&Arc<dyn Wake>> {
        self.wake.as_ref()
    }

    pub(crate) fn mode(&self) -> Option<Arc<dyn Mode>> {
        self.mode.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().conn.is_some()
    }

    // ── lifecycle ──────────────────────────────────────────────────────

    /// Enter the connection loop; blocks until [`stop`](Self::stop) or a
    /// fatal error. Selects the mode, initializes components in the
    /// order mode → sound → microphone → wake, and destroys whatever was
    /// initialized, in reverse, on the way out.
    pub fn run(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.stop_requested = false;
            state.conn = None;
        }

        let mode: Arc<dyn Mode> = if self.wake.is_some() {
            Arc::new(WakeStreamMode::new())
        } else {
            Arc::new(AlwaysStreamMode::new())
        };
        *self.mode.write() = Some(mode.clone());
        info!(mode = ?mode.kind(), name = %self.config.name, "starting satellite");

        let mut initialized: Vec<ComponentKind> = Vec::new();
        let result = match self.init_components(mode.as_ref(), &mut initialized) {
            Ok(()) => server::serve(self),
            Err(e) => Err(e),
        };

        for kind in initialized.iter().rev() {
            match kind {
                ComponentKind::Mode => mode.destroy(),
                ComponentKind::Sound => {
                    if let Some(snd) = &self.snd {
                        snd.destroy();
                    }
                }
                ComponentKind::Microphone => {
                    if let Some(mic) = &self.mic {
                        mic.destroy();
                    }
                }
                ComponentKind::Wake => {
                    if let Some(wake) = &self.wake {
                        wake.destroy();
                    }
                }
            }
        }

        self.detach_connection();
        result
    }

    fn init_components(
        &self,
        mode: &dyn Mode,
        initialized: &mut Vec<ComponentKind>,
    ) -> Result<()> {
        mode.init();
        initialized.push(ComponentKind::Mode);

        if let Some(snd) = &self.snd {
            snd.init().map_err(|e| SatelliteError::ComponentInit {
                kind: ComponentKind::Sound,
                source: e,
            })?;
            initialized.push(ComponentKind::Sound);
        }
        if let Some(mic) = &self.mic {
            mic.init().map_err(|e| SatelliteError::ComponentInit {
                kind: ComponentKind::Microphone,
                source: e,
            })?;
            initialized.push(ComponentKind::Microphone);
        }
        if let Some(wake) = &self.wake {
            wake.init().map_err(|e| SatelliteError::ComponentInit {
                kind: ComponentKind::Wake,
                source: e,
            })?;
            initialized.push(ComponentKind::Wake);
        }
        Ok(())
    }

    /// Request shutdown and return immediately; the connection loop
    /// observes the flag at its next poll boundary.
    pub fn stop(&self) {
        self.state.lock().stop_requested = true;
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.state.lock().stop_requested
    }

    pub(crate) fn attach_connection(&self, conn: Arc<TcpStream>) {
        self.state.lock().conn = Some(conn);
    }

    pub(crate) fn detach_connection(&self) {
        self.state.lock().conn = None;
    }

    // ── device entry points ────────────────────────────────────────────

    /// Deliver captured microphone samples; invoked by the microphone
    /// adapter from its capture thread. The active mode decides whether
    /// the buffer streams out, feeds the wake detector, or is dropped.
    pub fn mic_write_data(&self, data: &[u8]) {
        self.dispatch_system_event(&SystemEvent::MicData { data });
    }

    /// Report a wake-word hit; invoked by the wake adapter.
    pub fn wake_detection(&self) {
        self.dispatch_system_event(&SystemEvent::WakeDetection);
    }

    /// Route a system event to its single recipient: `SND_*` to the
    /// sound component, everything else to the active mode.
    pub(crate) fn dispatch_system_event(&self, event: &SystemEvent<'_>) {
        match event {
            SystemEvent::SndAudioStart { .. }
            | SystemEvent::SndAudioData { .. }
            | SystemEvent::SndAudioEnd => {
                if let Some(snd) = &self.snd {
                    snd.handle_system_event(event);
                }
            }
            _ => {
                if let Some(mode) = self.mode() {
                    mode.handle_system_event(self, event);
                }
            }
        }
    }

    // ── outbound events ────────────────────────────────────────────────

    /// Serialize and transmit one event. Fails with
    /// [`SatelliteError::Disconnected`] when no server is attached or
    /// stop was requested; the send mutex guarantees wire-order matches
    /// call-order and frames never interleave.
    pub fn send_event(&self, event: Event) -> Result<()> {
        let conn = {
            let state = self.state.lock();
            if state.stop_requested {
                return Err(SatelliteError::Disconnected);
            }
            match &state.conn {
                Some(conn) => conn.clone(),
                None => return Err(SatelliteError::Disconnected),
            }
        };

        let frame = event.encode()?;
        let _send_guard = self.send_lock.lock();
        server::send_all(self, &conn, &frame)?;
        self.stats.record_sent(frame.len());
        Ok(())
    }

    /// Ask the server to run a pipeline. With local wake detection the
    /// pipeline starts at ASR and runs once; without it the server does
    /// wake detection and restarts the pipeline when it ends. TTS output
    /// is requested only when a speaker is available.
    pub(crate) fn send_run_pipeline(&self, pipeline_name: Option<&str>) -> Result<()> {
        let (start_stage, restart_on_end) = match self.mode().map(|m| m.kind()) {
            Some(ModeKind::WakeStream) => ("asr", false),
            _ => ("wake", true),
        };
        let end_stage = if self.snd.is_some() { "tts" } else { "handle" };

        let mut event = Event::new("run-pipeline");
        event.data = Some(serde_json::to_value(RunPipelineData {
            name: pipeline_name,
            start_stage,
            end_stage,
            restart_on_end,
        })?);
        self.send_event(event)
    }

    pub(crate) fn send_audio_chunk(&self, chunk: &[u8]) -> Result<()> {
        let Some(mic) = self.microphone() else {
            return Ok(());
        };
        let format = mic.format();
        let mut event = Event::new("audio-chunk");
        event.data = Some(serde_json::to_value(AudioChunkData {
            rate: format.rate,
            width: format.width,
            channels: format.channels,
            timestamp: monotonic_timestamp_us(),
        })?);
        event.payload = Some(chunk.to_vec());
        self.send_event(event)
    }

    pub(crate) fn send_detection(&self, name: &str) -> Result<()> {
        let mut event = Event::new("detection");
        event.data = Some(serde_json::to_value(DetectionData {
            name,
            timestamp: monotonic_timestamp_us(),
        })?);
        self.send_event(event)
    }
}
