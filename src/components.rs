//! Component contracts for the satellite fabric.
//!
//! A satellite owns at most one component per kind. The mode is a
//! component too (it lives inside the core); microphone, sound and wake
//! adapters are supplied by the embedder before `run`. Components talk
//! to each other exclusively through typed [`SystemEvent`]s routed by
//! the satellite; there is no broadcast.

use serde::{Deserialize, Serialize};

/// The kinds of components a satellite can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Mode,
    Microphone,
    Sound,
    Wake,
}

/// PCM stream parameters shared between the microphone contract and the
/// `audio-start` / `audio-chunk` protocol events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub rate: u32,
    pub width: u8,
    pub channels: u8,
}

/// In-process notification routed between components.
///
/// Audio buffers are borrowed: a handler that wants to keep the bytes
/// past its own return must copy them.
#[derive(Debug)]
pub enum SystemEvent<'a> {
    /// A server connected.
    SatConnect,
    /// The server connection closed; modes reset their streaming state.
    SatDisconnect,
    /// Captured microphone samples, delivered from the capture thread.
    MicData { data: &'a [u8] },
    /// The server is about to stream playback audio.
    SndAudioStart { format: AudioFormat },
    /// One chunk of playback audio.
    SndAudioData { data: &'a [u8] },
    /// Playback audio finished.
    SndAudioEnd,
    /// The external wake-word detector fired.
    WakeDetection,
}

/// Microphone adapter contract.
///
/// The adapter owns its capture machinery; `init` is expected to start
/// capture and `destroy` to stop it. Captured buffers are pushed into
/// the satellite with [`crate::Satellite::mic_write_data`].
pub trait Microphone: Send + Sync {
    fn format(&self) -> AudioFormat;

    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&self) {}
}

/// Speaker adapter contract. Receives the `SndAudioStart` /
/// `SndAudioData` / `SndAudioEnd` system events for each utterance.
pub trait Sound: Send + Sync {
    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&self) {}

    fn handle_system_event(&self, event: &SystemEvent<'_>);
}

/// Wake-word detector adapter contract.
///
/// Registering a wake component switches the satellite into wake-stream
/// mode. The detection algorithm itself lives in the adapter; it reports
/// a hit through [`crate::Satellite::wake_detection`]. While the mode is
/// idle and unpaused, microphone buffers are handed to `process_audio`
/// so the detector has something to listen to.
pub trait Wake: Send + Sync {
    fn model_name(&self) -> &str;

    fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn destroy(&self) {}

    fn process_audio(&self, _audio: &[u8]) {}
}
