//! Demo satellite binary: file-backed microphone, directory-writing
//! speaker, manually triggered wake detection. Control via stdin:
//! `l` arms microphone playback, `w` fires a wake detection, `q` stops.

use clap::Parser;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use voice_satellite::stats::stats_reporter;
use voice_satellite::{AudioFormat, Microphone, Satellite, SatelliteConfig, Sound, SystemEvent, Wake};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    satellite: SatelliteConfig,

    /// Wake word model name (enables wake-stream mode)
    #[arg(long)]
    wake_model: Option<String>,

    /// Raw PCM file (16 kHz, 16-bit, mono) streamed as microphone input
    /// while playback is armed
    #[arg(long)]
    mic_audio: Option<PathBuf>,

    /// Directory where received speaker audio is written
    #[arg(long, default_value = "snd-out")]
    snd_dir: PathBuf,

    /// Stats logging interval in seconds (0 = disabled)
    #[arg(long, default_value_t = 0)]
    stats_interval_secs: u64,
}

// ═══════════════════════════════════════════════════════════════════════
//  Demo microphone — pump thread gated by component init/destroy
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct DemoMicState {
    enabled: AtomicBool,
    play_audio: AtomicBool,
}

struct DemoMicrophone {
    state: Arc<DemoMicState>,
}

impl Microphone for DemoMicrophone {
    fn format(&self) -> AudioFormat {
        AudioFormat { rate: 16_000, width: 2, channels: 1 }
    }

    fn init(&self) -> anyhow::Result<()> {
        self.state.enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn destroy(&self) {
        self.state.enabled.store(false, Ordering::Relaxed);
    }
}

/// Produce a 2048-byte capture buffer every 64 ms: silence, or bytes
/// from the configured raw file while playback is armed.
fn mic_pump(sat: Arc<Satellite>, state: Arc<DemoMicState>, audio_path: Option<PathBuf>) {
    let mut file: Option<File> = None;
    let mut buffer = [0u8; 2048];

    loop {
        std::thread::sleep(Duration::from_millis(64));
        if !state.enabled.load(Ordering::Relaxed) {
            continue;
        }

        buffer.fill(0);
        if state.play_audio.load(Ordering::Relaxed) {
            if file.is_none() {
                match &audio_path {
                    Some(path) => match File::open(path) {
                        Ok(f) => file = Some(f),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "cannot open demo audio");
                            state.play_audio.store(false, Ordering::Relaxed);
                        }
                    },
                    None => {
                        warn!("no --mic-audio configured, nothing to play");
                        state.play_audio.store(false, Ordering::Relaxed);
                    }
                }
            }
            if let Some(f) = file.as_mut() {
                match f.read(&mut buffer) {
                    Ok(0) | Err(_) => {
                        info!("demo audio finished");
                        state.play_audio.store(false, Ordering::Relaxed);
                        file = None;
                    }
                    Ok(_) => {}
                }
            }
        }

        sat.mic_write_data(&buffer);
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Demo speaker — one output file per utterance
// ═══════════════════════════════════════════════════════════════════════

struct DemoSound {
    dir: PathBuf,
    inner: Mutex<DemoSoundState>,
}

#[derive(Default)]
struct DemoSoundState {
    file: Option<File>,
    utterance: u32,
}

impl DemoSound {
    fn new(dir: PathBuf) -> DemoSound {
        DemoSound { dir, inner: Mutex::new(DemoSoundState::default()) }
    }
}

impl Sound for DemoSound {
    fn handle_system_event(&self, event: &SystemEvent<'_>) {
        let mut inner = self.inner.lock();
        match event {
            SystemEvent::SndAudioStart { format } => {
                if let Err(e) = std::fs::create_dir_all(&self.dir) {
                    warn!(error = %e, "cannot create speaker output dir");
                    return;
                }
                let name = format!(
                    "snd_{}_{}_{}_{}.raw",
                    inner.utterance, format.rate, format.width, format.channels
                );
                inner.utterance += 1;
                let path = self.dir.join(&name);
                match File::create(&path) {
                    Ok(f) => {
                        info!(path = %path.display(), "🔊 playback started");
                        inner.file = Some(f);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "cannot open output"),
                }
            }
            SystemEvent::SndAudioData { data } => {
                if let Some(f) = inner.file.as_mut() {
                    if let Err(e) = f.write_all(data) {
                        warn!(error = %e, "speaker write failed");
                    }
                }
            }
            SystemEvent::SndAudioEnd => {
                if inner.file.take().is_some() {
                    info!("🔊 playback finished");
                }
            }
            _ => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Demo wake component
// ═══════════════════════════════════════════════════════════════════════

struct DemoWake {
    model: String,
}

impl Wake for DemoWake {
    fn model_name(&self) -> &str {
        &self.model
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Entry point
// ═══════════════════════════════════════════════════════════════════════

fn control_loop(sat: Arc<Satellite>, mic_state: Arc<DemoMicState>) {
    let stdin = std::io::stdin();
    for byte in stdin.lock().bytes() {
        match byte {
            Ok(b'l') => {
                info!("🎙 demo playback armed");
                mic_state.play_audio.store(true, Ordering::Relaxed);
            }
            Ok(b'w') => {
                info!("wake detection triggered");
                sat.wake_detection();
            }
            Ok(b'q') => {
                info!("stopping the satellite");
                sat.stop();
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let cli = Cli::parse();

    info!(
        listen = cli.satellite.listen_addr(),
        wake = cli.wake_model.as_deref().unwrap_or("-"),
        "🛰 voice-satellite starting"
    );

    let mic_state = Arc::new(DemoMicState::default());

    let mut sat = Satellite::new(cli.satellite.clone());
    sat.set_microphone(Arc::new(DemoMicrophone { state: mic_state.clone() }));
    sat.set_sound(Arc::new(DemoSound::new(cli.snd_dir.clone())));
    if let Some(model) = &cli.wake_model {
        sat.set_wake(Arc::new(DemoWake { model: model.clone() }));
    }
    let sat = Arc::new(sat);

    {
        let sat = sat.clone();
        let state = mic_state.clone();
        let path = cli.mic_audio.clone();
        std::thread::spawn(move || mic_pump(sat, state, path));
    }

    let reporter_running = Arc::new(AtomicBool::new(true));
    if cli.stats_interval_secs > 0 {
        let stats = sat.stats();
        let running = reporter_running.clone();
        let interval = cli.stats_interval_secs;
        std::thread::spawn(move || stats_reporter(stats, interval, running));
    }

    {
        let sat = sat.clone();
        let state = mic_state.clone();
        std::thread::spawn(move || control_loop(sat, state));
    }

    let result = sat.run();
    reporter_running.store(false, Ordering::Relaxed);
    result?;

    info!("✅ satellite stopped");
    Ok(())
}
