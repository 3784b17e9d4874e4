//! End-to-end exercises over real localhost TCP: a test acts as the
//! voice-assistant server, the satellite runs on its own thread.

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use voice_satellite::decoder::EventDecoder;
use voice_satellite::{
    AudioFormat, Event, Microphone, Satellite, SatelliteConfig, Sound, SystemEvent, Wake,
};

// ── fixtures ───────────────────────────────────────────────────────────

/// Pick a random free TCP port by binding to port 0 and returning the
/// assigned port.
fn pick_free_port() -> u16 {
    let sock = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    sock.local_addr().unwrap().port()
}

struct TestMic;

impl Microphone for TestMic {
    fn format(&self) -> AudioFormat {
        AudioFormat { rate: 16_000, width: 2, channels: 1 }
    }
}

#[derive(Default)]
struct RecordingSound {
    log: parking_lot::Mutex<Vec<String>>,
}

impl Sound for RecordingSound {
    fn handle_system_event(&self, event: &SystemEvent<'_>) {
        let entry = match event {
            SystemEvent::SndAudioStart { format } => {
                format!("start {}/{}/{}", format.rate, format.width, format.channels)
            }
            SystemEvent::SndAudioData { data } => format!("data {}", data.len()),
            SystemEvent::SndAudioEnd => "end".to_string(),
            other => format!("unexpected {:?}", other),
        };
        self.log.lock().push(entry);
    }
}

struct TestWake {
    model: String,
}

impl Wake for TestWake {
    fn model_name(&self) -> &str {
        &self.model
    }
}

struct TestSatellite {
    sat: Arc<Satellite>,
    handle: JoinHandle<voice_satellite::Result<()>>,
    port: u16,
}

impl TestSatellite {
    fn start(configure: impl FnOnce(&mut Satellite)) -> TestSatellite {
        let port = pick_free_port();
        let config = SatelliteConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..SatelliteConfig::default()
        };
        let mut sat = Satellite::new(config);
        configure(&mut sat);
        let sat = Arc::new(sat);
        let run_sat = sat.clone();
        let handle = thread::spawn(move || run_sat.run());
        TestSatellite { sat, handle, port }
    }

    /// Connect as the server peer and wait until the satellite has
    /// actually accepted us.
    fn connect(&self) -> BufReader<TcpStream> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let stream = loop {
            match TcpStream::connect(("127.0.0.1", self.port)) {
                Ok(s) => break s,
                Err(e) => {
                    assert!(Instant::now() < deadline, "connect failed: {}", e);
                    thread::sleep(Duration::from_millis(20));
                }
            }
        };
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream.set_nodelay(true).unwrap();
        while !self.sat.is_connected() {
            assert!(Instant::now() < deadline, "satellite never accepted");
            thread::sleep(Duration::from_millis(10));
        }
        BufReader::new(stream)
    }

    fn stop(self) {
        self.sat.stop();
        let result = self.handle.join().unwrap();
        result.expect("satellite should stop cleanly");
    }
}

fn send(reader: &BufReader<TcpStream>, event: Event) {
    let frame = event.encode().unwrap();
    (&mut reader.get_ref()).write_all(&frame).unwrap();
}

fn read_event(reader: &mut BufReader<TcpStream>) -> (Value, Option<Value>, Vec<u8>) {
    let mut line = String::new();
    reader.read_line(&mut line).expect("header line");
    let header: Value = serde_json::from_str(line.trim_end()).expect("header json");

    let data_len = header.get("data_length").and_then(Value::as_u64).unwrap_or(0) as usize;
    let data = if data_len > 0 {
        let mut buf = vec![0u8; data_len];
        reader.read_exact(&mut buf).expect("data section");
        Some(serde_json::from_slice(&buf).expect("data json"))
    } else {
        None
    };

    let payload_len = header.get("payload_length").and_then(Value::as_u64).unwrap_or(0) as usize;
    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        reader.read_exact(&mut payload).expect("payload");
    }
    (header, data, payload)
}

/// Assert that nothing arrives for a while (state-machine drop cases).
fn expect_silence(reader: &mut BufReader<TcpStream>) {
    let stream = reader.get_ref();
    stream.set_read_timeout(Some(Duration::from_millis(400))).unwrap();
    match reader.fill_buf() {
        Ok(buf) => assert!(buf.is_empty(), "unexpected bytes on the wire: {:?}", buf),
        Err(e) => assert!(
            matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut),
            "unexpected read error: {}",
            e
        ),
    }
    reader.get_ref().set_read_timeout(Some(Duration::from_secs(2))).unwrap();
}

fn ping_roundtrip(reader: &mut BufReader<TcpStream>) {
    send(reader, Event::new("ping"));
    let (header, _, _) = read_event(reader);
    assert_eq!(header["type"], "pong");
}

// ── scenarios ──────────────────────────────────────────────────────────

#[test]
fn describe_yields_info_with_wake_models() {
    let ts = TestSatellite::start(|sat| {
        sat.set_microphone(Arc::new(TestMic));
        sat.set_sound(Arc::new(RecordingSound::default()));
        sat.set_wake(Arc::new(TestWake { model: "test".to_string() }));
    });
    let mut reader = ts.connect();

    send(&reader, Event::new("describe"));
    let (header, data, _) = read_event(&mut reader);
    assert_eq!(header["type"], "info");
    assert_eq!(header["version"], "1.5.2");

    let data = data.expect("info carries data");
    assert_eq!(data["asr"], json!([]));
    assert_eq!(data["intent"], json!([]));
    assert_eq!(data["wake"][0]["models"][0]["name"], "test");
    assert_eq!(data["wake"][0]["models"][0]["phrase"], "test");
    assert_eq!(data["satellite"]["name"], "Rust Voice Satellite");
    assert_eq!(data["satellite"]["installed"], true);
    assert_eq!(data["satellite"]["area"], Value::Null);

    ts.stop();
}

#[test]
fn describe_without_wake_has_empty_wake_array() {
    let ts = TestSatellite::start(|sat| {
        sat.set_microphone(Arc::new(TestMic));
    });
    let mut reader = ts.connect();

    send(&reader, Event::new("describe"));
    let (_, data, _) = read_event(&mut reader);
    assert_eq!(data.unwrap()["wake"], json!([]));

    ts.stop();
}

#[test]
fn ping_is_answered_with_pong_echo() {
    let ts = TestSatellite::start(|sat| {
        sat.set_microphone(Arc::new(TestMic));
    });
    let mut reader = ts.connect();

    let mut ping = Event::new("ping");
    ping.data = Some(json!({"text": "hi"}));
    send(&reader, ping);

    let (header, data, _) = read_event(&mut reader);
    assert_eq!(header["type"], "pong");
    assert_eq!(header["version"], "1.7.2");
    assert_eq!(data.unwrap()["text"], "hi");

    // A bare ping gets a bare pong.
    send(&reader, Event::new("ping"));
    let (header, data, _) = read_event(&mut reader);
    assert_eq!(header["type"], "pong");
    assert!(data.is_none());

    ts.stop();
}

#[test]
fn always_stream_gates_mic_on_run_and_pause() {
    let pcm: Vec<u8> = (0..320u32).map(|i| i as u8).collect();
    let ts = TestSatellite::start(|sat| {
        sat.set_microphone(Arc::new(TestMic));
        sat.set_sound(Arc::new(RecordingSound::default()));
    });
    let mut reader = ts.connect();

    // Idle: mic data is dropped.
    ts.sat.mic_write_data(&pcm);
    expect_silence(&mut reader);

    send(&reader, Event::new("run-satellite"));
    let (header, data, _) = read_event(&mut reader);
    assert_eq!(header["type"], "run-pipeline");
    let data = data.unwrap();
    assert_eq!(data["start_stage"], "wake", "remote wake detection");
    assert_eq!(data["end_stage"], "tts", "speaker is configured");
    assert_eq!(data["restart_on_end"], true);

    // Streaming: mic data goes out as audio-chunk.
    ts.sat.mic_write_data(&pcm);
    let (header, data, payload) = read_event(&mut reader);
    assert_eq!(header["type"], "audio-chunk");
    let data = data.unwrap();
    assert_eq!(data["rate"], 16_000);
    assert_eq!(data["width"], 2);
    assert_eq!(data["channels"], 1);
    assert!(data["timestamp"].is_u64());
    assert_eq!(payload, pcm);

    // Paused again: dropped. The pong round-trip fences the pause.
    send(&reader, Event::new("pause-satellite"));
    ping_roundtrip(&mut reader);
    ts.sat.mic_write_data(&pcm);
    expect_silence(&mut reader);

    ts.stop();
}

#[test]
fn wake_stream_detection_starts_pipeline_and_streaming() {
    let pcm = vec![7u8; 640];
    let ts = TestSatellite::start(|sat| {
        sat.set_microphone(Arc::new(TestMic));
        sat.set_wake(Arc::new(TestWake { model: "hey-rust".to_string() }));
    });
    let mut reader = ts.connect();

    // Idle mic data feeds the detector, not the wire.
    ts.sat.mic_write_data(&pcm);
    expect_silence(&mut reader);

    ts.sat.wake_detection();
    let (header, data, _) = read_event(&mut reader);
    assert_eq!(header["type"], "detection");
    assert_eq!(header["version"], "1.5.2");
    let data = data.unwrap();
    assert_eq!(data["name"], "hey-rust");
    assert!(data["timestamp"].is_u64());

    let (header, data, _) = read_event(&mut reader);
    assert_eq!(header["type"], "run-pipeline");
    let data = data.unwrap();
    assert_eq!(data["start_stage"], "asr", "wake word already detected locally");
    assert_eq!(data["end_stage"], "handle", "no speaker configured");
    assert_eq!(data["restart_on_end"], false);

    // Now streaming.
    ts.sat.mic_write_data(&pcm);
    let (header, _, payload) = read_event(&mut reader);
    assert_eq!(header["type"], "audio-chunk");
    assert_eq!(payload, pcm);

    // A second detection while streaming is suppressed.
    ts.sat.wake_detection();
    expect_silence(&mut reader);

    // Transcript ends the exchange; back to idle.
    send(&reader, Event::new("transcript"));
    ping_roundtrip(&mut reader);
    ts.sat.mic_write_data(&pcm);
    expect_silence(&mut reader);

    ts.stop();
}

#[test]
fn playback_events_reach_the_sound_component() {
    let snd = Arc::new(RecordingSound::default());
    let ts = TestSatellite::start({
        let snd = snd.clone();
        move |sat| {
            sat.set_microphone(Arc::new(TestMic));
            sat.set_sound(snd);
        }
    });
    let mut reader = ts.connect();

    let mut start = Event::new("audio-start");
    start.data = Some(json!({"rate": 22050, "width": 2, "channels": 1}));
    send(&reader, start);

    let mut chunk = Event::new("audio-chunk");
    chunk.data = Some(json!({"rate": 22050, "width": 2, "channels": 1, "timestamp": 0}));
    chunk.payload = Some(vec![9u8; 1024]);
    send(&reader, chunk);

    send(&reader, Event::new("audio-stop"));
    ping_roundtrip(&mut reader);

    // The payload may reach the decoder in one or several chunks
    // depending on how TCP segments it; only the total is fixed.
    let log = snd.log.lock();
    assert_eq!(log.first().map(String::as_str), Some("start 22050/2/1"));
    assert_eq!(log.last().map(String::as_str), Some("end"));
    let data_bytes: usize = log[1..log.len() - 1]
        .iter()
        .map(|entry| {
            entry
                .strip_prefix("data ")
                .expect("only data entries between start and end")
                .parse::<usize>()
                .unwrap()
        })
        .sum();
    assert_eq!(data_bytes, 1024);
    drop(log);

    ts.stop();
}

#[test]
fn codec_survives_roundtrip_through_decoder() {
    let mut event = Event::new("audio-chunk");
    event.data = Some(json!({"rate": 16000, "width": 2, "channels": 1, "timestamp": 1234}));
    let payload: Vec<u8> = (0..4500u32).map(|i| (i % 251) as u8).collect();
    event.payload = Some(payload.clone());
    let frame = event.encode().unwrap();

    let mut dec = EventDecoder::new();
    let mut fed = 0;
    let mut events = 0;
    let mut assembled = Vec::new();
    let mut data_seen = None;
    while fed < frame.len() {
        let writable = dec.writable();
        let n = writable.len().min(frame.len() - fed);
        writable[..n].copy_from_slice(&frame[fed..fed + n]);
        dec.advance(n);
        fed += n;
        while let Some(evt) = dec.next() {
            if evt.is_begin() {
                events += 1;
                assert_eq!(evt.header.event_type, "audio-chunk");
                data_seen = evt.data.cloned();
            }
            if let Some(chunk) = evt.payload {
                assert_eq!(chunk.offset, assembled.len());
                assembled.extend_from_slice(chunk.data);
            }
        }
    }
    assert_eq!(events, 1);
    assert_eq!(assembled, payload);
    assert_eq!(data_seen.unwrap()["timestamp"], 1234);
}

#[test]
fn concurrent_senders_do_not_interleave_frames() {
    const SENDERS: usize = 8;
    const EVENTS_PER_SENDER: usize = 10;

    let ts = TestSatellite::start(|sat| {
        sat.set_microphone(Arc::new(TestMic));
    });
    let reader = ts.connect();

    let mut workers = Vec::new();
    for i in 0..SENDERS {
        let sat = ts.sat.clone();
        workers.push(thread::spawn(move || {
            for j in 0..EVENTS_PER_SENDER {
                let mut event = Event::new("concurrent");
                event.data = Some(json!({"sender": i, "seq": j}));
                // Small payloads: everything must fit in the socket
                // buffers, the reader only starts after the join.
                event.payload = Some(vec![(i * 16 + j) as u8; 120]);
                sat.send_event(event).expect("send while connected");
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let mut stream = reader.into_inner();
    let mut dec = EventDecoder::new();
    let mut seen = 0usize;
    let mut current: Option<(u8, usize)> = None; // (expected byte, collected)
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen < SENDERS * EVENTS_PER_SENDER {
        assert!(Instant::now() < deadline, "only {} events arrived", seen);
        let n = match stream.read(dec.writable()) {
            Ok(n) => n,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => panic!("read: {}", e),
        };
        assert!(n > 0, "peer closed early");
        dec.advance(n);
        while let Some(evt) = dec.next() {
            if evt.is_begin() {
                assert_eq!(evt.header.event_type, "concurrent");
                let data = evt.data.expect("data section");
                let sender = data["sender"].as_u64().unwrap() as usize;
                let seq = data["seq"].as_u64().unwrap() as usize;
                current = Some(((sender * 16 + seq) as u8, 0));
            }
            if let Some(chunk) = evt.payload {
                let entry = current.as_mut().unwrap();
                assert!(
                    chunk.data.iter().all(|b| *b == entry.0),
                    "payload bytes from a different event interleaved"
                );
                entry.1 += chunk.data.len();
            }
            if evt.is_end() {
                let (_, collected) = current.take().unwrap();
                assert_eq!(collected, 120);
                seen += 1;
            }
        }
    }

    ts.stop();
}

#[test]
fn stop_unblocks_run_and_allows_reconnect_cycles() {
    let ts = TestSatellite::start(|sat| {
        sat.set_microphone(Arc::new(TestMic));
    });

    // First client comes and goes; the satellite re-accepts.
    let mut reader = ts.connect();
    ping_roundtrip(&mut reader);
    drop(reader);
    let deadline = Instant::now() + Duration::from_secs(5);
    while ts.sat.is_connected() {
        assert!(Instant::now() < deadline, "disconnect not observed");
        thread::sleep(Duration::from_millis(10));
    }

    let mut reader = ts.connect();
    ping_roundtrip(&mut reader);

    let started = Instant::now();
    ts.stop();
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "stop should unblock run within a few poll intervals"
    );
}
