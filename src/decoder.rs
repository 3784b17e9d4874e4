//! Streaming event decoder.
//!
//! Turns an adversarial TCP byte stream into framed events. Input may be
//! arbitrarily segmented, contain junk between events, or end mid-event;
//! the decoder never blocks and never allocates a payload buffer per
//! event, delivering payloads in chunks capped at the staging buffer
//! size instead.
//!
//! Usage is pull-based: the transport writes into [`EventDecoder::writable`],
//! commits with [`EventDecoder::advance`], then drains with
//! [`EventDecoder::next`] until it returns `None`.

use crate::protocol::{DECODER_BUFFER_SIZE, MAX_PAYLOAD_LENGTH};
use serde_json::Value;
use tracing::{debug, warn};

// ═══════════════════════════════════════════════════════════════════════
//  Decoded records
// ═══════════════════════════════════════════════════════════════════════

/// Record opens an event (first record emitted for it).
pub const FLAG_BEGIN: u8 = 0x01;
/// Record carries a payload chunk.
pub const FLAG_PAYLOAD: u8 = 0x02;
/// Record completes an event; header/data are released afterwards.
pub const FLAG_END: u8 = 0x04;

/// Parsed header of an in-flight event.
#[derive(Debug, Clone)]
pub struct EventHeader {
    /// The mandatory `type` field.
    pub event_type: String,
    /// Declared length of the data section (0 when absent).
    pub data_length: usize,
    /// Declared length of the binary payload (0 when absent).
    pub payload_length: usize,
    /// The full header object.
    pub json: Value,
    /// Legacy inline form: a `data` object embedded in the header.
    pub inline_data: Option<Value>,
}

/// One payload chunk. `offset` is the number of payload bytes delivered
/// by earlier records of the same event; chunks are contiguous and cover
/// `[0, payload_length)` exactly once.
#[derive(Debug, Clone, Copy)]
pub struct PayloadChunk<'a> {
    pub offset: usize,
    pub data: &'a [u8],
}

/// One decoded record, borrowed from the decoder.
///
/// Header-only and header+data events produce a single BEGIN|END record.
/// Events with a payload produce one record per chunk; header and data
/// are shared across them. Everything borrowed here is valid only until
/// the next decoder call; copy the payload to retain it.
#[derive(Debug)]
pub struct DecodedEvent<'a> {
    pub flags: u8,
    pub header: &'a EventHeader,
    pub data: Option<&'a Value>,
    pub payload: Option<PayloadChunk<'a>>,
}

impl DecodedEvent<'_> {
    #[inline]
    pub fn is_begin(&self) -> bool {
        (self.flags & FLAG_BEGIN) != 0
    }

    #[inline]
    pub fn is_end(&self) -> bool {
        (self.flags & FLAG_END) != 0
    }

    #[inline]
    pub fn has_payload(&self) -> bool {
        (self.flags & FLAG_PAYLOAD) != 0
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Decoder state machine
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Header,
    Data,
    Payload,
}

#[derive(Debug)]
struct WipEvent {
    header: EventHeader,
    data: Option<Value>,
}

/// Streaming decoder with a fixed-capacity staging buffer.
///
/// The buffer is compacted (consumed bytes moved out of the head) on
/// every [`next`](EventDecoder::next) call, so at most
/// [`DECODER_BUFFER_SIZE`] bytes are ever retained.
#[derive(Debug)]
pub struct EventDecoder {
    state: DecoderState,
    buf: Box<[u8; DECODER_BUFFER_SIZE]>,
    len: usize,
    payload_buf: Box<[u8; DECODER_BUFFER_SIZE]>,
    payload_received: usize,
    wip: Option<WipEvent>,
    /// The previous record carried END; the finished event is dropped on
    /// the next call so the emitted borrow stays valid meanwhile.
    end_emitted: bool,
}

impl Default for EventDecoder {
    fn default() -> Self {
        EventDecoder::new()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle.as_slice())
}

impl EventDecoder {
    pub fn new() -> EventDecoder {
        EventDecoder {
            state: DecoderState::Header,
            buf: Box::new([0; DECODER_BUFFER_SIZE]),
            len: 0,
            payload_buf: Box::new([0; DECODER_BUFFER_SIZE]),
            payload_received: 0,
            wip: None,
            end_emitted: false,
        }
    }

    /// Reset to the initial state; called on every new connection.
    pub fn reset(&mut self) {
        self.state = DecoderState::Header;
        self.len = 0;
        self.payload_received = 0;
        self.wip = None;
        self.end_emitted = false;
    }

    /// Writable slice at the buffer tail for the transport to read into.
    pub fn writable(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.buf[len..]
    }

    /// Commit `n` bytes previously written into [`writable`](Self::writable).
    pub fn advance(&mut self, n: usize) {
        assert!(
            self.len + n <= DECODER_BUFFER_SIZE,
            "advance past decoder buffer capacity"
        );
        self.len += n;
    }

    /// Clear the buffer and any in-progress event. The one unrecoverable
    /// situation is a data section that turned out not to be JSON: the
    /// byte stream gives no resync point inside it.
    fn scratch_everything(&mut self) -> Option<DecodedEvent<'_>> {
        self.wip = None;
        self.len = 0;
        self.payload_received = 0;
        self.state = DecoderState::Header;
        None
    }

    /// Produce the next decoded record, or `None` when more bytes are
    /// needed. At most one record is emitted per call.
    pub fn next(&mut self) -> Option<DecodedEvent<'_>> {
        if self.end_emitted {
            self.end_emitted = false;
            self.wip = None;
            self.payload_received = 0;
        }

        let mut flags: u8 = 0;
        let mut processed: usize = 0;
        let mut ready = false;
        let mut chunk: Option<(usize, usize)> = None; // (offset, size)

        'process: while processed < self.len {
            match self.state {
                // ── HEADER: hunt for `{"` .. `}\n`, parse strictly ────
                DecoderState::Header => {
                    let window_len = self.len - processed;
                    if window_len < 2 {
                        break 'process;
                    }
                    let window = &self.buf[processed..self.len];
                    let rel_start = match find(window, b"{\"") {
                        Some(pos) => pos,
                        None => {
                            // A lone `{` at the very end may be a header
                            // start split across reads; keep just it.
                            if window[window_len - 1] == b'{' {
                                processed += window_len - 1;
                                break 'process;
                            }
                            return self.scratch_everything();
                        }
                    };
                    let start = processed + rel_start;

                    let rel_end = match find(&self.buf[start..self.len], b"}\n") {
                        Some(pos) => pos,
                        None => {
                            let candidate_len = self.len - start;
                            if candidate_len + 2 > DECODER_BUFFER_SIZE {
                                debug!("oversized or invalid header, dropping buffer");
                                return self.scratch_everything();
                            }
                            // Drop junk ahead of the candidate and wait.
                            processed = start;
                            break 'process;
                        }
                    };
                    let header_size = rel_end + 2;
                    let candidate = &self.buf[start..start + header_size];

                    // Strict parse: the JSON value must consume exactly
                    // everything before the `\n`, otherwise we found a
                    // look-alike (`{json}{json}\n`) and skip what parsed.
                    let mut stream =
                        serde_json::Deserializer::from_slice(candidate).into_iter::<Value>();
                    let parsed = stream.next();
                    let consumed = stream.byte_offset();
                    let json = match parsed {
                        Some(Ok(value)) if consumed == header_size - 1 => value,
                        _ => {
                            debug!("failed to parse event header");
                            processed = start + consumed.max(1);
                            continue 'process;
                        }
                    };

                    let event_type = match json.get("type").and_then(Value::as_str) {
                        Some(t) => t.to_string(),
                        None => {
                            debug!("event header is missing a string type");
                            processed = start + header_size;
                            continue 'process;
                        }
                    };

                    let data_length = match json.get("data_length") {
                        None => 0,
                        Some(v) => match v.as_u64() {
                            Some(n) if n as usize <= DECODER_BUFFER_SIZE => n as usize,
                            _ => {
                                warn!(declared = %v, "data length invalid or too big");
                                processed = start + header_size;
                                continue 'process;
                            }
                        },
                    };
                    let payload_length = match json.get("payload_length") {
                        None => 0,
                        Some(v) => match v.as_u64() {
                            Some(n) if n as usize <= MAX_PAYLOAD_LENGTH => n as usize,
                            _ => {
                                warn!(declared = %v, "payload length invalid or too big");
                                processed = start + header_size;
                                continue 'process;
                            }
                        },
                    };

                    let inline_data = json.get("data").filter(|d| d.is_object()).cloned();

                    self.wip = Some(WipEvent {
                        header: EventHeader {
                            event_type,
                            data_length,
                            payload_length,
                            json,
                            inline_data,
                        },
                        data: None,
                    });
                    processed = start + header_size;
                    flags |= FLAG_BEGIN;

                    if data_length > 0 {
                        self.state = DecoderState::Data;
                    } else if payload_length > 0 {
                        self.state = DecoderState::Payload;
                    } else {
                        flags |= FLAG_END;
                        ready = true;
                        break 'process;
                    }
                }

                // ── DATA: exactly `data_length` bytes of one JSON object ─
                DecoderState::Data => {
                    let (data_length, payload_length) = match &self.wip {
                        Some(wip) => (wip.header.data_length, wip.header.payload_length),
                        None => return self.scratch_everything(),
                    };
                    if self.buf[processed] != b'{' {
                        debug!("event data is not a JSON object");
                        return self.scratch_everything();
                    }
                    if self.len - processed < data_length {
                        break 'process;
                    }
                    if self.buf[processed + data_length - 1] != b'}' {
                        debug!("event data is not a JSON object");
                        return self.scratch_everything();
                    }
                    match serde_json::from_slice::<Value>(
                        &self.buf[processed..processed + data_length],
                    ) {
                        Ok(data) => {
                            if let Some(wip) = self.wip.as_mut() {
                                wip.data = Some(data);
                            }
                            processed += data_length;
                            flags |= FLAG_BEGIN;
                            if payload_length > 0 {
                                self.state = DecoderState::Payload;
                            } else {
                                flags |= FLAG_END;
                                ready = true;
                                break 'process;
                            }
                        }
                        Err(e) => {
                            // The declared span is not one JSON value;
                            // drop the event, skip the span, resync on
                            // whatever follows.
                            debug!(error = %e, "failed to parse event data");
                            self.wip = None;
                            processed += data_length;
                            self.state = DecoderState::Header;
                        }
                    }
                }

                // ── PAYLOAD: copy through the staging buffer, chunked ──
                DecoderState::Payload => {
                    let payload_length = match &self.wip {
                        Some(wip) => wip.header.payload_length,
                        None => return self.scratch_everything(),
                    };
                    let avail = self.len - processed;
                    let left = payload_length - self.payload_received;
                    let size = left.min(avail);
                    self.payload_buf[..size]
                        .copy_from_slice(&self.buf[processed..processed + size]);
                    chunk = Some((self.payload_received, size));
                    if self.payload_received == 0 {
                        flags |= FLAG_BEGIN;
                    }
                    flags |= FLAG_PAYLOAD;
                    self.payload_received += size;
                    processed += size;
                    ready = true;
                    if self.payload_received == payload_length {
                        flags |= FLAG_END;
                    }
                    break 'process;
                }
            }
        }

        // Compact consumed bytes out of the buffer head.
        if processed > 0 && processed < self.len {
            self.buf.copy_within(processed..self.len, 0);
        }
        self.len -= processed;

        if !ready {
            return None;
        }
        if (flags & FLAG_END) != 0 {
            self.state = DecoderState::Header;
            self.end_emitted = true;
        }

        let wip = self.wip.as_ref()?;
        Some(DecodedEvent {
            flags,
            header: &wip.header,
            data: wip.data.as_ref().or(wip.header.inline_data.as_ref()),
            payload: chunk.map(|(offset, size)| PayloadChunk {
                offset,
                data: &self.payload_buf[..size],
            }),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
