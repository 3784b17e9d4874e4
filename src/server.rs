//! Connection lifecycle: a single-client TCP server polled at a fixed
//! interval so a stop request is always observed within one tick.
//!
//! The accept loop owns a non-blocking listener and sleeps between
//! attempts; the read loop uses 250 ms socket timeouts on a blocking
//! stream. Both shapes bound every wait without pipes or signals, which
//! keeps the core portable to embedded targets.

use crate::components::SystemEvent;
use crate::decoder::EventDecoder;
use crate::dispatch;
use crate::error::{Result, SatelliteError};
use crate::satellite::Satellite;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Bound on every blocking wait in the connection loop and the sender.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Outbound writes are cut into chunks of this size so the stop flag is
/// consulted between them.
const SEND_CHUNK_SIZE: usize = 4096;

// ═══════════════════════════════════════════════════════════════════════
//  Error classification
// ═══════════════════════════════════════════════════════════════════════

fn is_retry(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Interrupted
}

fn is_accept_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
    )
}

/// The peer went away; close the client and return to accepting.
/// A socket-timeout tick surfaces as `WouldBlock` and is filtered out
/// before this runs, so `TimedOut` here is a genuine `ETIMEDOUT`.
fn is_conn_drop(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::NetworkDown
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable
    )
}

// ═══════════════════════════════════════════════════════════════════════
//  Listener + accept loop
// ═══════════════════════════════════════════════════════════════════════

fn bind_listener(addr: &SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&(*addr).into())?;
    // Single-client service: one pending connection is plenty.
    socket.listen(1)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Run the accept/read loop until stop is requested or a fatal socket
/// error occurs. Blocks the calling thread.
pub(crate) fn serve(sat: &Satellite) -> Result<()> {
    let addr: SocketAddr = sat
        .config()
        .listen_addr()
        .parse()
        .map_err(|e| SatelliteError::Socket(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    let listener = bind_listener(&addr).map_err(SatelliteError::Socket)?;
    info!(addr = %addr, "satellite listening");

    loop {
        if sat.stop_requested() {
            return Ok(());
        }
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(e) if is_accept_transient(&e) || is_retry(&e) => continue,
            Err(e) => {
                error!(error = %e, "accept failed");
                return Err(SatelliteError::Socket(e));
            }
        };

        debug!(peer = %peer, "client connected");
        if let Err(e) = stream
            .set_read_timeout(Some(POLL_INTERVAL))
            .and_then(|_| stream.set_write_timeout(Some(POLL_INTERVAL)))
        {
            warn!(peer = %peer, error = %e, "failed to arm socket timeouts");
            continue;
        }

        let conn = Arc::new(stream);
        sat.attach_connection(conn.clone());
        sat.dispatch_system_event(&SystemEvent::SatConnect);

        let result = read_loop(sat, &conn);

        sat.detach_connection();
        debug!(peer = %peer, "client disconnected");
        sat.dispatch_system_event(&SystemEvent::SatDisconnect);

        result?;
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Read loop — drive the decoder, dispatch records
// ═══════════════════════════════════════════════════════════════════════

/// `Ok` means "client is gone, go back to accepting"; `Err` is fatal to
/// the whole server loop.
fn read_loop(sat: &Satellite, conn: &Arc<TcpStream>) -> Result<()> {
    let mut decoder = EventDecoder::new();

    loop {
        if sat.stop_requested() {
            return Ok(());
        }

        let n = match (&mut &**conn).read(decoder.writable()) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if is_retry(&e) => continue,
            Err(e) if is_conn_drop(&e) => {
                debug!(error = %e, "connection dropped");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "read failed");
                return Err(SatelliteError::Socket(e));
            }
        };

        decoder.advance(n);
        sat.stats().record_recv(n);

        while let Some(event) = decoder.next() {
            if event.is_begin() {
                debug!(event_type = %event.header.event_type, "event received");
                sat.stats().record_event_received();
            }
            dispatch::handle_event(sat, &event);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  send-all
// ═══════════════════════════════════════════════════════════════════════

/// Write the whole frame, chunked, honoring stop requests. The caller
/// holds the send mutex, so frames from concurrent senders never
/// interleave on the wire.
pub(crate) fn send_all(sat: &Satellite, conn: &TcpStream, mut frame: &[u8]) -> Result<()> {
    while !frame.is_empty() {
        if sat.stop_requested() {
            return Err(SatelliteError::Socket(io::Error::new(
                io::ErrorKind::Interrupted,
                "stop requested mid-send",
            )));
        }

        let chunk = frame.len().min(SEND_CHUNK_SIZE);
        match (&mut &*conn).write(&frame[..chunk]) {
            Ok(0) => {
                return Err(SatelliteError::Socket(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "peer accepted no bytes",
                )))
            }
            Ok(n) => frame = &frame[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if is_retry(&e) => continue,
            Err(e) => return Err(SatelliteError::Socket(e)),
        }
    }
    Ok(())
}
