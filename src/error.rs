use crate::components::ComponentKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SatelliteError>;

/// Errors surfaced by the satellite core.
///
/// Transient conditions (interrupted syscalls, poll timeouts) and
/// connection drops are handled inside the connection loop and never
/// reach the caller; what remains is fatal to `run` or to a single send.
#[derive(Debug, Error)]
pub enum SatelliteError {
    /// OS-level socket failure that is not a connection drop
    /// (bind, listen, fatal accept, failed send).
    #[error("socket error: {0}")]
    Socket(#[source] std::io::Error),

    /// No server connection is attached, or stop has been requested.
    #[error("satellite is not connected")]
    Disconnected,

    /// An outbound event could not be serialized.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// A component failed to initialize during `run`.
    #[error("{kind:?} component failed to initialize: {source}")]
    ComponentInit {
        kind: ComponentKind,
        #[source]
        source: anyhow::Error,
    },
}
