use thiserror::Error;

/// Error kinds surfaced by the Stratum client core.
///
/// `Transport`, `Framing`, and `ProtocolShape` are connection-fatal: the I/O
/// task closes the socket after reporting one of these. `Rpc`, `Timeout`,
/// and `LocalReject` are per-call and leave the connection usable.
/// `OwnerGone` never escapes the crate; it marks the I/O task's own
/// shutdown path when the façade has been dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("unexpected message shape: {0}")]
    ProtocolShape(String),

    #[error("pool returned an error: {0}")]
    Rpc(String),

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("rejected locally: {0}")]
    LocalReject(String),

    #[error("owner dropped the connection")]
    OwnerGone,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Framing(err.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::ProtocolShape(format!("invalid hex: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
