//! Error types for sdrlink.
//!
//! All fallible operations across the engine return [`Result<T>`], which
//! uses [`Error`] as the error type. Most protocol faults never reach a
//! caller: the engine logs and drops malformed lines and datagrams, and
//! turns transport failures into a disconnect. The variants below surface
//! from the pure parsers and from the few operations a caller drives
//! directly (connect, remove, awaited commands).

/// The error type for all sdrlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket, UDP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed reply line, short VITA-49 preamble).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a reply from the radio.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to an engine operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Every connection attempt to the radio failed.
    #[error("connect failed after {attempts} attempts")]
    ConnectFailed {
        /// How many attempts were made before giving up.
        attempts: u32,
    },

    /// The operation was refused in the current state, e.g. removing a
    /// radio that is in the middle of a firmware update.
    #[error("refused: {0}")]
    Refused(String),

    /// No connection to the radio has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the radio was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
