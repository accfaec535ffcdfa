//! TCP transport for the radio control channel.
//!
//! [`TcpTransport`] opens the newline-framed command/status connection to a
//! radio. Radios that were just announced are sometimes still bringing up
//! their command server, so [`TcpTransport::connect_with_retry`] retries the
//! handshake a fixed number of times before giving up.
//!
//! Once connected, the transport is split into owned read and write halves:
//! the read half feeds the connection's read loop and the write half is
//! shared by every command sender.
//!
//! # Example
//!
//! ```no_run
//! use sdrlink_transport::TcpTransport;
//! use sdrlink_transport::tcp::{CONNECT_ATTEMPTS, CONNECT_BACKOFF};
//!
//! # async fn example() -> sdrlink_core::Result<()> {
//! let transport =
//!     TcpTransport::connect_with_retry("192.168.1.100:4992", CONNECT_ATTEMPTS, CONNECT_BACKOFF)
//!         .await?;
//! let (read_half, write_half) = transport.into_split();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use sdrlink_core::error::{Error, Result};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Number of TCP handshake attempts before a connect fails.
pub const CONNECT_ATTEMPTS: u32 = 10;

/// Delay between failed connect attempts.
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Per-attempt connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// An established TCP control connection.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    /// The address string for logging/debugging.
    addr: String,
}

impl TcpTransport {
    /// Connect once, using the default per-attempt timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect once with an explicit timeout.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!(
            addr = %addr,
            timeout_ms = timeout.as_millis(),
            "Connecting to TCP endpoint"
        );

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                tracing::debug!(addr = %addr, "TCP connection timed out");
                Error::Timeout
            })?
            .map_err(|e| {
                tracing::debug!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, addr)
            })?;

        // Commands are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        tracing::info!(addr = %addr, "TCP connection established");

        Ok(Self {
            stream,
            addr: addr.to_string(),
        })
    }

    /// Connect with up to `attempts` tries, sleeping `backoff` between them.
    ///
    /// Fails with [`Error::ConnectFailed`] only after every attempt failed.
    pub async fn connect_with_retry(addr: &str, attempts: u32, backoff: Duration) -> Result<Self> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match Self::connect(addr).await {
                Ok(transport) => return Ok(transport),
                Err(e) => {
                    tracing::debug!(
                        addr = %addr,
                        attempt = attempt,
                        attempts = attempts,
                        error = %e,
                        "Connect attempt failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        tracing::error!(addr = %addr, attempts = attempts, "Giving up on TCP connect");
        Err(Error::ConnectFailed { attempts })
    }

    /// Wrap an existing `TcpStream`, e.g. one accepted from a listener in tests.
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        tracing::debug!(addr = %addr, "Wrapping existing TCP stream");
        Self { stream, addr }
    }

    /// Get the address string this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Split into owned halves for the read loop and the command writer.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}
