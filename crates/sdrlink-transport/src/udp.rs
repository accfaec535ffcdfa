//! UDP transport for VITA-49 telemetry and discovery.
//!
//! Radios send all real-time data (meters, FFT, waterfall, audio, IQ, opus)
//! as VITA-49 datagrams to one client port, and broadcast discovery
//! announcements to a well-known port. [`UdpTransport`] wraps a
//! [`tokio::net::UdpSocket`] for both roles.
//!
//! The telemetry port is chosen with [`UdpTransport::bind_in_range`]: the
//! preferred port is tried first and the next one is tried whenever a bind
//! fails, so several clients on one host each get their own port.
//!
//! # Example
//!
//! ```no_run
//! use sdrlink_transport::UdpTransport;
//! use sdrlink_transport::udp::{VITA_PORT, VITA_PORT_LAST};
//!
//! # async fn example() -> sdrlink_core::Result<()> {
//! let transport = UdpTransport::bind_in_range("0.0.0.0", VITA_PORT, VITA_PORT_LAST).await?;
//! println!("telemetry on port {}", transport.local_addr().port());
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use sdrlink_core::error::{Error, Result};
use tokio::net::UdpSocket;

/// Preferred local port for VITA-49 telemetry.
pub const VITA_PORT: u16 = 4991;

/// Last port tried when the preferred telemetry port is taken.
pub const VITA_PORT_LAST: u16 = 5010;

/// Port radios broadcast discovery announcements to.
pub const DISCOVERY_PORT: u16 = 4992;

/// Largest datagram a VITA-49 packet can occupy.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// UDP transport for datagram-based radio traffic.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local `host:port` address.
    pub async fn bind(addr: &str) -> Result<Self> {
        tracing::debug!(addr = %addr, "Binding UDP socket");

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::debug!(addr = %addr, error = %e, "Failed to bind UDP socket");
            Error::Io(e)
        })?;

        let local_addr = socket.local_addr().map_err(|e| {
            tracing::error!(error = %e, "Failed to get local address");
            Error::Io(e)
        })?;

        tracing::debug!(local_addr = %local_addr, "UDP socket bound");

        Ok(Self { socket, local_addr })
    }

    /// Bind to a specific port on all interfaces.
    pub async fn bind_port(port: u16) -> Result<Self> {
        Self::bind(&format!("0.0.0.0:{}", port)).await
    }

    /// Bind to the first free port in `first..=last` on `host`.
    ///
    /// Returns the last bind error if every port in the range is taken.
    pub async fn bind_in_range(host: &str, first: u16, last: u16) -> Result<Self> {
        if first > last {
            return Err(Error::InvalidParameter(format!(
                "empty port range {first}..={last}"
            )));
        }

        let mut last_err = None;
        for port in first..=last {
            match Self::bind(&format!("{host}:{port}")).await {
                Ok(transport) => return Ok(transport),
                Err(e) => {
                    tracing::debug!(port = port, error = %e, "Port unavailable, trying next");
                    last_err = Some(e);
                }
            }
        }

        tracing::error!(first = first, last = last, "No free UDP port in range");
        Err(last_err.unwrap_or_else(|| {
            Error::Transport(format!("no free UDP port in {first}..={last}"))
        }))
    }

    /// Get the local address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send a datagram to the specified address.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        tracing::trace!(
            local = %self.local_addr,
            remote = %addr,
            bytes = data.len(),
            "Sending datagram"
        );

        self.socket.send_to(data, addr).await.map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                remote = %addr,
                error = %e,
                "Failed to send datagram"
            );
            Error::Io(e)
        })?;

        Ok(())
    }

    /// Wait for the next datagram. Returns `(bytes_read, source_addr)`.
    ///
    /// There is no timeout; receive loops race this against their
    /// cancellation token instead.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let (n, src) = self.socket.recv_from(buf).await.map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                error = %e,
                "Failed to receive datagram"
            );
            Error::Io(e)
        })?;

        tracing::trace!(
            local = %self.local_addr,
            remote = %src,
            bytes = n,
            "Received datagram"
        );
        Ok((n, src))
    }

    /// Receive a datagram, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no datagram arrives within `timeout`.
    pub async fn recv_from_timeout(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<(usize, SocketAddr)> {
        match tokio::time::timeout(timeout, self.recv_from(buf)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::trace!(
                    local = %self.local_addr,
                    timeout_ms = timeout.as_millis(),
                    "Timeout waiting for datagram"
                );
                Err(Error::Timeout)
            }
        }
    }

    /// Enable or disable broadcast on this socket.
    pub fn set_broadcast(&self, enable: bool) -> Result<()> {
        tracing::debug!(local = %self.local_addr, enable = enable, "Setting broadcast");

        self.socket.set_broadcast(enable).map_err(|e| {
            tracing::error!(local = %self.local_addr, error = %e, "Failed to set broadcast");
            Error::Io(e)
        })
    }
}
