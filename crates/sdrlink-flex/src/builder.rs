//! ConnectionBuilder -- fluent builder for [`Connection`] instances.
//!
//! Separates configuration from construction so callers can attach the
//! shared discovery registry and UDP demultiplexer, pick a client name and
//! subscriptions, then open the TCP connection to a discovered radio.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sdrlink_flex::builder::ConnectionBuilder;
//! use sdrlink_flex::demux::VitaDemux;
//! use sdrlink_flex::discovery::RadioRecord;
//!
//! # async fn example(record: RadioRecord) -> sdrlink_core::Result<()> {
//! let demux = VitaDemux::bind().await?;
//! let conn = ConnectionBuilder::new(record)
//!     .client_name("my-logger")
//!     .demux(Arc::clone(&demux))
//!     .connect()
//!     .await?;
//! println!("handle {:?}", conn.handle());
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use sdrlink_core::{Clock, MonotonicClock, RadioEvent, Result};
use sdrlink_transport::TcpTransport;
use sdrlink_transport::tcp::{CONNECT_ATTEMPTS, CONNECT_BACKOFF};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

use crate::config::EngineConfig;
use crate::connection::{ConnectOptions, Connection, EVENT_CHANNEL_CAPACITY, StartParts};
use crate::demux::VitaDemux;
use crate::discovery::RadioRecord;
use crate::quality::RoundTripProbe;
use crate::registry::DiscoveryRegistry;

/// Fluent builder for [`Connection`].
///
/// The simplest usage connects with default options:
///
/// ```ignore
/// let conn = ConnectionBuilder::new(record).connect().await?;
/// ```
pub struct ConnectionBuilder {
    record: RadioRecord,
    options: ConnectOptions,
    registry: Option<Arc<DiscoveryRegistry>>,
    demux: Option<Arc<VitaDemux>>,
    probe: Option<Arc<dyn RoundTripProbe>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<broadcast::Sender<RadioEvent>>,
    connect_attempts: u32,
    connect_backoff: Duration,
}

impl ConnectionBuilder {
    /// Connect to a radio taken from the discovery registry.
    pub fn new(record: RadioRecord) -> Self {
        Self {
            record,
            options: ConnectOptions::default(),
            registry: None,
            demux: None,
            probe: None,
            clock: None,
            events: None,
            connect_attempts: CONNECT_ATTEMPTS,
            connect_backoff: CONNECT_BACKOFF,
        }
    }

    /// Connect to a radio by address, without discovery.
    pub fn host(ip: IpAddr) -> Self {
        Self::new(RadioRecord::new(ip))
    }

    /// Replace all connection options at once.
    pub fn options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the program name sent with `client program` (default: "sdrlink").
    pub fn client_name(mut self, name: &str) -> Self {
        self.options.client_name = name.to_string();
        self
    }

    /// Identify as a GUI client.
    pub fn gui(mut self, gui: bool) -> Self {
        self.options.gui = gui;
        self
    }

    /// Replace the status categories subscribed to after connecting.
    pub fn subscriptions<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.subscriptions = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn auto_subscribe(mut self, enabled: bool) -> Self {
        self.options.auto_subscribe = enabled;
        self
    }

    /// Send `CD` commands so replies carry debug text.
    pub fn verbose_commands(mut self, enabled: bool) -> Self {
        self.options.verbose_commands = enabled;
        self
    }

    /// Override the TCP command port the radio announced.
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.options.tcp_port = Some(port);
        self
    }

    /// UDP port to advertise when no demultiplexer is attached.
    pub fn udp_port(mut self, port: u16) -> Self {
        self.options.udp_port = Some(port);
        self
    }

    pub fn network_monitor(mut self, enabled: bool) -> Self {
        self.options.network_monitor = enabled;
        self
    }

    /// Apply the engine logging switches.
    pub fn engine_config(mut self, config: &EngineConfig) -> Self {
        self.options.log_disconnect = config.log_disconnect;
        self
    }

    /// Attach to the discovery registry so removal and sweeping see this connection.
    pub fn registry(mut self, registry: Arc<DiscoveryRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Receive this radio's telemetry through a shared demultiplexer.
    pub fn demux(mut self, demux: Arc<VitaDemux>) -> Self {
        self.demux = Some(demux);
        self
    }

    /// Replace the round-trip probe used by the network quality monitor.
    pub fn probe(mut self, probe: Arc<dyn RoundTripProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Time source for keepalive liveness (default: monotonic).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Publish events on an existing channel, so subscribers created before
    /// connecting see the handshake's events.
    pub fn events(mut self, events: broadcast::Sender<RadioEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Connection attempts and the pause between them (default: 10 x 1 s).
    pub fn connect_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.connect_attempts = attempts;
        self.connect_backoff = backoff;
        self
    }

    /// Open the TCP connection and run the handshake.
    pub async fn connect(self) -> Result<Connection> {
        let port = self.options.tcp_port.unwrap_or(self.record.port);
        let addr = SocketAddr::new(self.record.ip, port).to_string();
        let transport =
            TcpTransport::connect_with_retry(&addr, self.connect_attempts, self.connect_backoff)
                .await?;
        let (reader, writer) = transport.into_split();
        self.build_with_streams(reader, writer).await
    }

    /// Run the handshake over pre-connected streams, e.g. from
    /// [`tokio::io::duplex()`] in tests.
    pub async fn build_with_streams<R, W>(self, reader: R, writer: W) -> Result<Connection>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let events = self
            .events
            .unwrap_or_else(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        Connection::start(
            reader,
            writer,
            StartParts {
                record: self.record,
                options: self.options,
                registry: self.registry,
                demux: self.demux,
                probe: self.probe,
                clock,
                events,
            },
        )
        .await
    }
}
