//! LAN discovery announcements.
//!
//! Radios broadcast VITA-49 packets with class code `0xFFFF` to UDP port
//! 4992. The payload is whitespace-separated `key=value` text describing the
//! radio. This module turns those datagrams into [`RadioRecord`]s and
//! exposes them through the [`AnnouncementSource`] trait, which the
//! [`DiscoveryRegistry`](crate::registry::DiscoveryRegistry) consumes.
//!
//! # Usage
//!
//! ```no_run
//! use sdrlink_flex::discovery;
//! use std::time::Duration;
//!
//! # async fn example() -> sdrlink_core::Result<()> {
//! let radios = discovery::discover(Duration::from_secs(3)).await?;
//! for radio in &radios {
//!     println!("{} ({}) at {}:{}", radio.model, radio.serial, radio.ip, radio.port);
//! }
//! # Ok(())
//! # }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use sdrlink_core::{Error, ProtocolVersion, Result};
use sdrlink_transport::UdpTransport;
use sdrlink_transport::udp::{DISCOVERY_PORT, MAX_DATAGRAM_SIZE};
use tokio::sync::mpsc;

use crate::codec::key_values;
use crate::vita49::{self, FLEX_OUI, PacketClass};

/// Default TCP command port.
pub const DEFAULT_COMMAND_PORT: u16 = 4992;

/// A radio discovered on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioRecord {
    /// Address the radio announced (or the datagram source).
    pub ip: IpAddr,
    /// TCP command port.
    pub port: u16,
    pub serial: String,
    /// Model name, e.g. `FLEX-6600`.
    pub model: String,
    pub nickname: String,
    pub callsign: String,
    /// Firmware version as announced.
    pub version: ProtocolVersion,
    pub discovery_protocol_version: ProtocolVersion,
    /// Radio-reported status, e.g. `Available` or `In_Use`.
    pub status: String,
    pub inuse_ip: String,
    pub inuse_host: String,
    /// Registry clock reading when this radio was last announced.
    pub last_seen: Duration,
    /// A firmware update is in progress. Updating radios are never evicted.
    pub updating: bool,
}

impl RadioRecord {
    /// An empty record at `ip`, every other field defaulted.
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            port: DEFAULT_COMMAND_PORT,
            serial: String::new(),
            model: String::new(),
            nickname: String::new(),
            callsign: String::new(),
            version: ProtocolVersion::default(),
            discovery_protocol_version: ProtocolVersion::default(),
            status: String::new(),
            inuse_ip: String::new(),
            inuse_host: String::new(),
            last_seen: Duration::ZERO,
            updating: false,
        }
    }

    pub fn key(&self) -> RadioKey {
        RadioKey {
            ip: self.ip,
            serial: self.serial.clone(),
        }
    }

    /// Whether `other` describes the same radio: same address, model and serial.
    pub fn same_radio(&self, other: &RadioRecord) -> bool {
        self.ip == other.ip && self.model == other.model && self.serial == other.serial
    }

    /// Command endpoint for the control connection.
    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl std::fmt::Display for RadioRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {} ({})", self.ip, self.model, self.serial, self.version)
    }
}

/// Identity of a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RadioKey {
    pub ip: IpAddr,
    pub serial: String,
}

/// Parse a discovery payload into a record.
///
/// Keys are matched case-insensitively. Unknown keys are ignored; values
/// that fail to parse leave the field at its default. A missing `ip` falls
/// back to `source`.
pub fn parse_announcement(payload: &str, source: IpAddr) -> RadioRecord {
    let mut record = RadioRecord::new(source);
    let text = payload.replace('\0', "");

    for (key, value) in key_values(&text, "discovery") {
        match key.to_ascii_lowercase().as_str() {
            "callsign" => record.callsign = value.to_string(),
            "discovery_protocol_version" => match value.parse() {
                Ok(v) => record.discovery_protocol_version = v,
                Err(_) => tracing::debug!(value = %value, "Invalid discovery protocol version"),
            },
            "inuse_host" => record.inuse_host = value.to_string(),
            "inuse_ip" => record.inuse_ip = value.to_string(),
            "ip" => match value.parse() {
                Ok(ip) => record.ip = ip,
                Err(_) => tracing::debug!(value = %value, "Invalid discovery ip"),
            },
            "model" => record.model = value.to_string(),
            "nickname" => record.nickname = value.to_string(),
            "port" => match value.parse() {
                Ok(port) => record.port = port,
                Err(_) => tracing::debug!(value = %value, "Invalid discovery port"),
            },
            "serial" => record.serial = value.chars().filter(|c| !c.is_control()).collect(),
            "status" => record.status = value.to_string(),
            "version" => match value.parse() {
                Ok(v) => record.version = v,
                Err(_) => tracing::debug!(value = %value, "Invalid firmware version"),
            },
            _ => {}
        }
    }

    record
}

/// Parse a raw UDP datagram as a discovery announcement.
///
/// The datagram must carry the vendor OUI and the discovery class code.
pub fn parse_discovery_datagram(data: &[u8], source: IpAddr) -> Result<RadioRecord> {
    let preamble = vita49::parse_preamble(data)?;

    if preamble.oui != FLEX_OUI {
        return Err(Error::Protocol(format!(
            "discovery packet OUI 0x{:06X} is not the vendor OUI",
            preamble.oui
        )));
    }
    if preamble.class() != PacketClass::Discovery {
        return Err(Error::Protocol("not a discovery packet".into()));
    }

    let payload = String::from_utf8_lossy(preamble.payload(data));
    Ok(parse_announcement(payload.trim(), source))
}

/// Something that yields discovery announcements.
///
/// The registry does not own the discovery socket; it only consumes
/// records from a source. `None` means the source is exhausted.
#[async_trait]
pub trait AnnouncementSource: Send {
    async fn next_announcement(&mut self) -> Option<RadioRecord>;
}

#[async_trait]
impl AnnouncementSource for mpsc::Receiver<RadioRecord> {
    async fn next_announcement(&mut self) -> Option<RadioRecord> {
        self.recv().await
    }
}

/// Discovery broadcast listener on a UDP port.
pub struct DiscoveryListener {
    transport: UdpTransport,
    buf: Vec<u8>,
}

impl DiscoveryListener {
    /// Listen on the standard discovery port.
    pub async fn bind() -> Result<Self> {
        Self::bind_port(DISCOVERY_PORT).await
    }

    /// Listen on a specific port. Tests use an ephemeral one.
    pub async fn bind_port(port: u16) -> Result<Self> {
        let transport = UdpTransport::bind_port(port).await?;
        tracing::debug!(port = port, "Listening for discovery broadcasts");
        Ok(Self {
            transport,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }
}

#[async_trait]
impl AnnouncementSource for DiscoveryListener {
    async fn next_announcement(&mut self) -> Option<RadioRecord> {
        loop {
            let (n, src) = match self.transport.recv_from(&mut self.buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::trace!(error = %e, "Discovery recv error");
                    continue;
                }
            };

            match parse_discovery_datagram(&self.buf[..n], src.ip()) {
                Ok(record) => {
                    tracing::trace!(
                        model = %record.model,
                        serial = %record.serial,
                        ip = %record.ip,
                        "Discovery announcement"
                    );
                    return Some(record);
                }
                Err(e) => tracing::trace!(src = %src, error = %e, "Ignoring datagram on discovery port"),
            }
        }
    }
}

/// Listen on the standard port for `timeout` and return every radio heard.
///
/// Radios are deduplicated by address and serial.
pub async fn discover(timeout: Duration) -> Result<Vec<RadioRecord>> {
    discover_on_port(DISCOVERY_PORT, timeout).await
}

/// [`discover`] on a specific port.
pub async fn discover_on_port(port: u16, timeout: Duration) -> Result<Vec<RadioRecord>> {
    let mut listener = DiscoveryListener::bind_port(port).await?;
    let mut radios: Vec<RadioRecord> = Vec::new();

    let deadline = tokio::time::Instant::now() + timeout;
    while let Ok(Some(record)) =
        tokio::time::timeout_at(deadline, listener.next_announcement()).await
    {
        if !radios.iter().any(|r| r.key() == record.key()) {
            radios.push(record);
        }
    }

    tracing::debug!(count = radios.len(), "Discovery complete");
    Ok(radios)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrlink_test_harness::vita;
    use std::net::Ipv4Addr;

    const SAMPLE: &str = "discovery_protocol_version=3.0.0.1 model=FLEX-6600 serial=1234-5678-6600-0001 \
        version=3.3.32.8203 nickname=Shack callsign=N0CALL ip=192.168.1.50 port=4992 \
        status=Available inuse_ip= inuse_host=";

    fn src() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9))
    }

    #[test]
    fn parse_full_announcement() {
        let r = parse_announcement(SAMPLE, src());
        assert_eq!(r.model, "FLEX-6600");
        assert_eq!(r.serial, "1234-5678-6600-0001");
        assert_eq!(r.nickname, "Shack");
        assert_eq!(r.callsign, "N0CALL");
        assert_eq!(r.ip, "192.168.1.50".parse::<IpAddr>().unwrap());
        assert_eq!(r.port, 4992);
        assert_eq!(r.status, "Available");
        assert_eq!(r.version, ProtocolVersion::new(3, 3, 32, 8203));
        assert_eq!(r.discovery_protocol_version, ProtocolVersion::new(3, 0, 0, 1));
        assert!(!r.updating);
    }

    #[test]
    fn missing_ip_falls_back_to_source() {
        let r = parse_announcement("model=FLEX-6400 serial=42", src());
        assert_eq!(r.ip, src());
        assert_eq!(r.port, DEFAULT_COMMAND_PORT);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let r = parse_announcement("ip=not-an-ip port=99999 version=x.y serial=7 junk", src());
        assert_eq!(r.ip, src());
        assert_eq!(r.port, DEFAULT_COMMAND_PORT);
        assert_eq!(r.version, ProtocolVersion::default());
        assert_eq!(r.serial, "7");
    }

    #[test]
    fn keys_are_case_insensitive_and_nul_stripped() {
        let r = parse_announcement("MODEL=FLEX-8600\0\0 Serial=99\0", src());
        assert_eq!(r.model, "FLEX-8600");
        assert_eq!(r.serial, "99");
    }

    #[test]
    fn datagram_round_trip() {
        let pkt = vita::discovery_packet(SAMPLE);
        let r = parse_discovery_datagram(&pkt, src()).unwrap();
        assert_eq!(r.model, "FLEX-6600");
        assert_eq!(r.inuse_host, "");
    }

    #[test]
    fn datagram_wrong_class_or_oui_rejected() {
        let meter = vita::meter_packet(0, &[(1, 1)]);
        assert!(parse_discovery_datagram(&meter, src()).is_err());

        let foreign = vita::VitaPacket::new(vita::CLASS_DISCOVERY, vita::DISCOVERY_STREAM_ID)
            .oui(0x00_0001)
            .payload(b"model=X serial=1")
            .build();
        assert!(parse_discovery_datagram(&foreign, src()).is_err());
    }

    #[tokio::test]
    async fn channel_source_yields_records() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(parse_announcement(SAMPLE, src())).await.unwrap();
        drop(tx);
        assert!(rx.next_announcement().await.is_some());
        assert!(rx.next_announcement().await.is_none());
    }

    #[tokio::test]
    async fn listener_receives_loopback_announcement() {
        let mut listener = DiscoveryListener::bind_port(0).await.unwrap();
        let port = listener.local_addr().port();

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(b"garbage", ("127.0.0.1", port))
            .await
            .unwrap();
        sender
            .send_to(&vita::discovery_packet("model=FLEX-6400 serial=77"), ("127.0.0.1", port))
            .await
            .unwrap();

        let record = tokio::time::timeout(Duration::from_secs(2), listener.next_announcement())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.serial, "77");
        assert_eq!(record.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
