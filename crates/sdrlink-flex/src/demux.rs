//! The shared UDP receive surface for every connected radio.
//!
//! Two tasks share one socket's traffic. The receive task copies each
//! datagram into an unbounded channel and goes straight back to the
//! socket. The dispatch task consumes that channel in arrival order,
//! rejects short or foreign datagrams, looks up the sending radio by
//! source address, and hands the datagram to that radio's
//! [`PacketRouter`]. Datagrams from an address with no route are dropped;
//! that happens briefly around connect and teardown.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sdrlink_core::Result;
use sdrlink_transport::UdpTransport;
use sdrlink_transport::udp::{MAX_DATAGRAM_SIZE, VITA_PORT, VITA_PORT_LAST};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::router::PacketRouter;
use crate::vita49::{FLEX_OUI, MIN_PREAMBLE_LEN, parse_preamble};

type RouteTable = Arc<Mutex<HashMap<IpAddr, Arc<PacketRouter>>>>;

/// Demultiplexes VITA-49 datagrams by source address.
pub struct VitaDemux {
    routes: RouteTable,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl VitaDemux {
    /// Bind the first free port in the telemetry range on all interfaces.
    pub async fn bind() -> Result<Arc<Self>> {
        let transport = UdpTransport::bind_in_range("0.0.0.0", VITA_PORT, VITA_PORT_LAST).await?;
        Ok(Self::start(transport))
    }

    /// Bind a specific local address, e.g. `127.0.0.1:0` in tests.
    pub async fn bind_addr(addr: &str) -> Result<Arc<Self>> {
        let transport = UdpTransport::bind(addr).await?;
        Ok(Self::start(transport))
    }

    /// Start the receive and dispatch tasks on an already-bound socket.
    pub fn start(transport: UdpTransport) -> Arc<Self> {
        let local_addr = transport.local_addr();
        let routes: RouteTable = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(receive_loop(transport, tx, cancel.clone()));
        tokio::spawn(dispatch_loop(rx, Arc::clone(&routes), cancel.clone()));

        tracing::debug!(local_addr = %local_addr, "VITA-49 demultiplexer started");
        Arc::new(Self {
            routes,
            local_addr,
            cancel,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Port radios should send telemetry to (`client udpport`).
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Route datagrams from `ip` to `router`. Returns the router it replaced.
    pub fn register(&self, ip: IpAddr, router: Arc<PacketRouter>) -> Option<Arc<PacketRouter>> {
        tracing::debug!(ip = %ip, "Registered telemetry route");
        self.routes.lock().insert(ip, router)
    }

    /// Remove the route for `ip` if it still points at `router`.
    ///
    /// A connection tearing down after a newer one to the same radio
    /// registered leaves the newer route alone.
    pub fn deregister(&self, ip: IpAddr, router: &Arc<PacketRouter>) -> bool {
        let mut routes = self.routes.lock();
        match routes.get(&ip) {
            Some(current) if Arc::ptr_eq(current, router) => {
                routes.remove(&ip);
                tracing::debug!(ip = %ip, "Deregistered telemetry route");
                true
            }
            _ => false,
        }
    }

    pub fn route_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Stop both tasks and release the socket.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for VitaDemux {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn receive_loop(
    transport: UdpTransport,
    tx: mpsc::UnboundedSender<(SocketAddr, Bytes)>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = transport.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    if tx.send((src, Bytes::copy_from_slice(&buf[..len]))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "UDP receive error");
                }
            },
        }
    }
    tracing::debug!("VITA-49 receive task stopped");
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>,
    routes: RouteTable,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some((src, datagram)) => {
                    dispatch_datagram(&routes, src, datagram);
                }
                None => break,
            },
        }
    }
    tracing::debug!("VITA-49 dispatch task stopped");
}

/// Validate one datagram and pass it to the owning radio's router.
fn dispatch_datagram(routes: &RouteTable, src: SocketAddr, datagram: Bytes) -> bool {
    if datagram.len() < MIN_PREAMBLE_LEN {
        tracing::trace!(src = %src, len = datagram.len(), "Datagram shorter than a preamble");
        return false;
    }

    let preamble = match parse_preamble(&datagram) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(src = %src, error = %e, "Dropping datagram");
            return false;
        }
    };

    if preamble.oui != FLEX_OUI {
        tracing::trace!(src = %src, oui = format!("0x{:06X}", preamble.oui), "Foreign OUI");
        return false;
    }

    let router = routes.lock().get(&src.ip()).cloned();
    match router {
        Some(router) => {
            router.route(&preamble, datagram);
            true
        }
        None => {
            tracing::trace!(src = %src, "Datagram from unconnected radio");
            false
        }
    }
}
