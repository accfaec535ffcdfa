//! # sdrlink -- client protocol engine for networked SDRs
//!
//! `sdrlink` discovers SmartSDR-style radios on the LAN, opens their control
//! connection, and keeps a local model of the radio in sync from status lines
//! and VITA-49 telemetry. It is meant for panadapter displays, loggers and
//! station automation that need the radio's live state without polling.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! sdrlink = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Discover a radio, connect, and print its events:
//!
//! ```no_run
//! use std::time::Duration;
//! use sdrlink::RadioEvent;
//! use sdrlink::flex::{ConnectionBuilder, VitaDemux, discovery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let radios = discovery::discover(Duration::from_secs(3)).await?;
//!     let Some(radio) = radios.into_iter().next() else {
//!         return Ok(());
//!     };
//!
//!     let demux = VitaDemux::bind().await?;
//!     let conn = ConnectionBuilder::new(radio).demux(demux).connect().await?;
//!     let mut events = conn.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if let RadioEvent::MeterUpdated { id, value } = event {
//!             println!("meter {id}: {value}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate               | Purpose                                          |
//! |---------------------|--------------------------------------------------|
//! | `sdrlink-core`      | Errors, [`RadioEvent`], shared types, [`Clock`]  |
//! | `sdrlink-transport` | TCP connect-with-retry, UDP sockets              |
//! | `sdrlink-flex`      | Discovery, connection, dispatch, telemetry       |
//! | **`sdrlink`**       | This facade crate -- re-exports everything       |
//!
//! ## Long-running applications
//!
//! A process that stays up keeps one [`DiscoveryRegistry`](flex::DiscoveryRegistry)
//! fed by a [`DiscoveryListener`](flex::DiscoveryListener), runs its sweeper,
//! and shares a single [`VitaDemux`](flex::VitaDemux) between every
//! connection. Passing the registry to each
//! [`ConnectionBuilder`](flex::ConnectionBuilder) lets radios that go silent
//! be dropped and disconnected automatically.

pub use sdrlink_core::*;

/// The SmartSDR protocol engine.
///
/// Provides [`ConnectionBuilder`](flex::ConnectionBuilder) and
/// [`Connection`](flex::Connection) for the control link, the
/// [`DiscoveryRegistry`](flex::DiscoveryRegistry) for LAN discovery, and the
/// shared [`VitaDemux`](flex::VitaDemux) for telemetry.
pub mod flex {
    pub use sdrlink_flex::*;
}

/// TCP and UDP transports.
pub mod transport {
    pub use sdrlink_transport::*;
}
