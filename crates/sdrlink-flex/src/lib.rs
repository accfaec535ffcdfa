//! SmartSDR-style client protocol engine for networked SDRs.
//!
//! This crate speaks the control and telemetry protocols of FLEX-6000/8000
//! series radios. It provides:
//!
//! - **Discovery** ([`discovery`], [`registry`]) -- parse VITA-49 discovery
//!   broadcasts and keep a registry of live radios that evicts silent ones.
//! - **Control connection** ([`connection`], [`builder`]) -- the TCP
//!   handshake, `C<seq>|<cmd>` commands correlated to `R<seq>|...` replies
//!   ([`reply`]), and a single, idempotent teardown path.
//! - **Remote objects** ([`objects`], [`dispatch`]) -- slices, panadapters,
//!   waterfalls, DAX/opus streams and meters created and updated by status
//!   lines, announced only once they and their parents are complete.
//! - **Telemetry** ([`demux`], [`router`], [`pipeline`]) -- one UDP socket
//!   shared by every connected radio, demultiplexed by source address and
//!   routed by VITA-49 class code to meter and FFT workers or stream sinks.
//! - **Link health** ([`keepalive`], [`quality`]) -- a ping watchdog that
//!   drops silent links, and a hysteresis-based network quality rating.
//!
//! # Architecture
//!
//! Each radio gets one TCP connection for commands, replies and status, and
//! sends its high-rate data as VITA-49 datagrams to the port advertised with
//! `client udpport`. Status lines are applied on the read task; telemetry is
//! decoded on dedicated worker tasks so a burst of meter packets never
//! delays the control path. Everything the application observes arrives as
//! [`RadioEvent`](sdrlink_core::RadioEvent)s on a broadcast channel.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sdrlink_flex::{ConnectionBuilder, VitaDemux, discovery};
//!
//! # async fn example() -> sdrlink_core::Result<()> {
//! let radios = discovery::discover(Duration::from_secs(3)).await?;
//! if let Some(radio) = radios.into_iter().next() {
//!     let demux = VitaDemux::bind().await?;
//!     let conn = ConnectionBuilder::new(radio).demux(demux).connect().await?;
//!     let mut events = conn.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod codec;
pub mod config;
pub mod connection;
pub mod demux;
pub mod discovery;
pub mod dispatch;
pub mod keepalive;
pub mod objects;
pub mod pipeline;
pub mod quality;
pub mod registry;
pub mod reply;
pub mod router;
pub mod sequence;
pub mod vita49;

pub use builder::ConnectionBuilder;
pub use config::EngineConfig;
pub use connection::{ConnectOptions, Connection, DEFAULT_SUBSCRIPTIONS};
pub use demux::VitaDemux;
pub use discovery::{DiscoveryListener, RadioKey, RadioRecord};
pub use objects::ObjectStore;
pub use quality::RoundTripProbe;
pub use registry::{DiscoveryEvent, DiscoveryRegistry};
