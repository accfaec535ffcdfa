//! sdrlink-core: Core types, events, and error definitions for sdrlink.
//!
//! This crate holds the pieces every other sdrlink crate agrees on.
//! Applications that only consume events depend on these types without
//! pulling in the protocol engine.
//!
//! # Key types
//!
//! - [`RadioEvent`] -- asynchronous model change notifications
//! - [`ObjectRef`] -- identity of a synchronized remote object
//! - [`ProtocolVersion`] -- packed 64-bit dotted version
//! - [`Clock`] -- monotonic time source, swappable in tests
//! - [`Error`] / [`Result`] -- error handling

pub mod clock;
pub mod error;
pub mod events;
pub mod types;
pub mod version;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{Error, Result};
pub use events::RadioEvent;
pub use types::{ConnectionState, MessageSeverity, NetworkQuality, ObjectRef};
pub use version::ProtocolVersion;
