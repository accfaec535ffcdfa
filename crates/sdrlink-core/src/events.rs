//! Asynchronous radio event types.
//!
//! Events are emitted by a connection through a [`tokio::sync::broadcast`]
//! channel as the synchronized model changes. Displays and loggers subscribe
//! to these events instead of polling the object registries.

use std::sync::Arc;

use crate::types::{MessageSeverity, NetworkQuality, ObjectRef};
use crate::version::ProtocolVersion;

/// An event emitted by a connection when the radio model changes.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss high-rate events such as FFT frames.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// The control connection is established and the handshake was sent.
    Connected,

    /// The control connection was torn down.
    Disconnected,

    /// The radio assigned this client a handle (`H` line).
    HandleAssigned {
        handle: u32,
    },

    /// The radio reported its protocol version (`V` line).
    ProtocolVersion {
        version: ProtocolVersion,
    },

    /// A free-text message from the radio (`M` line).
    Message {
        /// Raw message id, severity in bits 24-25.
        id: u32,
        severity: MessageSeverity,
        text: String,
    },

    /// A remote object reached its readiness predicate and is now registered.
    ObjectAdded {
        object: ObjectRef,
    },

    /// A registered remote object was removed by the radio or by teardown.
    ObjectRemoved {
        object: ObjectRef,
    },

    /// A meter reading, already scaled to the meter's units.
    MeterUpdated {
        id: u16,
        /// Scaled value (dBm, volts, degrees...).
        value: f32,
    },

    /// A complete FFT frame was assembled for a panadapter.
    PanadapterFrame {
        stream_id: u32,
        frame_index: u32,
        bins: Arc<[u16]>,
    },

    /// A waterfall tile was decoded.
    WaterfallTile {
        stream_id: u32,
        first_pixel_freq: i64,
        bin_bandwidth: i64,
        line_duration_ms: u32,
        width: u16,
        height: u16,
        timecode: u32,
        auto_black_level: u32,
        data: Arc<[u16]>,
    },

    /// The network quality classification changed.
    NetworkQualityChanged {
        quality: NetworkQuality,
        /// Latest round-trip time in milliseconds, or -1 after a failed probe.
        rtt_ms: i64,
    },
}
