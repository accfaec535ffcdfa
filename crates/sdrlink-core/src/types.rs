//! Core types shared between the engine crates and applications.

use std::fmt;

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle state of a control connection to one radio.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket, no background workers.
    #[default]
    Disconnected,
    /// TCP connect attempts in progress.
    Connecting,
    /// Socket open, read loop and workers running.
    Connected,
    /// Teardown in progress; further disconnect requests are no-ops.
    Disconnecting,
}

impl ConnectionState {
    /// Whether commands can be written in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Remote objects
// ---------------------------------------------------------------------------

/// Identity of a remote object synchronized from status lines.
///
/// Index-keyed kinds carry the small integer the radio assigns; stream-keyed
/// kinds carry the 32-bit stream id that also tags their UDP packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectRef {
    Slice(u8),
    Panadapter(u32),
    Waterfall(u32),
    AudioStream(u32),
    IqStream(u32),
    OpusStream(u32),
    Meter(u16),
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Slice(i) => write!(f, "slice {i}"),
            ObjectRef::Panadapter(id) => write!(f, "panadapter 0x{id:08X}"),
            ObjectRef::Waterfall(id) => write!(f, "waterfall 0x{id:08X}"),
            ObjectRef::AudioStream(id) => write!(f, "audio stream 0x{id:08X}"),
            ObjectRef::IqStream(id) => write!(f, "iq stream 0x{id:08X}"),
            ObjectRef::OpusStream(id) => write!(f, "opus stream 0x{id:08X}"),
            ObjectRef::Meter(id) => write!(f, "meter {id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Network quality
// ---------------------------------------------------------------------------

/// Ordinal link-quality classification, worst to best.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NetworkQuality {
    /// No successful probe (or not yet measured).
    #[default]
    Off,
    Poor,
    Fair,
    Good,
    VeryGood,
    Excellent,
}

impl NetworkQuality {
    /// The next better level, saturating at [`NetworkQuality::Excellent`].
    pub fn better(self) -> Self {
        match self {
            NetworkQuality::Off => NetworkQuality::Poor,
            NetworkQuality::Poor => NetworkQuality::Fair,
            NetworkQuality::Fair => NetworkQuality::Good,
            NetworkQuality::Good => NetworkQuality::VeryGood,
            NetworkQuality::VeryGood | NetworkQuality::Excellent => NetworkQuality::Excellent,
        }
    }

    /// The next worse level, saturating at [`NetworkQuality::Poor`].
    ///
    /// Only a failed probe reaches [`NetworkQuality::Off`].
    pub fn worse(self) -> Self {
        match self {
            NetworkQuality::Off | NetworkQuality::Poor | NetworkQuality::Fair => {
                NetworkQuality::Poor
            }
            NetworkQuality::Good => NetworkQuality::Fair,
            NetworkQuality::VeryGood => NetworkQuality::Good,
            NetworkQuality::Excellent => NetworkQuality::VeryGood,
        }
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkQuality::Off => "OFF",
            NetworkQuality::Poor => "POOR",
            NetworkQuality::Fair => "FAIR",
            NetworkQuality::Good => "GOOD",
            NetworkQuality::VeryGood => "VERY_GOOD",
            NetworkQuality::Excellent => "EXCELLENT",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Radio messages
// ---------------------------------------------------------------------------

/// Severity carried in bits 24-25 of a radio message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl MessageSeverity {
    /// Extract the severity from a message id.
    pub fn from_message_id(id: u32) -> Self {
        match (id >> 24) & 0x3 {
            0 => MessageSeverity::Info,
            1 => MessageSeverity::Warning,
            2 => MessageSeverity::Error,
            _ => MessageSeverity::Fatal,
        }
    }
}

impl fmt::Display for MessageSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageSeverity::Info => "info",
            MessageSeverity::Warning => "warning",
            MessageSeverity::Error => "error",
            MessageSeverity::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}
