//! Transmit interlock state from `interlock ...` status lines.

use std::fmt;

use super::{FieldResult, apply_fields, set_flag, set_parsed, set_stream_id};

/// Transmit interlock state machine position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InterlockState {
    #[default]
    None,
    Receive,
    Ready,
    NotReady,
    PttRequested,
    Transmitting,
    TxFault,
    Timeout,
    StuckInput,
    UnkeyRequested,
    Other(String),
}

impl InterlockState {
    pub fn from_status(value: &str) -> Self {
        match value {
            "NONE" => InterlockState::None,
            "RECEIVE" => InterlockState::Receive,
            "READY" => InterlockState::Ready,
            "NOT_READY" => InterlockState::NotReady,
            "PTT_REQUESTED" => InterlockState::PttRequested,
            "TRANSMITTING" => InterlockState::Transmitting,
            "TX_FAULT" => InterlockState::TxFault,
            "TIMEOUT" => InterlockState::Timeout,
            "STUCK_INPUT" => InterlockState::StuckInput,
            "UNKEY_REQUESTED" => InterlockState::UnkeyRequested,
            other => InterlockState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InterlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InterlockState::None => "NONE",
            InterlockState::Receive => "RECEIVE",
            InterlockState::Ready => "READY",
            InterlockState::NotReady => "NOT_READY",
            InterlockState::PttRequested => "PTT_REQUESTED",
            InterlockState::Transmitting => "TRANSMITTING",
            InterlockState::TxFault => "TX_FAULT",
            InterlockState::Timeout => "TIMEOUT",
            InterlockState::StuckInput => "STUCK_INPUT",
            InterlockState::UnkeyRequested => "UNKEY_REQUESTED",
            InterlockState::Other(s) => s,
        };
        f.write_str(s)
    }
}

/// Transmit interlock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interlock {
    pub state: InterlockState,
    pub reason: String,
    /// What keyed the transmitter: `SW`, `MIC`, `ACC`, `RCA`...
    pub source: String,
    pub tx_allowed: bool,
    /// Transmit timeout in milliseconds.
    pub timeout: u32,
    pub tx_delay: u32,
    pub acc_txreq_enable: bool,
    pub rca_txreq_enable: bool,
    pub tx_client_handle: u32,
}

impl Interlock {
    const KIND: &'static str = "interlock";

    /// Apply the remainder of an `interlock` status line.
    ///
    /// Per-band lines (`interlock band 3 ...`) are skipped.
    pub fn apply_status(&mut self, remainder: &str) {
        let first = remainder.split_whitespace().next().unwrap_or("");
        if !first.is_empty() && !first.contains('=') {
            tracing::trace!(sub = first, "Skipping interlock sub-object status");
            return;
        }
        apply_fields(
            Self::KIND,
            crate::codec::key_values(remainder, Self::KIND),
            |k, v| self.apply_field(k, v),
        );
    }

    pub fn apply_field(&mut self, key: &str, value: &str) -> FieldResult {
        let kind = Self::KIND;
        match key {
            "state" => {
                self.state = InterlockState::from_status(value);
                FieldResult::Applied
            }
            "reason" => {
                self.reason = value.to_string();
                FieldResult::Applied
            }
            "source" => {
                self.source = value.to_string();
                FieldResult::Applied
            }
            "tx_allowed" => set_flag(&mut self.tx_allowed, kind, key, value),
            "timeout" => set_parsed(&mut self.timeout, kind, key, value),
            "tx_delay" => set_parsed(&mut self.tx_delay, kind, key, value),
            "acc_txreq_enable" => set_flag(&mut self.acc_txreq_enable, kind, key, value),
            "rca_txreq_enable" => set_flag(&mut self.rca_txreq_enable, kind, key, value),
            "tx_client_handle" => set_stream_id(&mut self.tx_client_handle, kind, key, value),
            _ => FieldResult::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interlock_line() {
        let mut i = Interlock::default();
        i.apply_status("state=TRANSMITTING reason= source=SW tx_allowed=1 tx_client_handle=0x12345678");
        assert_eq!(i.state, InterlockState::Transmitting);
        assert_eq!(i.reason, "");
        assert_eq!(i.source, "SW");
        assert!(i.tx_allowed);
        assert_eq!(i.tx_client_handle, 0x1234_5678);
    }

    #[test]
    fn unknown_state_is_kept() {
        let mut i = Interlock::default();
        i.apply_status("state=AMP_FAULT");
        assert_eq!(i.state, InterlockState::Other("AMP_FAULT".into()));
        assert_eq!(i.state.to_string(), "AMP_FAULT");
    }

    #[test]
    fn band_lines_are_skipped() {
        let mut i = Interlock::default();
        i.apply_status("band 3 tx_allowed=1");
        assert_eq!(i, Interlock::default());
    }
}
