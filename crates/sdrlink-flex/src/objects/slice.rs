//! Receiver slices, keyed by slice index.

use sdrlink_core::ObjectRef;

use super::{FieldResult, Requirement, StatusObject, set_flag, set_parsed, set_stream_id};

/// One receiver slice.
///
/// Status form: `slice <index> key=value ...`. The slice is complete once
/// `in_use=1` arrives, and is announced after its panadapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slice {
    pub index: u8,
    pub in_use: bool,
    /// Panadapter stream id this slice is displayed on (0 = none).
    pub pan: u32,
    /// Tuned frequency in MHz.
    pub rf_frequency: f64,
    pub mode: String,
    pub filter_lo: i32,
    pub filter_hi: i32,
    pub rx_ant: String,
    pub tx_ant: String,
    pub active: bool,
    pub tx: bool,
    pub dax: u8,
    pub audio_level: u8,
    pub audio_pan: u8,
    pub audio_mute: bool,
    pub agc_mode: String,
    pub rit_on: bool,
    pub rit_freq: i32,
    pub xit_on: bool,
    pub xit_freq: i32,
    pub lock: bool,
    pub owner: u32,
    pub client_handle: u32,
    full_status: bool,
}

impl StatusObject for Slice {
    type Key = u8;
    const KIND: &'static str = "slice";

    fn create(index: u8) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    fn apply_field(&mut self, key: &str, value: &str) -> FieldResult {
        let kind = Self::KIND;
        match key {
            "in_use" => {
                let result = set_flag(&mut self.in_use, kind, key, value);
                if self.in_use {
                    self.full_status = true;
                }
                result
            }
            "pan" => set_stream_id(&mut self.pan, kind, key, value),
            "RF_frequency" => set_parsed(&mut self.rf_frequency, kind, key, value),
            "mode" => {
                self.mode = value.to_string();
                FieldResult::Applied
            }
            "filter_lo" => set_parsed(&mut self.filter_lo, kind, key, value),
            "filter_hi" => set_parsed(&mut self.filter_hi, kind, key, value),
            "rxant" => {
                self.rx_ant = value.to_string();
                FieldResult::Applied
            }
            "txant" => {
                self.tx_ant = value.to_string();
                FieldResult::Applied
            }
            "active" => set_flag(&mut self.active, kind, key, value),
            "tx" => set_flag(&mut self.tx, kind, key, value),
            "dax" => set_parsed(&mut self.dax, kind, key, value),
            "audio_level" => set_parsed(&mut self.audio_level, kind, key, value),
            "audio_pan" => set_parsed(&mut self.audio_pan, kind, key, value),
            "audio_mute" => set_flag(&mut self.audio_mute, kind, key, value),
            "agc_mode" => {
                self.agc_mode = value.to_string();
                FieldResult::Applied
            }
            "rit_on" => set_flag(&mut self.rit_on, kind, key, value),
            "rit_freq" => set_parsed(&mut self.rit_freq, kind, key, value),
            "xit_on" => set_flag(&mut self.xit_on, kind, key, value),
            "xit_freq" => set_parsed(&mut self.xit_freq, kind, key, value),
            "lock" => set_flag(&mut self.lock, kind, key, value),
            "owner" => set_parsed(&mut self.owner, kind, key, value),
            "client_handle" => set_stream_id(&mut self.client_handle, kind, key, value),
            _ => FieldResult::Unknown,
        }
    }

    fn full_status(&self) -> bool {
        self.full_status
    }

    fn requirement(&self) -> Requirement {
        if self.pan == 0 {
            Requirement::None
        } else {
            Requirement::PanadapterAnnounced(self.pan)
        }
    }

    fn object_ref(key: u8) -> ObjectRef {
        ObjectRef::Slice(key)
    }
}
