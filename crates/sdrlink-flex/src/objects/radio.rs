//! Radio-wide settings from `radio ...` status lines.

use super::{FieldResult, apply_fields, set_flag, set_parsed};

/// Radio-wide settings.
///
/// Sub-object lines such as `radio filter_sharpness VOICE level=2` or
/// `radio oscillator state=tcxo` start with a bare word and are not
/// modelled; they are skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioSettings {
    pub nickname: String,
    pub callsign: String,
    pub slices: u8,
    pub panadapters: u8,
    pub lineout_gain: u8,
    pub lineout_mute: bool,
    pub headphone_gain: u8,
    pub headphone_mute: bool,
    pub remote_on_enabled: bool,
    pub pll_done: bool,
    pub freq_error_ppb: i32,
    /// Calibration frequency in MHz.
    pub cal_freq: f64,
    pub tnf_enabled: bool,
    pub full_duplex_enabled: bool,
    pub binaural_rx: bool,
    pub band_persistence_enabled: bool,
    pub mute_local_audio_when_remote: bool,
    pub enforce_private_ip_connections: bool,
    pub backlight: u8,
    pub daxiq_capacity: u32,
    pub daxiq_available: u32,
}

impl RadioSettings {
    const KIND: &'static str = "radio";

    /// Apply the remainder of a `radio` status line.
    pub fn apply_status(&mut self, remainder: &str) {
        let first = remainder.split_whitespace().next().unwrap_or("");
        if !first.is_empty() && !first.contains('=') {
            tracing::trace!(sub = first, "Skipping radio sub-object status");
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
            "nickname" => {
                self.nickname = value.to_string();
                FieldResult::Applied
            }
            "callsign" => {
                self.callsign = value.to_string();
                FieldResult::Applied
            }
            "slices" => set_parsed(&mut self.slices, kind, key, value),
            "panadapters" => set_parsed(&mut self.panadapters, kind, key, value),
            "lineout_gain" => set_parsed(&mut self.lineout_gain, kind, key, value),
            "lineout_mute" => set_flag(&mut self.lineout_mute, kind, key, value),
            "headphone_gain" => set_parsed(&mut self.headphone_gain, kind, key, value),
            "headphone_mute" => set_flag(&mut self.headphone_mute, kind, key, value),
            "remote_on_enabled" => set_flag(&mut self.remote_on_enabled, kind, key, value),
            "pll_done" => set_flag(&mut self.pll_done, kind, key, value),
            "freq_error_ppb" => set_parsed(&mut self.freq_error_ppb, kind, key, value),
            "cal_freq" => set_parsed(&mut self.cal_freq, kind, key, value),
            "tnf_enabled" => set_flag(&mut self.tnf_enabled, kind, key, value),
            "full_duplex_enabled" => set_flag(&mut self.full_duplex_enabled, kind, key, value),
            "binaural_rx" => set_flag(&mut self.binaural_rx, kind, key, value),
            "band_persistence_enabled" => {
                set_flag(&mut self.band_persistence_enabled, kind, key, value)
            }
            "mute_local_audio_when_remote" => {
                set_flag(&mut self.mute_local_audio_when_remote, kind, key, value)
            }
            "enforce_private_ip_connections" => {
                set_flag(&mut self.enforce_private_ip_connections, kind, key, value)
            }
            "backlight" => set_parsed(&mut self.backlight, kind, key, value),
            "daxiq_capacity" => set_parsed(&mut self.daxiq_capacity, kind, key, value),
            "daxiq_available" => set_parsed(&mut self.daxiq_available, kind, key, value),
            _ => FieldResult::Unknown,
        }
    }
}
