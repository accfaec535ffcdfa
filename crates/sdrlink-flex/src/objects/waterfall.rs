//! Waterfall displays, keyed by stream id.

use sdrlink_core::ObjectRef;

use super::{FieldResult, Requirement, StatusObject, set_flag, set_parsed, set_stream_id};
use crate::sequence::SequenceTracker;

/// A waterfall display attached to a panadapter.
///
/// Status form: `display waterfall 0x<id> key=value ...`. Complete once the
/// `panadapter` key arrives; announced once that panadapter exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waterfall {
    pub stream_id: u32,
    /// Parent panadapter stream id.
    pub panadapter: u32,
    pub x_pixels: u32,
    pub y_pixels: u32,
    pub center: f64,
    pub line_duration: u32,
    pub color_gain: u32,
    pub black_level: u32,
    pub auto_black: bool,
    pub gradient_index: u32,
    pub client_handle: u32,
    got_panadapter: bool,
    tiles: SequenceTracker,
}

impl Waterfall {
    /// Account for one tile's packet counter.
    pub fn observe_tile(&mut self, packet_count: u8) {
        self.tiles.observe(packet_count);
    }

    /// Out-of-sequence tile packets on this stream.
    pub fn errors(&self) -> u64 {
        self.tiles.errors()
    }
}

impl StatusObject for Waterfall {
    type Key = u32;
    const KIND: &'static str = "waterfall";

    fn create(stream_id: u32) -> Self {
        Self {
            stream_id,
            ..Self::default()
        }
    }

    fn apply_field(&mut self, key: &str, value: &str) -> FieldResult {
        let kind = Self::KIND;
        match key {
            "panadapter" => {
                let result = set_stream_id(&mut self.panadapter, kind, key, value);
                if result == FieldResult::Applied {
                    self.got_panadapter = true;
                }
                result
            }
            "x_pixels" => set_parsed(&mut self.x_pixels, kind, key, value),
            "y_pixels" => set_parsed(&mut self.y_pixels, kind, key, value),
            "center" => set_parsed(&mut self.center, kind, key, value),
            "line_duration" => set_parsed(&mut self.line_duration, kind, key, value),
            "color_gain" => set_parsed(&mut self.color_gain, kind, key, value),
            "black_level" => set_parsed(&mut self.black_level, kind, key, value),
            "auto_black" => set_flag(&mut self.auto_black, kind, key, value),
            "gradient_index" => set_parsed(&mut self.gradient_index, kind, key, value),
            "client_handle" => set_stream_id(&mut self.client_handle, kind, key, value),
            // Mirrored from the parent panadapter.
            "bandwidth" | "rfgain" | "rxant" | "wide" | "loopa" | "loopb" | "band" | "daxiq"
            | "daxiq_rate" | "capacity" | "available" | "min_dbm" | "max_dbm" | "fps"
            | "average" | "weighted_average" => FieldResult::Applied,
            _ => FieldResult::Unknown,
        }
    }

    fn full_status(&self) -> bool {
        self.got_panadapter
    }

    fn requirement(&self) -> Requirement {
        Requirement::PanadapterPresent(self.panadapter)
    }

    fn object_ref(key: u32) -> ObjectRef {
        ObjectRef::Waterfall(key)
    }
}
