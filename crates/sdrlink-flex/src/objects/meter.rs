//! Meters, keyed by the radio-assigned meter id.
//!
//! Meter status lines describe several meters at once:
//!
//! ```text
//! meter 7.src=SLC#7.num=0#7.nam=LEVEL#7.unit=dBm#7.low=-150.0#7.hi=20.0#
//! ```
//!
//! The dispatcher splits these by id; this module only sees one meter's
//! fields. Descriptive fields are set once and never overwritten. Values
//! arrive as raw `i16` in VITA-49 meter packets and are scaled by unit.

use std::fmt;

use sdrlink_core::ObjectRef;

use super::{FieldResult, StatusObject, parse_value};

/// Unit of a meter's scaled value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MeterUnit {
    #[default]
    None,
    Dbm,
    Dbfs,
    Swr,
    Volts,
    Amps,
    Degrees,
}

impl MeterUnit {
    pub fn from_status(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "dbm" => MeterUnit::Dbm,
            "dbfs" => MeterUnit::Dbfs,
            "swr" => MeterUnit::Swr,
            "volts" => MeterUnit::Volts,
            "amps" => MeterUnit::Amps,
            "degc" | "degf" | "degrees" => MeterUnit::Degrees,
            _ => MeterUnit::None,
        }
    }

    /// Convert a raw packet value into this unit.
    pub fn scale(self, raw: i16) -> f32 {
        let raw = raw as f32;
        match self {
            MeterUnit::Dbm | MeterUnit::Dbfs | MeterUnit::Swr => raw / 128.0,
            MeterUnit::Volts | MeterUnit::Amps => raw / 1024.0,
            MeterUnit::Degrees => raw / 64.0,
            MeterUnit::None => raw,
        }
    }
}

impl fmt::Display for MeterUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MeterUnit::None => "",
            MeterUnit::Dbm => "dBm",
            MeterUnit::Dbfs => "dBFS",
            MeterUnit::Swr => "SWR",
            MeterUnit::Volts => "Volts",
            MeterUnit::Amps => "Amps",
            MeterUnit::Degrees => "Degrees",
        };
        f.write_str(s)
    }
}

/// One meter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meter {
    pub id: u16,
    /// Source object kind: `SLC`, `TX-`, `RAD`, `AMP`...
    pub source: Option<String>,
    /// Index within the source, e.g. the slice number.
    pub source_index: Option<i32>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<MeterUnit>,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub fps: Option<f64>,
    /// Latest scaled value.
    pub value: f32,
}

impl Meter {
    /// Scale and store a raw packet value, returning the scaled value.
    pub fn update_raw(&mut self, raw: i16) -> f32 {
        self.value = self.unit.unwrap_or_default().scale(raw);
        self.value
    }
}

fn set_once<T>(slot: &mut Option<T>, value: Option<T>) -> FieldResult {
    match value {
        Some(v) => {
            if slot.is_none() {
                *slot = Some(v);
            }
            FieldResult::Applied
        }
        None => FieldResult::Invalid,
    }
}

impl StatusObject for Meter {
    type Key = u16;
    const KIND: &'static str = "meter";

    fn create(id: u16) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    fn apply_field(&mut self, key: &str, value: &str) -> FieldResult {
        let kind = Self::KIND;
        match key {
            "src" => set_once(&mut self.source, Some(value.to_string())),
            "num" => set_once(&mut self.source_index, parse_value(kind, key, value)),
            "nam" => set_once(&mut self.name, Some(value.to_string())),
            "desc" => set_once(&mut self.description, Some(value.to_string())),
            "unit" => set_once(&mut self.unit, Some(MeterUnit::from_status(value))),
            "low" => set_once(&mut self.low, parse_value(kind, key, value)),
            "hi" => set_once(&mut self.high, parse_value(kind, key, value)),
            "fps" => set_once(&mut self.fps, parse_value(kind, key, value)),
            _ => FieldResult::Unknown,
        }
    }

    fn full_status(&self) -> bool {
        self.name.is_some() && self.unit.is_some()
    }

    fn object_ref(key: u16) -> ObjectRef {
        ObjectRef::Meter(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_scaling() {
        assert_eq!(MeterUnit::Dbm.scale(-128 * 73), -73.0);
        assert_eq!(MeterUnit::Swr.scale(192), 1.5);
        assert_eq!(MeterUnit::Volts.scale(13 * 1024), 13.0);
        assert_eq!(MeterUnit::Degrees.scale(40 * 64), 40.0);
        assert_eq!(MeterUnit::None.scale(42), 42.0);
    }

    #[test]
    fn unit_names() {
        assert_eq!(MeterUnit::from_status("dBFS"), MeterUnit::Dbfs);
        assert_eq!(MeterUnit::from_status("degC"), MeterUnit::Degrees);
        assert_eq!(MeterUnit::from_status("RPM"), MeterUnit::None);
        assert_eq!(MeterUnit::Dbm.to_string(), "dBm");
    }

    #[test]
    fn descriptive_fields_are_set_once() {
        let mut m = Meter::create(7);
        m.apply_field("nam", "LEVEL");
        m.apply_field("nam", "OTHER");
        assert_eq!(m.name.as_deref(), Some("LEVEL"));
        assert!(!m.full_status());

        m.apply_field("unit", "dBm");
        assert!(m.full_status());
        assert_eq!(m.apply_field("low", "abc"), FieldResult::Invalid);
        assert_eq!(m.low, None);
        m.apply_field("low", "-150.0");
        assert_eq!(m.low, Some(-150.0));
    }

    #[test]
    fn raw_update_uses_unit() {
        let mut m = Meter::create(1);
        assert_eq!(m.update_raw(256), 256.0);
        m.apply_field("unit", "dBm");
        assert_eq!(m.update_raw(256), 2.0);
        assert_eq!(m.value, 2.0);
    }
}
