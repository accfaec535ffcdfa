//! Packed 64-bit dotted versions.
//!
//! Radios report their protocol version (`V` line), firmware version and
//! discovery-protocol version as four dotted components. They are packed
//! into a single `u64` so they compare with plain integer ordering:
//!
//! ```text
//! major << 48 | minor << 40 | patch << 32 | build
//! ```
//!
//! The first three components occupy one byte each. The build component
//! fills the low 32 bits; a non-numeric build (a developer machine tag such
//! as `1.4.0.KE5DTO`) packs as `u32::MAX`, so it sorts after every numbered
//! build of the same release.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A four-component version packed into 64 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(u64);

impl ProtocolVersion {
    /// `1.0.0.0`, the discovery-protocol threshold above which announcements
    /// carry status and in-use fields.
    pub const V1_0_0_0: ProtocolVersion = ProtocolVersion::new(1, 0, 0, 0);

    /// Build a version from its components.
    pub const fn new(major: u8, minor: u8, patch: u8, build: u32) -> Self {
        Self(((major as u64) << 48) | ((minor as u64) << 40) | ((patch as u64) << 32) | build as u64)
    }

    /// Wrap an already-packed value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The packed 64-bit value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn major(self) -> u8 {
        ((self.0 >> 48) & 0xFF) as u8
    }

    pub const fn minor(self) -> u8 {
        ((self.0 >> 40) & 0xFF) as u8
    }

    pub const fn patch(self) -> u8 {
        ((self.0 >> 32) & 0xFF) as u8
    }

    pub const fn build(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.trim().split('.').collect();
        if tokens.len() < 4 {
            return Err(Error::Protocol(format!(
                "version requires 4 components: {s}"
            )));
        }

        let mut packed = 0u64;
        for (i, token) in tokens[..3].iter().enumerate() {
            let component = token
                .parse::<u8>()
                .map_err(|_| Error::Protocol(format!("invalid version component: {token}")))?;
            packed |= (component as u64) << ((6 - i) * 8);
        }

        let build = tokens[3].parse::<u32>().unwrap_or(u32::MAX);
        packed |= build as u64;

        Ok(Self(packed))
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major(),
            self.minor(),
            self.patch(),
            self.0 & 0xFFFF
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_numeric_version() {
        let v: ProtocolVersion = "1.4.0.0".parse().unwrap();
        assert_eq!(v.raw(), 0x0001_0400_0000_0000);
        assert_eq!(v.major(), 1);
        assert_eq!(v.minor(), 4);
        assert_eq!(v.patch(), 0);
        assert_eq!(v.build(), 0);
    }

    #[test]
    fn parse_with_build_number() {
        let v: ProtocolVersion = "1.6.17.86".parse().unwrap();
        assert_eq!(v, ProtocolVersion::new(1, 6, 17, 86));
        assert_eq!(v.to_string(), "1.6.17.86");
    }

    #[test]
    fn non_numeric_build_packs_as_max() {
        let v: ProtocolVersion = "2.0.1.KE5DTO".parse().unwrap();
        assert_eq!(v.build(), u32::MAX);
        assert!(v > ProtocolVersion::new(2, 0, 1, 1_000_000));
    }

    #[test]
    fn too_few_components_is_error() {
        assert!("1.4.0".parse::<ProtocolVersion>().is_err());
        assert!("".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn non_numeric_major_is_error() {
        assert!("x.4.0.0".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn ordering_follows_components() {
        let older: ProtocolVersion = "1.0.0.0".parse().unwrap();
        let newer: ProtocolVersion = "2.0.0.0".parse().unwrap();
        assert!(newer > older);
        assert_eq!(older, ProtocolVersion::V1_0_0_0);
        assert!(ProtocolVersion::new(1, 0, 0, 1) > ProtocolVersion::V1_0_0_0);
    }

    #[test]
    fn display_masks_build_to_sixteen_bits() {
        let v = ProtocolVersion::new(3, 1, 2, 0x0001_0005);
        assert_eq!(v.to_string(), "3.1.2.5");
    }
}
