//! VITA-49 preamble and payload parsing for the UDP telemetry stream.
//!
//! The radio streams meter, FFT, waterfall, audio and IQ data as VITA-49
//! packets. Only the preamble is interpreted generically; payload layouts
//! are class-specific and decoded by the functions at the bottom of this
//! module. Everything here is pure parsing over byte slices.
//!
//! # Preamble layout
//!
//! ```text
//! word 0   type:4 | C:1 | T:1 | rsvd:2 | TSI:2 | TSF:2 | count:4 | size:16
//! word 1   stream id                      (types 1 and 3 only)
//! word 2   rsvd:8 | OUI:24                (if C)
//! word 3   information class:16 | packet class:16   (if C)
//! word 4   integer timestamp              (if TSI != 0)
//! word 5-6 fractional timestamp           (if TSF != 0)
//! ```

use sdrlink_core::{Error, Result};

/// Smallest datagram the demultiplexer will look at.
pub const MIN_PREAMBLE_LEN: usize = 16;

/// Vendor OUI carried in the class id of every packet from the radio.
pub const FLEX_OUI: u32 = 0x001C2D;

pub const CLASS_METER: u16 = 0x8002;
pub const CLASS_FFT: u16 = 0x8003;
pub const CLASS_WATERFALL: u16 = 0x8004;
pub const CLASS_OPUS: u16 = 0x8005;
pub const CLASS_DAX_AUDIO: u16 = 0x03E3;
pub const CLASS_DISCOVERY: u16 = 0xFFFF;

/// VITA-49 packet type, bits 31-28 of the header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    IfData,
    IfDataWithStream,
    ExtData,
    ExtDataWithStream,
    IfContext,
    ExtContext,
    Other(u8),
}

impl PacketType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => PacketType::IfData,
            1 => PacketType::IfDataWithStream,
            2 => PacketType::ExtData,
            3 => PacketType::ExtDataWithStream,
            4 => PacketType::IfContext,
            5 => PacketType::ExtContext,
            other => PacketType::Other(other),
        }
    }

    /// Whether a stream id word follows the header word.
    pub fn has_stream_id(self) -> bool {
        matches!(self, PacketType::IfDataWithStream | PacketType::ExtDataWithStream)
    }
}

/// Payload interpretation selected by the packet class code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Meter,
    Fft,
    Waterfall,
    Opus,
    DaxAudio,
    /// DAX IQ at one of the four sample rates (0x02E3..=0x02E6).
    DaxIq(u16),
    Discovery,
    Unknown(u16),
}

impl PacketClass {
    pub fn from_code(code: u16) -> Self {
        match code {
            CLASS_METER => PacketClass::Meter,
            CLASS_FFT => PacketClass::Fft,
            CLASS_WATERFALL => PacketClass::Waterfall,
            CLASS_OPUS => PacketClass::Opus,
            CLASS_DAX_AUDIO => PacketClass::DaxAudio,
            0x02E3..=0x02E6 => PacketClass::DaxIq(code),
            CLASS_DISCOVERY => PacketClass::Discovery,
            other => PacketClass::Unknown(other),
        }
    }
}

/// Decoded VITA-49 preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    pub packet_type: PacketType,
    pub has_class_id: bool,
    pub has_trailer: bool,
    /// Integer timestamp type (0 = none).
    pub tsi: u8,
    /// Fractional timestamp type (0 = none).
    pub tsf: u8,
    /// 4-bit rolling packet counter.
    pub packet_count: u8,
    /// Declared packet size in 32-bit words, preamble included.
    pub packet_size_words: u16,
    pub stream_id: Option<u32>,
    /// 24-bit organization id (0 when no class id is present).
    pub oui: u32,
    pub information_class: u16,
    pub class_code: u16,
    pub timestamp_int: Option<u32>,
    pub timestamp_frac: Option<u64>,
    /// Byte offset of the first payload byte.
    pub header_len: usize,
    /// Byte offset one past the last payload byte.
    pub payload_end: usize,
}

impl Preamble {
    pub fn class(&self) -> PacketClass {
        PacketClass::from_code(self.class_code)
    }

    /// Payload bytes of `data`, the datagram this preamble was parsed from.
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        data.get(self.header_len..self.payload_end).unwrap_or(&[])
    }
}

fn be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Parse the preamble of a raw datagram.
///
/// The payload end is computed from the declared size, less the trailer
/// word, and clamped to the datagram length.
pub fn parse_preamble(data: &[u8]) -> Result<Preamble> {
    let too_short = || {
        Error::Protocol(format!(
            "VITA-49 datagram too short for its preamble: {} bytes",
            data.len()
        ))
    };

    let header = be_u32(data, 0).ok_or_else(too_short)?;
    let packet_type = PacketType::from_bits(((header >> 28) & 0x0F) as u8);
    let has_class_id = (header >> 27) & 1 == 1;
    let has_trailer = (header >> 26) & 1 == 1;
    let tsi = ((header >> 22) & 0x03) as u8;
    let tsf = ((header >> 20) & 0x03) as u8;
    let packet_count = ((header >> 16) & 0x0F) as u8;
    let packet_size_words = (header & 0xFFFF) as u16;

    let mut offset = 4;

    let stream_id = if packet_type.has_stream_id() {
        let id = be_u32(data, offset).ok_or_else(too_short)?;
        offset += 4;
        Some(id)
    } else {
        None
    };

    let (oui, information_class, class_code) = if has_class_id {
        let oui_word = be_u32(data, offset).ok_or_else(too_short)?;
        let class_word = be_u32(data, offset + 4).ok_or_else(too_short)?;
        offset += 8;
        (
            oui_word & 0x00FF_FFFF,
            (class_word >> 16) as u16,
            (class_word & 0xFFFF) as u16,
        )
    } else {
        (0, 0, 0)
    };

    let timestamp_int = if tsi != 0 {
        let ts = be_u32(data, offset).ok_or_else(too_short)?;
        offset += 4;
        Some(ts)
    } else {
        None
    };

    let timestamp_frac = if tsf != 0 {
        let hi = be_u32(data, offset).ok_or_else(too_short)?;
        let lo = be_u32(data, offset + 4).ok_or_else(too_short)?;
        offset += 8;
        Some(((hi as u64) << 32) | lo as u64)
    } else {
        None
    };

    let mut payload_end = (packet_size_words as usize * 4).min(data.len());
    if has_trailer {
        payload_end = payload_end.saturating_sub(4);
    }
    let payload_end = payload_end.max(offset);

    Ok(Preamble {
        packet_type,
        has_class_id,
        has_trailer,
        tsi,
        tsf,
        packet_count,
        packet_size_words,
        stream_id,
        oui,
        information_class,
        class_code,
        timestamp_int,
        timestamp_frac,
        header_len: offset,
        payload_end,
    })
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One `(id, raw)` pair from a meter packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterReading {
    pub id: u16,
    /// Unscaled value; see the meter's unit for the divisor.
    pub raw: i16,
}

/// Decode a meter payload: consecutive big-endian `(u16 id, i16 raw)` pairs.
pub fn parse_meter_payload(payload: &[u8]) -> Result<Vec<MeterReading>> {
    if payload.len() % 4 != 0 {
        return Err(Error::Protocol(format!(
            "meter payload length {} is not divisible by 4",
            payload.len()
        )));
    }

    Ok(payload
        .chunks_exact(4)
        .map(|c| MeterReading {
            id: u16::from_be_bytes([c[0], c[1]]),
            raw: i16::from_be_bytes([c[2], c[3]]),
        })
        .collect())
}

/// Length of the FFT payload header in bytes.
pub const FFT_HEADER_LEN: usize = 16;

/// A partial FFT frame: a run of bins starting at `start_bin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FftPayload {
    pub start_bin: u32,
    pub num_bins: u32,
    pub bin_size: u32,
    pub frame_index: u32,
    pub bins: Vec<u16>,
}

/// Decode an FFT payload. Fewer bins than declared is a protocol error.
pub fn parse_fft_payload(payload: &[u8]) -> Result<FftPayload> {
    if payload.len() < FFT_HEADER_LEN {
        return Err(Error::Protocol(format!(
            "FFT payload too short: {} bytes",
            payload.len()
        )));
    }

    let start_bin = be_u32(payload, 0).unwrap_or(0);
    let num_bins = be_u32(payload, 4).unwrap_or(0);
    let bin_size = be_u32(payload, 8).unwrap_or(0);
    let frame_index = be_u32(payload, 12).unwrap_or(0);

    let data = &payload[FFT_HEADER_LEN..];
    let needed = num_bins as usize * 2;
    if data.len() < needed {
        return Err(Error::Protocol(format!(
            "FFT payload declares {} bins but carries {} bytes",
            num_bins,
            data.len()
        )));
    }

    let bins = data[..needed]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();

    Ok(FftPayload {
        start_bin,
        num_bins,
        bin_size,
        frame_index,
        bins,
    })
}

/// Length of the waterfall tile header in bytes.
pub const TILE_HEADER_LEN: usize = 32;

/// A decoded waterfall tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaterfallTile {
    pub first_pixel_freq: i64,
    pub bin_bandwidth: i64,
    pub line_duration_ms: u32,
    pub width: u16,
    pub height: u16,
    pub timecode: u32,
    pub auto_black_level: u32,
    pub data: Vec<u16>,
}

/// Decode a waterfall tile.
///
/// The pixel count is `width * height`, capped at what the payload carries.
pub fn parse_waterfall_payload(payload: &[u8]) -> Result<WaterfallTile> {
    if payload.len() < TILE_HEADER_LEN {
        return Err(Error::Protocol(format!(
            "waterfall tile too short: {} bytes",
            payload.len()
        )));
    }

    let be_i64 = |o: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&payload[o..o + 8]);
        i64::from_be_bytes(b)
    };
    let be_u16 = |o: usize| u16::from_be_bytes([payload[o], payload[o + 1]]);

    let width = be_u16(20);
    let height = be_u16(22);
    let body = &payload[TILE_HEADER_LEN..];
    let count = (width as usize * height as usize).min(body.len() / 2);

    Ok(WaterfallTile {
        first_pixel_freq: be_i64(0),
        bin_bandwidth: be_i64(8),
        line_duration_ms: be_u32(payload, 16).unwrap_or(0),
        width,
        height,
        timecode: be_u32(payload, 24).unwrap_or(0),
        auto_black_level: be_u32(payload, 28).unwrap_or(0),
        data: body[..count * 2]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrlink_test_harness::vita::{self, VitaPacket};

    #[test]
    fn class_codes() {
        assert_eq!(PacketClass::from_code(0x8002), PacketClass::Meter);
        assert_eq!(PacketClass::from_code(0x8003), PacketClass::Fft);
        assert_eq!(PacketClass::from_code(0x8004), PacketClass::Waterfall);
        assert_eq!(PacketClass::from_code(0x8005), PacketClass::Opus);
        assert_eq!(PacketClass::from_code(0x03E3), PacketClass::DaxAudio);
        assert_eq!(PacketClass::from_code(0x02E5), PacketClass::DaxIq(0x02E5));
        assert_eq!(PacketClass::from_code(0xFFFF), PacketClass::Discovery);
        assert_eq!(PacketClass::from_code(0x1234), PacketClass::Unknown(0x1234));
    }

    #[test]
    fn parse_full_preamble() {
        let pkt = VitaPacket::new(CLASS_METER, 0x0000_0700)
            .count(9)
            .timestamps(0x6000_0000, 42)
            .payload(&[0, 1, 0, 2])
            .build();
        let p = parse_preamble(&pkt).unwrap();
        assert_eq!(p.packet_type, PacketType::ExtDataWithStream);
        assert!(p.has_class_id);
        assert!(!p.has_trailer);
        assert_eq!(p.packet_count, 9);
        assert_eq!(p.stream_id, Some(0x0000_0700));
        assert_eq!(p.oui, FLEX_OUI);
        assert_eq!(p.class(), PacketClass::Meter);
        assert_eq!(p.timestamp_int, Some(0x6000_0000));
        assert_eq!(p.timestamp_frac, Some(42));
        assert_eq!(p.header_len, 28);
        assert_eq!(p.packet_size_words as usize * 4, pkt.len());
        assert_eq!(p.payload(&pkt), &[0, 1, 0, 2]);
    }

    #[test]
    fn preamble_without_timestamps_is_16_bytes() {
        let pkt = VitaPacket::new(CLASS_FFT, 0x4000_0000).payload(&[0xAA; 8]).build();
        let p = parse_preamble(&pkt).unwrap();
        assert_eq!(p.header_len, MIN_PREAMBLE_LEN);
        assert_eq!(p.timestamp_int, None);
        assert_eq!(p.payload(&pkt).len(), 8);
    }

    #[test]
    fn trailer_is_excluded_from_payload() {
        let pkt = VitaPacket::new(CLASS_OPUS, 0x2000_0000)
            .trailer(0xDEAD_BEEF)
            .payload(&[1, 2, 3, 4])
            .build();
        let p = parse_preamble(&pkt).unwrap();
        assert!(p.has_trailer);
        assert_eq!(p.payload(&pkt), &[1, 2, 3, 4]);
    }

    #[test]
    fn foreign_oui_is_reported() {
        let pkt = VitaPacket::new(CLASS_METER, 1).oui(0x00_1234).build();
        assert_eq!(parse_preamble(&pkt).unwrap().oui, 0x00_1234);
    }

    #[test]
    fn truncated_preamble_is_error() {
        let pkt = VitaPacket::new(CLASS_METER, 1).build();
        assert!(parse_preamble(&pkt[..10]).is_err());
        assert!(parse_preamble(&[]).is_err());
    }

    #[test]
    fn oversized_declared_length_is_clamped() {
        let mut pkt = VitaPacket::new(CLASS_METER, 1).payload(&[0, 1, 0, 2]).build();
        pkt[2] = 0x00;
        pkt[3] = 0xFF; // claim 255 words
        let p = parse_preamble(&pkt).unwrap();
        assert_eq!(p.payload(&pkt), &[0, 1, 0, 2]);
    }

    #[test]
    fn meter_payload_pairs() {
        let payload = vita::meter_payload(&[(1, 100), (7, -2560)]);
        let readings = parse_meter_payload(&payload).unwrap();
        assert_eq!(
            readings,
            vec![
                MeterReading { id: 1, raw: 100 },
                MeterReading { id: 7, raw: -2560 },
            ]
        );
        assert!(parse_meter_payload(&[]).unwrap().is_empty());
        assert!(parse_meter_payload(&[0, 1, 0]).is_err());
    }

    #[test]
    fn fft_payload() {
        let payload = vita::fft_payload(10, 1, 7, &[100, 200, 300]);
        let fft = parse_fft_payload(&payload).unwrap();
        assert_eq!(fft.start_bin, 10);
        assert_eq!(fft.num_bins, 3);
        assert_eq!(fft.bin_size, 1);
        assert_eq!(fft.frame_index, 7);
        assert_eq!(fft.bins, vec![100, 200, 300]);
    }

    #[test]
    fn fft_payload_short_bins_is_error() {
        let mut payload = vita::fft_payload(0, 1, 0, &[1, 2, 3]);
        payload.truncate(payload.len() - 2);
        assert!(parse_fft_payload(&payload).is_err());
        assert!(parse_fft_payload(&[0; 8]).is_err());
    }

    #[test]
    fn waterfall_tile() {
        let payload = vita::waterfall_payload(14_000_000, 100, 2, 1, &[5, 6]);
        let tile = parse_waterfall_payload(&payload).unwrap();
        assert_eq!(tile.first_pixel_freq, 14_000_000);
        assert_eq!(tile.bin_bandwidth, 100);
        assert_eq!(tile.width, 2);
        assert_eq!(tile.height, 1);
        assert_eq!(tile.data, vec![5, 6]);
    }

    #[test]
    fn waterfall_tile_with_short_body_is_capped() {
        let payload = vita::waterfall_payload(0, 0, 4, 4, &[1, 2, 3]);
        let tile = parse_waterfall_payload(&payload).unwrap();
        assert_eq!(tile.data, vec![1, 2, 3]);
    }
}
