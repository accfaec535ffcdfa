//! VITA-49 datagram builders.
//!
//! Builders produce the exact byte layout the radio sends, with the header
//! size field filled in from the assembled length. Defaults match a typical
//! telemetry packet: extension data with stream id, class id present, the
//! vendor OUI, no timestamps and no trailer.

/// Vendor OUI carried in the class id.
pub const FLEX_OUI: u32 = 0x001C2D;
/// Information class code the radio uses.
pub const INFORMATION_CLASS: u16 = 0x534C;

pub const CLASS_METER: u16 = 0x8002;
pub const CLASS_FFT: u16 = 0x8003;
pub const CLASS_WATERFALL: u16 = 0x8004;
pub const CLASS_OPUS: u16 = 0x8005;
pub const CLASS_DISCOVERY: u16 = 0xFFFF;

/// Stream id the radio uses for meter packets.
pub const METER_STREAM_ID: u32 = 0x0000_0700;
/// Stream id the radio uses for discovery broadcasts.
pub const DISCOVERY_STREAM_ID: u32 = 0x0000_0800;

/// Builder for a single VITA-49 datagram.
#[derive(Debug, Clone)]
pub struct VitaPacket {
    packet_type: u8,
    class_code: u16,
    stream_id: u32,
    oui: u32,
    count: u8,
    timestamps: Option<(u32, u64)>,
    trailer: Option<u32>,
    payload: Vec<u8>,
}

impl VitaPacket {
    pub fn new(class_code: u16, stream_id: u32) -> Self {
        Self {
            packet_type: 3,
            class_code,
            stream_id,
            oui: FLEX_OUI,
            count: 0,
            timestamps: None,
            trailer: None,
            payload: Vec::new(),
        }
    }

    /// 4-bit packet counter; higher bits are discarded.
    pub fn count(mut self, count: u8) -> Self {
        self.count = count & 0x0F;
        self
    }

    pub fn oui(mut self, oui: u32) -> Self {
        self.oui = oui;
        self
    }

    /// Include integer and fractional timestamps.
    pub fn timestamps(mut self, int: u32, frac: u64) -> Self {
        self.timestamps = Some((int, frac));
        self
    }

    pub fn trailer(mut self, trailer: u32) -> Self {
        self.trailer = Some(trailer);
        self
    }

    /// Payload bytes; padded with zeros to a whole number of words.
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(28 + self.payload.len() + 4);
        body.extend_from_slice(&self.stream_id.to_be_bytes());
        body.extend_from_slice(&(self.oui & 0x00FF_FFFF).to_be_bytes());
        let class_word = ((INFORMATION_CLASS as u32) << 16) | self.class_code as u32;
        body.extend_from_slice(&class_word.to_be_bytes());
        if let Some((int, frac)) = self.timestamps {
            body.extend_from_slice(&int.to_be_bytes());
            body.extend_from_slice(&frac.to_be_bytes());
        }
        body.extend_from_slice(&self.payload);
        while body.len() % 4 != 0 {
            body.push(0);
        }
        if let Some(trailer) = self.trailer {
            body.extend_from_slice(&trailer.to_be_bytes());
        }

        let size_words = ((body.len() + 4) / 4) as u32;
        let mut header: u32 = (self.packet_type as u32 & 0x0F) << 28;
        header |= 1 << 27;
        if self.trailer.is_some() {
            header |= 1 << 26;
        }
        if self.timestamps.is_some() {
            header |= 0b01 << 22; // TSI: UTC
            header |= 0b01 << 20; // TSF: sample count
        }
        header |= (self.count as u32) << 16;
        header |= size_words & 0xFFFF;

        let mut packet = header.to_be_bytes().to_vec();
        packet.extend_from_slice(&body);
        packet
    }
}

/// Meter payload from `(id, raw)` pairs.
pub fn meter_payload(readings: &[(u16, i16)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(readings.len() * 4);
    for (id, raw) in readings {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&raw.to_be_bytes());
    }
    out
}

/// A complete meter datagram.
pub fn meter_packet(count: u8, readings: &[(u16, i16)]) -> Vec<u8> {
    VitaPacket::new(CLASS_METER, METER_STREAM_ID)
        .count(count)
        .payload(&meter_payload(readings))
        .build()
}

/// FFT payload: start bin, bin count, bin size and frame index, then bins.
pub fn fft_payload(start_bin: u32, bin_size: u32, frame_index: u32, bins: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + bins.len() * 2);
    out.extend_from_slice(&start_bin.to_be_bytes());
    out.extend_from_slice(&(bins.len() as u32).to_be_bytes());
    out.extend_from_slice(&bin_size.to_be_bytes());
    out.extend_from_slice(&frame_index.to_be_bytes());
    for bin in bins {
        out.extend_from_slice(&bin.to_be_bytes());
    }
    out
}

/// A complete FFT datagram for one panadapter stream.
pub fn fft_packet(
    stream_id: u32,
    count: u8,
    start_bin: u32,
    frame_index: u32,
    bins: &[u16],
) -> Vec<u8> {
    VitaPacket::new(CLASS_FFT, stream_id)
        .count(count)
        .payload(&fft_payload(start_bin, 2, frame_index, bins))
        .build()
}

/// Waterfall tile payload.
pub fn waterfall_payload(
    first_pixel_freq: i64,
    bin_bandwidth: i64,
    width: u16,
    height: u16,
    data: &[u16],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + data.len() * 2);
    out.extend_from_slice(&first_pixel_freq.to_be_bytes());
    out.extend_from_slice(&bin_bandwidth.to_be_bytes());
    out.extend_from_slice(&100u32.to_be_bytes()); // line duration
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // timecode
    out.extend_from_slice(&0u32.to_be_bytes()); // auto black level
    for px in data {
        out.extend_from_slice(&px.to_be_bytes());
    }
    out
}

/// A complete waterfall datagram.
pub fn waterfall_packet(stream_id: u32, count: u8, width: u16, height: u16, data: &[u16]) -> Vec<u8> {
    VitaPacket::new(CLASS_WATERFALL, stream_id)
        .count(count)
        .payload(&waterfall_payload(14_000_000, 100, width, height, data))
        .build()
}

/// A complete discovery datagram carrying `text` as its payload.
pub fn discovery_packet(text: &str) -> Vec<u8> {
    VitaPacket::new(CLASS_DISCOVERY, DISCOVERY_STREAM_ID)
        .payload(text.as_bytes())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_matches_length() {
        let pkt = meter_packet(5, &[(1, 2), (3, 4)]);
        assert_eq!(pkt.len(), 16 + 8);
        let header = u32::from_be_bytes([pkt[0], pkt[1], pkt[2], pkt[3]]);
        assert_eq!(header >> 28, 3);
        assert_eq!((header >> 16) & 0x0F, 5);
        assert_eq!((header & 0xFFFF) as usize * 4, pkt.len());
    }

    #[test]
    fn payload_is_padded_to_words() {
        let pkt = discovery_packet("abc");
        assert_eq!(pkt.len(), 16 + 4);
        assert_eq!(&pkt[16..], b"abc\0");
    }

    #[test]
    fn trailer_sets_flag_and_word() {
        let pkt = VitaPacket::new(CLASS_OPUS, 1).trailer(7).build();
        let header = u32::from_be_bytes([pkt[0], pkt[1], pkt[2], pkt[3]]);
        assert_eq!((header >> 26) & 1, 1);
        assert_eq!(&pkt[pkt.len() - 4..], &7u32.to_be_bytes());
    }
}
