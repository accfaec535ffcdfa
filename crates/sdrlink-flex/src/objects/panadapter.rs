//! Panadapters and FFT frame assembly.

use std::sync::Arc;

use sdrlink_core::ObjectRef;

use super::{FieldResult, Requirement, StatusObject, set_flag, set_parsed, set_stream_id};
use crate::sequence::SequenceTracker;
use crate::vita49::FftPayload;

/// A panadapter display, keyed by its FFT stream id.
///
/// Status form: `display pan 0x<id> key=value ...`. Complete once the
/// `waterfall` key arrives; announced after its child waterfall.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panadapter {
    pub stream_id: u32,
    /// Center frequency in MHz.
    pub center: f64,
    /// Displayed bandwidth in MHz.
    pub bandwidth: f64,
    /// Width in bins; one FFT frame carries exactly this many.
    pub x_pixels: u32,
    pub y_pixels: u32,
    pub min_dbm: f64,
    pub max_dbm: f64,
    pub fps: u32,
    pub average: u32,
    pub weighted_average: bool,
    pub band: String,
    pub rxant: String,
    pub pre: String,
    pub rfgain: i32,
    pub wide: bool,
    pub wnb: bool,
    pub daxiq: u8,
    /// Stream id of the child waterfall (0 = none).
    pub waterfall: u32,
    pub client_handle: u32,
    got_waterfall: bool,
    frame: FrameAssembler,
    fft_packets: SequenceTracker,
}

impl Panadapter {
    /// Out-of-sequence FFT packets on this stream.
    pub fn fft_errors(&self) -> u64 {
        self.fft_packets.errors()
    }

    /// Account for one FFT packet and fold it into the frame being built.
    ///
    /// Returns the completed frame once every bin has arrived.
    pub fn add_fft(&mut self, packet_count: u8, fft: &FftPayload) -> Option<(u32, Arc<[u16]>)> {
        self.fft_packets.observe(packet_count);
        self.frame.add(self.stream_id, self.x_pixels as usize, fft)
    }
}

impl StatusObject for Panadapter {
    type Key = u32;
    const KIND: &'static str = "panadapter";

    fn create(stream_id: u32) -> Self {
        Self {
            stream_id,
            ..Self::default()
        }
    }

    fn apply_field(&mut self, key: &str, value: &str) -> FieldResult {
        let kind = Self::KIND;
        match key {
            "center" => set_parsed(&mut self.center, kind, key, value),
            "bandwidth" => set_parsed(&mut self.bandwidth, kind, key, value),
            "x_pixels" => set_parsed(&mut self.x_pixels, kind, key, value),
            "y_pixels" => set_parsed(&mut self.y_pixels, kind, key, value),
            "min_dbm" => set_parsed(&mut self.min_dbm, kind, key, value),
            "max_dbm" => set_parsed(&mut self.max_dbm, kind, key, value),
            "fps" => set_parsed(&mut self.fps, kind, key, value),
            "average" => set_parsed(&mut self.average, kind, key, value),
            "weighted_average" => set_flag(&mut self.weighted_average, kind, key, value),
            "band" => {
                self.band = value.to_string();
                FieldResult::Applied
            }
            "rxant" => {
                self.rxant = value.to_string();
                FieldResult::Applied
            }
            "pre" => {
                self.pre = value.to_string();
                FieldResult::Applied
            }
            "rfgain" => set_parsed(&mut self.rfgain, kind, key, value),
            "wide" => set_flag(&mut self.wide, kind, key, value),
            "wnb" => set_flag(&mut self.wnb, kind, key, value),
            "daxiq" => set_parsed(&mut self.daxiq, kind, key, value),
            "waterfall" => {
                let result = set_stream_id(&mut self.waterfall, kind, key, value);
                if result == FieldResult::Applied {
                    self.got_waterfall = true;
                }
                result
            }
            "client_handle" => set_stream_id(&mut self.client_handle, kind, key, value),
            _ => FieldResult::Unknown,
        }
    }

    fn full_status(&self) -> bool {
        self.got_waterfall
    }

    fn requirement(&self) -> Requirement {
        if self.waterfall == 0 {
            Requirement::None
        } else {
            Requirement::WaterfallAnnounced(self.waterfall)
        }
    }

    fn object_ref(key: u32) -> ObjectRef {
        ObjectRef::Panadapter(key)
    }
}

/// Builds whole FFT frames from partial packets.
///
/// A frame starts at bin 0. A packet from a different frame than the one
/// being built abandons it until the next bin-0 packet. Packets that would
/// overrun the panadapter width are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
struct FrameAssembler {
    current_frame: u32,
    bins: Vec<u16>,
    filled: usize,
    wait_for_next_frame: bool,
}

impl FrameAssembler {
    fn add(&mut self, stream_id: u32, width: usize, fft: &FftPayload) -> Option<(u32, Arc<[u16]>)> {
        let start = fft.start_bin as usize;
        if start + fft.bins.len() > width {
            tracing::trace!(
                stream_id = format!("0x{:08X}", stream_id),
                start_bin = start,
                bins = fft.bins.len(),
                width = width,
                "FFT packet overruns panadapter width"
            );
            return None;
        }

        if start == 0 {
            if self.wait_for_next_frame {
                tracing::debug!(
                    stream_id = format!("0x{:08X}", stream_id),
                    frame = fft.frame_index,
                    dropped = fft.frame_index.wrapping_sub(self.current_frame),
                    "FFT frame assembly recovered"
                );
                self.wait_for_next_frame = false;
            }
            self.filled = 0;
            self.current_frame = fft.frame_index;
        }

        if fft.frame_index != self.current_frame {
            self.wait_for_next_frame = true;
            tracing::trace!(
                stream_id = format!("0x{:08X}", stream_id),
                frame = self.current_frame,
                "FFT frame not finished"
            );
            return None;
        }

        if self.bins.len() != width {
            self.bins = vec![0; width];
            self.filled = 0;
        }
        self.bins[start..start + fft.bins.len()].copy_from_slice(&fft.bins);
        self.filled += fft.bins.len();

        if self.filled == width {
            self.filled = 0;
            let frame: Arc<[u16]> = Arc::from(std::mem::replace(&mut self.bins, vec![0; width]));
            return Some((self.current_frame, frame));
        }
        None
    }
}
