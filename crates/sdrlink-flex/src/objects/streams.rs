//! DAX audio, DAX IQ and Opus streams, keyed by stream id.
//!
//! Stream objects are complete once the radio reports the `ip` the stream
//! is sent to. They have no dependencies. Payloads are not decoded here;
//! the router counts them and hands them to any attached sink.

use sdrlink_core::ObjectRef;

use super::{FieldResult, StatusObject, set_flag, set_parsed, set_stream_id};
use crate::sequence::ForwardSequenceTracker;

/// Delivery details shared by every stream kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub ip: String,
    pub port: u16,
    /// Datagrams routed to this stream.
    pub packets: u64,
    got_ip: bool,
}

impl StreamEndpoint {
    fn apply_field(&mut self, kind: &str, key: &str, value: &str) -> FieldResult {
        match key {
            "ip" => {
                self.ip = value.to_string();
                self.got_ip = true;
                FieldResult::Applied
            }
            "port" => set_parsed(&mut self.port, kind, key, value),
            _ => FieldResult::Unknown,
        }
    }
}

/// A DAX receive audio stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioStream {
    pub stream_id: u32,
    pub dax: u8,
    pub slice: u8,
    pub client_handle: u32,
    pub endpoint: StreamEndpoint,
}

impl StatusObject for AudioStream {
    type Key = u32;
    const KIND: &'static str = "audio_stream";

    fn create(stream_id: u32) -> Self {
        Self {
            stream_id,
            ..Self::default()
        }
    }

    fn apply_field(&mut self, key: &str, value: &str) -> FieldResult {
        let kind = Self::KIND;
        match key {
            "dax" => set_parsed(&mut self.dax, kind, key, value),
            "slice" => set_parsed(&mut self.slice, kind, key, value),
            "client_handle" => set_stream_id(&mut self.client_handle, kind, key, value),
            _ => self.endpoint.apply_field(kind, key, value),
        }
    }

    fn full_status(&self) -> bool {
        self.endpoint.got_ip
    }

    fn object_ref(key: u32) -> ObjectRef {
        ObjectRef::AudioStream(key)
    }
}

/// A DAX IQ stream tapped from a panadapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IqStream {
    pub stream_id: u32,
    pub daxiq: u8,
    pub pan: u32,
    /// Sample rate in samples per second.
    pub rate: u32,
    pub streaming: bool,
    pub capacity: u32,
    pub available: u32,
    pub client_handle: u32,
    pub endpoint: StreamEndpoint,
}

impl StatusObject for IqStream {
    type Key = u32;
    const KIND: &'static str = "daxiq";

    fn create(stream_id: u32) -> Self {
        Self {
            stream_id,
            ..Self::default()
        }
    }

    fn apply_field(&mut self, key: &str, value: &str) -> FieldResult {
        let kind = Self::KIND;
        match key {
            "daxiq" => set_parsed(&mut self.daxiq, kind, key, value),
            "pan" => set_stream_id(&mut self.pan, kind, key, value),
            "rate" => set_parsed(&mut self.rate, kind, key, value),
            "streaming" => set_flag(&mut self.streaming, kind, key, value),
            "capacity" => set_parsed(&mut self.capacity, kind, key, value),
            "available" => set_parsed(&mut self.available, kind, key, value),
            "client_handle" => set_stream_id(&mut self.client_handle, kind, key, value),
            _ => self.endpoint.apply_field(kind, key, value),
        }
    }

    fn full_status(&self) -> bool {
        self.endpoint.got_ip
    }

    fn object_ref(key: u32) -> ObjectRef {
        ObjectRef::IqStream(key)
    }
}

/// Opus-compressed remote audio.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpusStream {
    pub stream_id: u32,
    pub rx_on: bool,
    pub tx_on: bool,
    pub rx_stopped: bool,
    pub client_handle: u32,
    pub endpoint: StreamEndpoint,
    rx_packets: ForwardSequenceTracker,
}

impl OpusStream {
    /// Account for one received Opus packet's counter.
    pub fn observe_packet(&mut self, packet_count: u8) {
        self.rx_packets.observe(packet_count);
    }

    /// Out-of-sequence Opus packets on this stream.
    pub fn errors(&self) -> u64 {
        self.rx_packets.errors()
    }
}

impl StatusObject for OpusStream {
    type Key = u32;
    const KIND: &'static str = "opus_stream";

    fn create(stream_id: u32) -> Self {
        Self {
            stream_id,
            ..Self::default()
        }
    }

    fn apply_field(&mut self, key: &str, value: &str) -> FieldResult {
        let kind = Self::KIND;
        match key {
            "rx_on" => set_flag(&mut self.rx_on, kind, key, value),
            "tx_on" => set_flag(&mut self.tx_on, kind, key, value),
            "opus_rx_stream_stopped" => set_flag(&mut self.rx_stopped, kind, key, value),
            "client_handle" => set_stream_id(&mut self.client_handle, kind, key, value),
            _ => self.endpoint.apply_field(kind, key, value),
        }
    }

    fn full_status(&self) -> bool {
        self.endpoint.got_ip
    }

    fn object_ref(key: u32) -> ObjectRef {
        ObjectRef::OpusStream(key)
    }
}
