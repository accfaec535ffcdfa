//! Per-connection routing of VITA-49 datagrams by class code.
//!
//! Meter and FFT payloads are queued for their workers. Every other stream
//! class is handled on the spot: its packet counter and totals are updated
//! on the owning stream object, and the payload is handed to an attached
//! sink with `try_send`, which never blocks the UDP path. Packets for a
//! stream id with no object are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sdrlink_core::RadioEvent;
use tokio::sync::{broadcast, mpsc};

use crate::objects::ObjectStore;
use crate::pipeline::{Telemetry, TelemetryPacket};
use crate::vita49::{PacketClass, Preamble, parse_waterfall_payload};

/// Routes one radio's datagrams.
pub struct PacketRouter {
    objects: Arc<ObjectStore>,
    telemetry: Arc<Telemetry>,
    events: broadcast::Sender<RadioEvent>,
    sinks: Mutex<HashMap<u32, mpsc::Sender<Bytes>>>,
}

impl PacketRouter {
    pub fn new(
        objects: Arc<ObjectStore>,
        telemetry: Arc<Telemetry>,
        events: broadcast::Sender<RadioEvent>,
    ) -> Self {
        Self {
            objects,
            telemetry,
            events,
            sinks: Mutex::new(HashMap::new()),
        }
    }

    /// Receive the payloads of `stream_id` on `sink`, replacing any previous sink.
    pub fn attach_sink(&self, stream_id: u32, sink: mpsc::Sender<Bytes>) {
        self.sinks.lock().insert(stream_id, sink);
        tracing::debug!(stream_id = format!("0x{:08X}", stream_id), "Attached stream sink");
    }

    pub fn detach_sink(&self, stream_id: u32) -> bool {
        self.sinks.lock().remove(&stream_id).is_some()
    }

    /// Route a datagram whose preamble has already been validated.
    pub fn route(&self, preamble: &Preamble, datagram: Bytes) {
        let payload = datagram.slice(preamble.header_len..preamble.payload_end);
        let packet_count = preamble.packet_count;

        match preamble.class() {
            PacketClass::Meter => {
                self.telemetry.meters.push(TelemetryPacket {
                    stream_id: preamble.stream_id,
                    packet_count,
                    payload,
                });
            }
            PacketClass::Fft => {
                self.telemetry.fft.push(TelemetryPacket {
                    stream_id: preamble.stream_id,
                    packet_count,
                    payload,
                });
            }
            PacketClass::Waterfall => self.on_waterfall(preamble.stream_id, packet_count, payload),
            PacketClass::Opus => {
                let known = self.with_stream_id(preamble.stream_id, |id| {
                    self.objects.opus_streams.with_mut(id, |s| {
                        s.observe_packet(packet_count);
                        s.endpoint.packets += 1;
                    })
                });
                self.forward(preamble.stream_id, known, payload);
            }
            PacketClass::DaxAudio => {
                let known = self.with_stream_id(preamble.stream_id, |id| {
                    self.objects
                        .audio_streams
                        .with_mut(id, |s| s.endpoint.packets += 1)
                });
                self.forward(preamble.stream_id, known, payload);
            }
            PacketClass::DaxIq(_) => {
                let known = self.with_stream_id(preamble.stream_id, |id| {
                    self.objects
                        .iq_streams
                        .with_mut(id, |s| s.endpoint.packets += 1)
                });
                self.forward(preamble.stream_id, known, payload);
            }
            PacketClass::Discovery => {
                tracing::trace!("Discovery packet on the stream port");
            }
            PacketClass::Unknown(code) => {
                tracing::trace!(class = format!("0x{:04X}", code), "Unhandled packet class");
            }
        }
    }

    fn with_stream_id(&self, stream_id: Option<u32>, f: impl FnOnce(u32) -> Option<()>) -> bool {
        stream_id.and_then(f).is_some()
    }

    fn on_waterfall(&self, stream_id: Option<u32>, packet_count: u8, payload: Bytes) {
        let Some(id) = stream_id else {
            return;
        };
        if self
            .objects
            .waterfalls
            .with_mut(id, |w| w.observe_tile(packet_count))
            .is_none()
        {
            tracing::trace!(stream_id = format!("0x{:08X}", id), "Tile for unknown waterfall");
            return;
        }

        match parse_waterfall_payload(&payload) {
            Ok(tile) => {
                let _ = self.events.send(RadioEvent::WaterfallTile {
                    stream_id: id,
                    first_pixel_freq: tile.first_pixel_freq,
                    bin_bandwidth: tile.bin_bandwidth,
                    line_duration_ms: tile.line_duration_ms,
                    width: tile.width,
                    height: tile.height,
                    timecode: tile.timecode,
                    auto_black_level: tile.auto_black_level,
                    data: Arc::from(tile.data),
                });
            }
            Err(e) => {
                tracing::debug!(stream_id = format!("0x{:08X}", id), error = %e, "Dropping waterfall tile");
                return;
            }
        }
        self.forward(stream_id, true, payload);
    }

    fn forward(&self, stream_id: Option<u32>, known: bool, payload: Bytes) {
        let Some(id) = stream_id else {
            return;
        };
        if !known {
            tracing::trace!(stream_id = format!("0x{:08X}", id), "Packet for unknown stream");
            return;
        }
        let sinks = self.sinks.lock();
        if let Some(sink) = sinks.get(&id) {
            if sink.try_send(payload).is_err() {
                tracing::trace!(stream_id = format!("0x{:08X}", id), "Stream sink full, packet dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Update;
    use crate::vita49::{CLASS_DAX_AUDIO, parse_preamble};
    use sdrlink_test_harness::vita::{self, VitaPacket};

    fn router() -> (PacketRouter, broadcast::Receiver<RadioEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let router = PacketRouter::new(
            Arc::new(ObjectStore::new()),
            Arc::new(Telemetry::new()),
            tx,
        );
        (router, rx)
    }

    fn route(router: &PacketRouter, datagram: Vec<u8>) {
        let preamble = parse_preamble(&datagram).unwrap();
        router.route(&preamble, Bytes::from(datagram));
    }

    #[test]
    fn meter_and_fft_are_queued() {
        let (r, _rx) = router();
        route(&r, vita::meter_packet(3, &[(1, 10)]));
        route(&r, vita::fft_packet(0x4000_0000, 1, 0, 7, &[1, 2, 3]));

        let meters = r.telemetry.meters.drain();
        assert_eq!(meters.len(), 1);
        assert_eq!(meters[0].packet_count, 3);
        assert_eq!(meters[0].payload.len(), 4);

        let fft = r.telemetry.fft.drain();
        assert_eq!(fft[0].stream_id, Some(0x4000_0000));
    }

    #[test]
    fn waterfall_tile_is_published_and_counted() {
        let (r, mut rx) = router();
        let id = 0x4200_0000;
        r.objects
            .waterfalls
            .apply_status(id, Update::Fields(vec![("panadapter", "0x40000000")]));

        route(&r, vita::waterfall_packet(id, 0, 2, 1, &[5, 6]));
        route(&r, vita::waterfall_packet(id, 2, 2, 1, &[7, 8]));

        match rx.try_recv() {
            Ok(RadioEvent::WaterfallTile { stream_id, width, data, .. }) => {
                assert_eq!(stream_id, id);
                assert_eq!(width, 2);
                assert_eq!(&data[..], &[5, 6]);
            }
            other => panic!("expected tile, got {:?}", other),
        }
        assert_eq!(r.objects.waterfalls.get(id).unwrap().errors(), 1);
    }

    #[test]
    fn unknown_waterfall_is_dropped() {
        let (r, mut rx) = router();
        route(&r, vita::waterfall_packet(0x4200_0001, 0, 1, 1, &[1]));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn audio_forwarded_to_sink() {
        let (r, _rx) = router();
        let id = 0x0400_0008;
        r.objects
            .audio_streams
            .apply_status(id, Update::Fields(vec![("ip", "10.0.0.2")]));
        let (tx, mut sink) = mpsc::channel(1);
        r.attach_sink(id, tx);

        let packet = VitaPacket::new(CLASS_DAX_AUDIO, id).payload(&[0, 1, 2, 3]).build();
        route(&r, packet.clone());
        route(&r, packet);

        assert_eq!(&sink.recv().await.unwrap()[..], &[0, 1, 2, 3]);
        assert!(sink.try_recv().is_err());
        assert_eq!(r.objects.audio_streams.get(id).unwrap().endpoint.packets, 2);
    }

    #[test]
    fn opus_counts_loss_and_unknown_stream_is_dropped() {
        let (r, _rx) = router();
        let id = 0x0A00_0000;
        r.objects
            .opus_streams
            .apply_status(id, Update::Fields(vec![("ip", "10.0.0.2")]));

        for count in [0, 1, 5] {
            route(&r, VitaPacket::new(vita::CLASS_OPUS, id).count(count).payload(&[9; 8]).build());
        }
        route(&r, VitaPacket::new(vita::CLASS_OPUS, 0x0A00_0001).payload(&[9; 8]).build());

        let opus = r.objects.opus_streams.get(id).unwrap();
        assert_eq!(opus.errors(), 1);
        assert_eq!(opus.endpoint.packets, 3);
        assert!(!r.detach_sink(id));
    }
}
