//! Meter and FFT telemetry queues and their workers.
//!
//! The UDP path pushes raw meter and FFT payloads onto a [`TelemetryQueue`]
//! and returns at once. One worker per queue sleeps on the queue's wake
//! signal, drains everything queued, and goes back to sleep. A worker stops
//! when it is woken and finds the connection flag cleared, so teardown must
//! clear the flag and then call [`TelemetryQueue::wake`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use sdrlink_core::RadioEvent;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

use crate::objects::ObjectStore;
use crate::sequence::SequenceTracker;
use crate::vita49::{parse_fft_payload, parse_meter_payload};

/// Queue length treated as a stuck consumer.
pub const METER_QUEUE_HIGH_WATER: usize = 1000;

/// Entries kept after a stuck-consumer flush.
pub const METER_QUEUE_RESIDUAL: usize = 10;

/// One queued telemetry payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPacket {
    pub stream_id: Option<u32>,
    /// 4-bit packet counter from the preamble.
    pub packet_count: u8,
    pub payload: Bytes,
}

/// FIFO with a wake signal, optionally flushed when it grows too long.
pub struct TelemetryQueue<T> {
    name: &'static str,
    items: Mutex<VecDeque<T>>,
    wake: Notify,
    limits: Option<(usize, usize)>,
}

impl<T> TelemetryQueue<T> {
    /// An unbounded queue.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            items: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            limits: None,
        }
    }

    /// A queue that drops its oldest entries, down to `residual`, whenever
    /// it holds more than `high_water`.
    pub fn with_limits(name: &'static str, high_water: usize, residual: usize) -> Self {
        Self {
            limits: Some((high_water, residual)),
            ..Self::new(name)
        }
    }

    /// Append and wake the worker. Returns how many entries were flushed.
    pub fn push(&self, item: T) -> usize {
        let flushed = {
            let mut items = self.items.lock();
            items.push_back(item);
            match self.limits {
                Some((high_water, residual)) if items.len() > high_water => {
                    let excess = items.len() - residual;
                    items.drain(..excess);
                    excess
                }
                _ => 0,
            }
        };
        if flushed > 0 {
            tracing::warn!(queue = self.name, flushed = flushed, "Telemetry queue overflow, flushed");
        }
        self.wake.notify_one();
        flushed
    }

    /// Take everything queued, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake the worker without queueing anything.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Wait for the next wake. A wake sent while nobody waited is kept.
    pub async fn notified(&self) {
        self.wake.notified().await;
    }
}

/// Both telemetry queues of one connection and the meter loss counter.
pub struct Telemetry {
    pub meters: TelemetryQueue<TelemetryPacket>,
    pub fft: TelemetryQueue<TelemetryPacket>,
    meter_errors: AtomicU64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            meters: TelemetryQueue::with_limits(
                "meter",
                METER_QUEUE_HIGH_WATER,
                METER_QUEUE_RESIDUAL,
            ),
            fft: TelemetryQueue::new("fft"),
            meter_errors: AtomicU64::new(0),
        }
    }

    /// Out-of-sequence meter packets since connect.
    pub fn meter_errors(&self) -> u64 {
        self.meter_errors.load(Ordering::Relaxed)
    }

    /// Wake both workers, e.g. after clearing the connection flag.
    pub fn wake_all(&self) {
        self.meters.wake();
        self.fft.wake();
    }
}

/// Shared state a telemetry worker publishes into.
#[derive(Clone)]
pub struct WorkerContext {
    pub telemetry: Arc<Telemetry>,
    pub objects: Arc<ObjectStore>,
    pub events: broadcast::Sender<RadioEvent>,
    pub connected: Arc<AtomicBool>,
}

impl WorkerContext {
    fn running(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Spawn the meter worker.
pub fn spawn_meter_worker(ctx: WorkerContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sequence = SequenceTracker::new();
        loop {
            ctx.telemetry.meters.notified().await;
            if !ctx.running() {
                break;
            }
            for packet in ctx.telemetry.meters.drain() {
                process_meter_packet(&ctx, &mut sequence, &packet);
            }
        }
        tracing::debug!("Meter worker stopped");
    })
}

fn process_meter_packet(ctx: &WorkerContext, sequence: &mut SequenceTracker, packet: &TelemetryPacket) {
    let expected = sequence.expected();
    if !sequence.observe(packet.packet_count) {
        ctx.telemetry.meter_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            expected = ?expected,
            actual = packet.packet_count,
            "Meter packet out of sequence"
        );
    }

    let readings = match parse_meter_payload(&packet.payload) {
        Ok(readings) => readings,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping meter packet");
            return;
        }
    };

    for reading in readings {
        match ctx.objects.meters.with_mut(reading.id, |m| m.update_raw(reading.raw)) {
            Some(value) => {
                let _ = ctx.events.send(RadioEvent::MeterUpdated {
                    id: reading.id,
                    value,
                });
            }
            None => tracing::trace!(id = reading.id, "Reading for unknown meter"),
        }
    }
}

/// Spawn the FFT worker.
pub fn spawn_fft_worker(ctx: WorkerContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            ctx.telemetry.fft.notified().await;
            if !ctx.running() {
                break;
            }
            for packet in ctx.telemetry.fft.drain() {
                process_fft_packet(&ctx, &packet);
            }
        }
        tracing::debug!("FFT worker stopped");
    })
}

fn process_fft_packet(ctx: &WorkerContext, packet: &TelemetryPacket) {
    let Some(stream_id) = packet.stream_id else {
        tracing::trace!("FFT packet without stream id");
        return;
    };
    let fft = match parse_fft_payload(&packet.payload) {
        Ok(fft) => fft,
        Err(e) => {
            tracing::debug!(stream_id = format!("0x{:08X}", stream_id), error = %e, "Dropping FFT packet");
            return;
        }
    };

    match ctx
        .objects
        .panadapters
        .with_mut(stream_id, |pan| pan.add_fft(packet.packet_count, &fft))
    {
        Some(Some((frame_index, bins))) => {
            tracing::trace!(stream_id = format!("0x{:08X}", stream_id), frame_index = frame_index, "FFT frame complete");
            let _ = ctx.events.send(RadioEvent::PanadapterFrame {
                stream_id,
                frame_index,
                bins,
            });
        }
        Some(None) => {}
        None => tracing::trace!(stream_id = format!("0x{:08X}", stream_id), "FFT for unknown panadapter"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Update;
    use sdrlink_test_harness::vita;
    use std::time::Duration;

    fn context() -> (WorkerContext, broadcast::Receiver<RadioEvent>) {
        let (events, rx) = broadcast::channel(64);
        let ctx = WorkerContext {
            telemetry: Arc::new(Telemetry::new()),
            objects: Arc::new(ObjectStore::new()),
            events,
            connected: Arc::new(AtomicBool::new(true)),
        };
        (ctx, rx)
    }

    fn meter_packet(count: u8, readings: &[(u16, i16)]) -> TelemetryPacket {
        TelemetryPacket {
            stream_id: Some(vita::METER_STREAM_ID),
            packet_count: count,
            payload: Bytes::from(vita::meter_payload(readings)),
        }
    }

    #[test]
    fn queue_flushes_to_residual_past_high_water() {
        let q = TelemetryQueue::with_limits("test", 5, 2);
        for i in 0..5 {
            assert_eq!(q.push(i), 0);
        }
        assert_eq!(q.push(5), 4);
        assert_eq!(q.drain(), vec![4, 5]);
        assert!(q.is_empty());
    }

    #[test]
    fn unbounded_queue_never_flushes() {
        let q = TelemetryQueue::new("test");
        for i in 0..2000 {
            assert_eq!(q.push(i), 0);
        }
        assert_eq!(q.len(), 2000);
    }

    #[test]
    fn meter_processing_scales_and_counts_loss() {
        let (ctx, mut rx) = context();
        ctx.objects
            .meters
            .apply_status(7, Update::Fields(vec![("nam", "LEVEL"), ("unit", "dBm")]));

        let mut seq = SequenceTracker::new();
        process_meter_packet(&ctx, &mut seq, &meter_packet(0, &[(7, -128 * 50)]));
        process_meter_packet(&ctx, &mut seq, &meter_packet(1, &[(7, -128 * 40), (99, 5)]));
        process_meter_packet(&ctx, &mut seq, &meter_packet(3, &[(7, 0)]));

        assert_eq!(ctx.telemetry.meter_errors(), 1);
        assert_eq!(seq.expected(), Some(4));

        let mut values = Vec::new();
        while let Ok(RadioEvent::MeterUpdated { id, value }) = rx.try_recv() {
            values.push((id, value));
        }
        assert_eq!(values, vec![(7, -50.0), (7, -40.0), (7, 0.0)]);
        assert_eq!(ctx.objects.meters.get(7).unwrap().value, 0.0);
    }

    #[test]
    fn malformed_meter_payload_still_counts_sequence() {
        let (ctx, _rx) = context();
        let mut seq = SequenceTracker::new();
        let packet = TelemetryPacket {
            stream_id: None,
            packet_count: 9,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        process_meter_packet(&ctx, &mut seq, &packet);
        assert_eq!(seq.expected(), Some(10));
        assert_eq!(ctx.telemetry.meter_errors(), 0);
    }

    #[test]
    fn fft_frame_published_when_complete() {
        let (ctx, mut rx) = context();
        let pan_id = 0x4000_0000;
        ctx.objects
            .panadapters
            .apply_status(pan_id, Update::Fields(vec![("x_pixels", "4")]));

        let part = |start: u32, bins: &[u16]| TelemetryPacket {
            stream_id: Some(pan_id),
            packet_count: 0,
            payload: Bytes::from(vita::fft_payload(start, 4, 9, bins)),
        };
        process_fft_packet(&ctx, &part(0, &[1, 2]));
        assert!(rx.try_recv().is_err());
        process_fft_packet(&ctx, &part(2, &[3, 4]));

        match rx.try_recv() {
            Ok(RadioEvent::PanadapterFrame {
                stream_id,
                frame_index,
                bins,
            }) => {
                assert_eq!(stream_id, pan_id);
                assert_eq!(frame_index, 9);
                assert_eq!(&bins[..], &[1, 2, 3, 4]);
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn workers_drain_and_stop_on_wake() {
        let (ctx, mut rx) = context();
        ctx.objects
            .meters
            .apply_status(1, Update::Fields(vec![("nam", "SWR"), ("unit", "SWR")]));

        let meter = spawn_meter_worker(ctx.clone());
        let fft = spawn_fft_worker(ctx.clone());

        ctx.telemetry.meters.push(meter_packet(0, &[(1, 192)]));
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("meter event")
            .unwrap();
        assert!(matches!(event, RadioEvent::MeterUpdated { id: 1, value } if value == 1.5));

        ctx.connected.store(false, Ordering::SeqCst);
        ctx.telemetry.wake_all();
        tokio::time::timeout(Duration::from_secs(2), meter)
            .await
            .expect("meter worker exits")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), fft)
            .await
            .expect("fft worker exits")
            .unwrap();
    }
}
