//! Network quality classification.
//!
//! Once a second the monitor times a round trip and checks whether any
//! stream loss counter moved. Getting worse takes effect on the tick it is
//! seen. Getting better needs the same improvement to hold for
//! [`IMPROVEMENT_TICKS`] consecutive ticks.
//!
//! | Round trip | Loss this tick | Outcome |
//! |---|---|---|
//! | probe failed | - | `Off`, rtt -1 |
//! | >= 100 ms | - | `Poor` |
//! | 50..100 ms | no | capped at `Good`; below it, hold |
//! | 50..100 ms | yes | one level worse, capped at `Good` |
//! | < 50 ms | no | climb one level |
//! | < 50 ms | yes | one level worse |
//!
//! Leaving `Off` is immediate: `Poor` for a slow first probe, `Good`
//! otherwise (`Fair` with loss).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sdrlink_core::{NetworkQuality, RadioEvent};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec::cmd_ping;
use crate::reply::CommandChannel;

/// Probe period.
pub const QUALITY_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive qualifying ticks before an improvement is applied.
pub const IMPROVEMENT_TICKS: u32 = 5;

/// Round trips at or above this are `Poor`.
pub const POOR_RTT: Duration = Duration::from_millis(100);

/// Round trips at or above this are at best `Good`.
pub const GOOD_RTT: Duration = Duration::from_millis(50);

/// How long [`CommandProbe`] waits for its ping reply.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Measures one round trip to the radio. `None` means the probe failed.
#[async_trait]
pub trait RoundTripProbe: Send + Sync {
    async fn probe(&self) -> Option<Duration>;
}

/// Times a `ping` command through the reply channel.
pub struct CommandProbe {
    channel: Arc<CommandChannel>,
}

impl CommandProbe {
    pub fn new(channel: Arc<CommandChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl RoundTripProbe for CommandProbe {
    async fn probe(&self) -> Option<Duration> {
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();
        let seq = self
            .channel
            .send_reply_command(
                &cmd_ping(),
                Box::new(move |reply| {
                    let _ = tx.send(reply.code);
                }),
            )
            .await;
        if seq == 0 {
            return None;
        }

        match tokio::time::timeout(PROBE_TIMEOUT, rx).await {
            Ok(Ok(0)) => Some(started.elapsed()),
            Ok(Ok(code)) => {
                tracing::debug!(code = format!("0x{:08X}", code), "Ping probe rejected");
                None
            }
            Ok(Err(_)) => None,
            Err(_) => {
                self.channel.forget(seq);
                None
            }
        }
    }
}

/// The hysteresis state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityMonitor {
    quality: NetworkQuality,
    rtt_ms: i64,
    /// Level an improvement is heading for, and ticks left before applying it.
    improving: Option<(NetworkQuality, u32)>,
    last_errors: Option<u64>,
}

impl Default for QualityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl QualityMonitor {
    pub fn new() -> Self {
        Self {
            quality: NetworkQuality::Off,
            rtt_ms: -1,
            improving: None,
            last_errors: None,
        }
    }

    pub fn quality(&self) -> NetworkQuality {
        self.quality
    }

    /// Latest round trip in milliseconds, -1 after a failed probe.
    pub fn rtt_ms(&self) -> i64 {
        self.rtt_ms
    }

    /// Feed one tick. `errors` is the running total of loss counters.
    ///
    /// Returns the new level when it changed.
    pub fn tick(&mut self, rtt: Option<Duration>, errors: u64) -> Option<NetworkQuality> {
        let lost = self.last_errors.is_some_and(|last| errors > last);
        self.last_errors = Some(errors);

        let Some(rtt) = rtt else {
            self.rtt_ms = -1;
            self.improving = None;
            return self.set(NetworkQuality::Off);
        };
        self.rtt_ms = rtt.as_millis() as i64;

        if self.quality == NetworkQuality::Off {
            self.improving = None;
            let first = if rtt >= POOR_RTT {
                NetworkQuality::Poor
            } else if lost {
                NetworkQuality::Fair
            } else {
                NetworkQuality::Good
            };
            return self.set(first);
        }

        if rtt >= POOR_RTT {
            self.improving = None;
            return self.set(NetworkQuality::Poor);
        }

        let ceiling = if rtt >= GOOD_RTT {
            NetworkQuality::Good
        } else {
            NetworkQuality::Excellent
        };

        if lost {
            self.improving = None;
            return self.set(self.quality.worse().min(ceiling));
        }
        if self.quality > ceiling {
            self.improving = None;
            return self.set(ceiling);
        }
        if self.quality == ceiling || rtt >= GOOD_RTT {
            self.improving = None;
            return None;
        }

        let target = self.quality.better();
        let remaining = match self.improving {
            Some((pending, left)) if pending == target => left - 1,
            _ => IMPROVEMENT_TICKS - 1,
        };
        if remaining == 0 {
            self.improving = None;
            self.set(target)
        } else {
            self.improving = Some((target, remaining));
            None
        }
    }

    fn set(&mut self, quality: NetworkQuality) -> Option<NetworkQuality> {
        if quality == self.quality {
            return None;
        }
        tracing::debug!(from = %self.quality, to = %quality, rtt_ms = self.rtt_ms, "Network quality changed");
        self.quality = quality;
        Some(quality)
    }
}

/// Spawn the once-a-second monitor for one connection.
///
/// `errors` returns the current loss total across every tracked stream.
/// `on_change` stores each new level before it is published.
pub fn spawn_quality_monitor<E, C>(
    probe: Arc<dyn RoundTripProbe>,
    errors: E,
    on_change: C,
    events: broadcast::Sender<RadioEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    E: Fn() -> u64 + Send + 'static,
    C: Fn(NetworkQuality, i64) + Send + 'static,
{
    tokio::spawn(async move {
        let mut monitor = QualityMonitor::new();
        let mut ticker = tokio::time::interval(QUALITY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let rtt = tokio::select! {
                _ = cancel.cancelled() => break,
                rtt = probe.probe() => rtt,
            };

            if let Some(quality) = monitor.tick(rtt, errors()) {
                on_change(quality, monitor.rtt_ms());
                let _ = events.send(RadioEvent::NetworkQualityChanged {
                    quality,
                    rtt_ms: monitor.rtt_ms(),
                });
            }
        }
        tracing::debug!("Network quality monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Reply;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn ms(v: u64) -> Option<Duration> {
        Some(Duration::from_millis(v))
    }

    fn at(quality: NetworkQuality) -> QualityMonitor {
        let mut m = QualityMonitor::new();
        m.quality = quality;
        m.last_errors = Some(0);
        m
    }

    #[test]
    fn improvement_applies_on_fifth_tick() {
        let mut m = at(NetworkQuality::Good);
        for _ in 0..4 {
            assert_eq!(m.tick(ms(20), 0), None);
            assert_eq!(m.quality(), NetworkQuality::Good);
        }
        assert_eq!(m.tick(ms(20), 0), Some(NetworkQuality::VeryGood));
        for _ in 0..4 {
            assert_eq!(m.tick(ms(20), 0), None);
        }
        assert_eq!(m.tick(ms(20), 0), Some(NetworkQuality::Excellent));
        assert_eq!(m.tick(ms(20), 0), None);
    }

    #[test]
    fn slow_round_trip_is_immediately_poor() {
        let mut m = at(NetworkQuality::Excellent);
        assert_eq!(m.tick(ms(150), 0), Some(NetworkQuality::Poor));
        assert_eq!(m.rtt_ms(), 150);
    }

    #[test]
    fn failed_probe_is_off() {
        let mut m = at(NetworkQuality::VeryGood);
        assert_eq!(m.tick(None, 0), Some(NetworkQuality::Off));
        assert_eq!(m.rtt_ms(), -1);
    }

    #[test]
    fn medium_round_trip_caps_at_good() {
        let mut m = at(NetworkQuality::Excellent);
        assert_eq!(m.tick(ms(70), 0), Some(NetworkQuality::Good));
        assert_eq!(m.tick(ms(70), 0), None);
    }

    #[test]
    fn medium_round_trip_never_climbs() {
        let mut m = at(NetworkQuality::Poor);
        for _ in 0..12 {
            assert_eq!(m.tick(ms(70), 0), None);
        }
        assert_eq!(m.quality(), NetworkQuality::Poor);

        for _ in 0..4 {
            assert_eq!(m.tick(ms(20), 0), None);
        }
        assert_eq!(m.tick(ms(20), 0), Some(NetworkQuality::Fair));
    }

    #[test]
    fn loss_drops_one_level_and_resets_countdown() {
        let mut m = at(NetworkQuality::VeryGood);
        m.tick(ms(10), 0);
        m.tick(ms(10), 0);
        assert_eq!(m.tick(ms(10), 3), Some(NetworkQuality::Good));
        for _ in 0..4 {
            assert_eq!(m.tick(ms(10), 3), None);
        }
        assert_eq!(m.tick(ms(10), 3), Some(NetworkQuality::VeryGood));
    }

    #[test]
    fn interrupted_improvement_starts_over() {
        let mut m = at(NetworkQuality::Good);
        for _ in 0..3 {
            m.tick(ms(20), 0);
        }
        assert_eq!(m.tick(ms(70), 0), None);
        for _ in 0..4 {
            assert_eq!(m.tick(ms(20), 0), None);
        }
        assert_eq!(m.tick(ms(20), 0), Some(NetworkQuality::VeryGood));
    }

    #[test]
    fn leaving_off() {
        let mut m = QualityMonitor::new();
        assert_eq!(m.tick(ms(20), 0), Some(NetworkQuality::Good));
        let mut m = QualityMonitor::new();
        assert_eq!(m.tick(ms(200), 0), Some(NetworkQuality::Poor));
        let mut m = QualityMonitor::new();
        m.tick(None, 0);
        assert_eq!(m.tick(ms(20), 5), Some(NetworkQuality::Fair));
    }

    proptest! {
        #[test]
        fn never_improves_more_than_one_level_per_tick(
            ticks in proptest::collection::vec((prop::option::of(0u64..200), 0u64..3), 1..60)
        ) {
            let mut m = QualityMonitor::new();
            let mut errors = 0;
            for (rtt, lost) in ticks {
                let before = m.quality();
                errors += lost;
                m.tick(rtt.map(Duration::from_millis), errors);
                if before != NetworkQuality::Off {
                    prop_assert!(m.quality() <= before.better());
                }
                if rtt.is_some_and(|r| r >= 100) {
                    prop_assert_eq!(m.quality(), NetworkQuality::Poor);
                }
            }
        }

        #[test]
        fn improvement_needs_five_clean_ticks(start in 1usize..4, run in 0u32..IMPROVEMENT_TICKS) {
            let levels = [
                NetworkQuality::Poor,
                NetworkQuality::Fair,
                NetworkQuality::Good,
                NetworkQuality::VeryGood,
            ];
            let mut m = at(levels[start]);
            for _ in 0..run {
                m.tick(ms(10), 0);
            }
            prop_assert_eq!(m.quality(), levels[start]);
        }
    }

    struct ScriptedProbe(Mutex<VecDeque<Option<Duration>>>);

    #[async_trait]
    impl RoundTripProbe for ScriptedProbe {
        async fn probe(&self) -> Option<Duration> {
            self.0.lock().pop_front().flatten()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_publishes_changes() {
        let probe = Arc::new(ScriptedProbe(Mutex::new(
            [ms(20), ms(150), None].into_iter().collect(),
        )));
        let (events, mut rx) = broadcast::channel(8);
        let latest = Arc::new(Mutex::new(NetworkQuality::Off));
        let store = Arc::clone(&latest);
        let cancel = CancellationToken::new();
        let task = spawn_quality_monitor(
            probe,
            || 0,
            move |q, _| *store.lock() = q,
            events,
            cancel.clone(),
        );

        let mut seen = Vec::new();
        for _ in 0..2 {
            if let RadioEvent::NetworkQualityChanged { quality, rtt_ms } = rx.recv().await.unwrap() {
                seen.push((quality, rtt_ms));
            }
        }
        assert_eq!(
            seen,
            vec![(NetworkQuality::Good, 20), (NetworkQuality::Poor, 150)]
        );
        assert_eq!(*latest.lock(), NetworkQuality::Poor);
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn command_probe_times_ping() {
        let (client, _server) = tokio::io::duplex(4096);
        let channel = Arc::new(CommandChannel::new(client, false));
        let probe = CommandProbe::new(Arc::clone(&channel));

        let replier = Arc::clone(&channel);
        let answer = tokio::spawn(async move {
            while !replier.is_pending(1) {
                tokio::task::yield_now().await;
            }
            replier.dispatch_reply(Reply {
                sequence: 1,
                code: 0,
                message: "0".into(),
                debug: None,
            });
        });

        assert!(probe.probe().await.is_some());
        answer.await.unwrap();
        assert_eq!(channel.pending_count(), 0);
    }
}
