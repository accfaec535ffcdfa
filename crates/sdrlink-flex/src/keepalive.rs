//! Link liveness and the keepalive watchdog.
//!
//! Any inbound line counts as a sign of life, not only ping replies, so a
//! client busy processing a burst of status is never mistaken for a dead
//! link. The watchdog pings once a second and disconnects the session when
//! nothing has arrived for [`KEEPALIVE_TIMEOUT`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sdrlink_core::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::cmd_ping;
use crate::registry::{RADIO_TIMEOUT, Session};
use crate::reply::CommandChannel;

/// Ping period.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Silence after which the link is declared dead.
pub const KEEPALIVE_TIMEOUT: Duration = RADIO_TIMEOUT;

/// Time of the last inbound traffic, measured on a monotonic clock.
pub struct Liveness {
    clock: Arc<dyn Clock>,
    last_heard_ms: AtomicU64,
}

impl Liveness {
    /// Start counting from now.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now().as_millis() as u64;
        Self {
            clock,
            last_heard_ms: AtomicU64::new(now),
        }
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        let now = self.clock.now().as_millis() as u64;
        self.last_heard_ms.store(now, Ordering::Relaxed);
    }

    pub fn silence(&self) -> Duration {
        let now = self.clock.now().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_heard_ms.load(Ordering::Relaxed)))
    }

    pub fn is_expired(&self) -> bool {
        self.silence() > KEEPALIVE_TIMEOUT
    }
}

/// Spawn the watchdog for one connection.
///
/// Ends when `cancel` fires or after it has disconnected `session`.
pub fn spawn_keepalive(
    channel: Arc<CommandChannel>,
    liveness: Arc<Liveness>,
    session: Arc<dyn Session>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if liveness.is_expired() {
                tracing::warn!(
                    silence_ms = liveness.silence().as_millis() as u64,
                    "Keepalive timeout, disconnecting"
                );
                session.disconnect().await;
                break;
            }

            let on_reply = Arc::clone(&liveness);
            channel
                .send_reply_command(
                    &cmd_ping(),
                    Box::new(move |reply| {
                        if reply.code == 0 {
                            on_reply.touch();
                        }
                    }),
                )
                .await;
        }
        tracing::debug!("Keepalive stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Reply;
    use async_trait::async_trait;
    use sdrlink_core::ManualClock;
    use std::sync::atomic::AtomicBool;
    use tokio::io::AsyncReadExt;

    struct FlagSession(AtomicBool);

    #[async_trait]
    impl Session for FlagSession {
        fn is_connected(&self) -> bool {
            !self.0.load(Ordering::SeqCst)
        }

        async fn disconnect(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn liveness_expires_after_timeout() {
        let clock = Arc::new(ManualClock::new());
        let live = Liveness::new(clock.clone());
        clock.advance(Duration::from_secs(15));
        assert!(!live.is_expired());
        clock.advance(Duration::from_millis(1));
        assert!(live.is_expired());
        live.touch();
        assert_eq!(live.silence(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn pings_every_second_and_replies_refresh() {
        let (client, mut server) = tokio::io::duplex(4096);
        let channel = Arc::new(CommandChannel::new(client, false));
        let clock = Arc::new(ManualClock::new());
        let live = Arc::new(Liveness::new(clock.clone()));
        let session = Arc::new(FlagSession(AtomicBool::new(false)));
        let cancel = CancellationToken::new();

        let task = spawn_keepalive(
            Arc::clone(&channel),
            Arc::clone(&live),
            session.clone(),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"C1|ping\nC2|ping\n");

        clock.advance(Duration::from_secs(10));
        channel.dispatch_reply(Reply {
            sequence: 2,
            code: 0,
            message: String::new(),
            debug: None,
        });
        assert_eq!(live.silence(), Duration::ZERO);

        cancel.cancel();
        task.await.unwrap();
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_disconnects_session() {
        let (client, _server) = tokio::io::duplex(4096);
        let channel = Arc::new(CommandChannel::new(client, false));
        let clock = Arc::new(ManualClock::new());
        let live = Arc::new(Liveness::new(clock.clone()));
        let session = Arc::new(FlagSession(AtomicBool::new(false)));

        let task = spawn_keepalive(channel, live, session.clone(), CancellationToken::new());
        clock.advance(Duration::from_secs(16));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        task.await.unwrap();
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ping_does_not_refresh() {
        let clock = Arc::new(ManualClock::new());
        let live = Arc::new(Liveness::new(clock.clone()));
        clock.advance(Duration::from_secs(3));

        let (client, _server) = tokio::io::duplex(4096);
        let channel = CommandChannel::new(client, false);
        let on_reply = Arc::clone(&live);
        let seq = channel
            .send_reply_command(
                "ping",
                Box::new(move |reply| {
                    if reply.code == 0 {
                        on_reply.touch();
                    }
                }),
            )
            .await;
        channel.dispatch_reply(Reply {
            sequence: seq,
            code: 0x5000_0001,
            message: String::new(),
            debug: None,
        });
        assert_eq!(live.silence(), Duration::from_secs(3));
    }
}
