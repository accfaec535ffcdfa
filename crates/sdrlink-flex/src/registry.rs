//! The set of radios known on the LAN.
//!
//! [`DiscoveryRegistry`] merges announcements from an
//! [`AnnouncementSource`], evicts radios that stop announcing, and tells
//! subscribers when radios come and go. A connected radio is aged by its
//! keepalive instead of by discovery, so the sweep skips it; a radio in the
//! middle of a firmware update is never evicted or removed.
//!
//! The registry is an explicit instance with an injected [`Clock`], so
//! tests drive time with [`ManualClock`](sdrlink_core::ManualClock).

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sdrlink_core::{Clock, Error, MonotonicClock, ProtocolVersion, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::discovery::{AnnouncementSource, RadioKey, RadioRecord};

/// A radio not heard from for this long is evicted by the sweep.
pub const RADIO_TIMEOUT: Duration = Duration::from_secs(15);

/// Period of the eviction sweep.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Membership change published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(RadioRecord),
    Removed(RadioRecord),
}

/// A live control connection attached to a registry entry.
#[async_trait]
pub trait Session: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Tear the connection down. Must be idempotent.
    async fn disconnect(&self);
}

struct Entry {
    record: RadioRecord,
    session: Option<Weak<dyn Session>>,
}

impl Entry {
    fn live_session(&self) -> Option<Arc<dyn Session>> {
        self.session.as_ref().and_then(Weak::upgrade)
    }

    fn is_connected(&self) -> bool {
        self.live_session().is_some_and(|s| s.is_connected())
    }
}

macro_rules! discovery_log {
    ($self:expr, $($arg:tt)+) => {
        if $self.log_discovery {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

macro_rules! disconnect_log {
    ($self:expr, $($arg:tt)+) => {
        if $self.log_disconnect {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Registry of discovered radios.
pub struct DiscoveryRegistry {
    entries: Mutex<Vec<Entry>>,
    /// Serial substrings; when non-empty, other radios are ignored.
    filter: Vec<String>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<DiscoveryEvent>,
    log_discovery: bool,
    log_disconnect: bool,
}

impl DiscoveryRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(&EngineConfig::default(), clock)
    }

    /// Registry using the serial filter and log flags from `config`.
    pub fn with_config(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            filter: config.serial_filter.clone(),
            clock,
            events,
            log_discovery: config.log_discovery,
            log_disconnect: config.log_disconnect,
        }
    }

    /// Registry on the monotonic clock.
    pub fn with_monotonic_clock(config: &EngineConfig) -> Self {
        Self::with_config(config, Arc::new(MonotonicClock::new()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    fn passes_filter(&self, serial: &str) -> bool {
        self.filter.is_empty() || self.filter.iter().any(|f| serial.contains(f.as_str()))
    }

    /// Merge one announcement. Returns `true` if the radio was new.
    pub fn on_announcement(&self, mut record: RadioRecord) -> bool {
        if !self.passes_filter(&record.serial) {
            tracing::trace!(serial = %record.serial, "Announcement rejected by serial filter");
            return false;
        }

        let now = self.clock.now();
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.iter_mut().find(|e| e.record.same_radio(&record)) {
                discovery_log!(self, radio = %record, "Announcement matches known radio");
                merge(&mut entry.record, &record);
                entry.record.last_seen = now;
                return false;
            }

            record.last_seen = now;
            entries.push(Entry {
                record: record.clone(),
                session: None,
            });
        }

        discovery_log!(self, radio = %record, "Radio added");
        let _ = self.events.send(DiscoveryEvent::Added(record));
        true
    }

    /// Evict radios that stopped announcing. Returns the evicted records.
    pub async fn sweep(&self) -> Vec<RadioRecord> {
        let now = self.clock.now();
        let expired: Vec<RadioKey> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|e| !e.record.updating && !e.is_connected())
                .filter(|e| now.saturating_sub(e.record.last_seen) > RADIO_TIMEOUT)
                .map(|e| e.record.key())
                .collect()
        };

        let mut removed = Vec::with_capacity(expired.len());
        for key in expired {
            if let Ok(Some(record)) = self.remove(&key).await {
                disconnect_log!(self, radio = %record, "Radio timed out waiting on discovery");
                removed.push(record);
            }
        }
        removed
    }

    /// Remove a radio, disconnecting it if connected.
    ///
    /// Refused while the radio is updating. Returns `Ok(None)` if the radio
    /// is not registered.
    pub async fn remove(&self, key: &RadioKey) -> Result<Option<RadioRecord>> {
        let (record, session) = {
            let mut entries = self.entries.lock();
            let Some(pos) = entries.iter().position(|e| &e.record.key() == key) else {
                return Ok(None);
            };
            if entries[pos].record.updating {
                return Err(Error::Refused(format!(
                    "radio {} is updating",
                    entries[pos].record.serial
                )));
            }
            let entry = entries.remove(pos);
            let session = entry.live_session().filter(|s| s.is_connected());
            (entry.record, session)
        };

        discovery_log!(self, radio = %record, "Radio removed");
        let _ = self.events.send(DiscoveryEvent::Removed(record.clone()));

        if let Some(session) = session {
            disconnect_log!(self, radio = %record, "Disconnecting removed radio");
            session.disconnect().await;
        }
        Ok(Some(record))
    }

    /// Remove every radio and disconnect any live sessions.
    pub async fn close_session(&self) {
        let drained: Vec<Entry> = std::mem::take(&mut *self.entries.lock());
        for entry in drained {
            let session = entry.live_session();
            let _ = self.events.send(DiscoveryEvent::Removed(entry.record));
            if let Some(session) = session.filter(|s| s.is_connected()) {
                session.disconnect().await;
            }
        }
    }

    pub fn get(&self, key: &RadioKey) -> Option<RadioRecord> {
        self.entries
            .lock()
            .iter()
            .find(|e| &e.record.key() == key)
            .map(|e| e.record.clone())
    }

    /// A consistent copy of every record.
    pub fn snapshot(&self) -> Vec<RadioRecord> {
        self.entries.lock().iter().map(|e| e.record.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark a radio as updating firmware. Returns `false` if unknown.
    pub fn set_updating(&self, key: &RadioKey, updating: bool) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| &e.record.key() == key) {
            Some(entry) => {
                entry.record.updating = updating;
                true
            }
            None => false,
        }
    }

    /// Whether the radio has a live connected session.
    pub fn is_connected(&self, key: &RadioKey) -> bool {
        self.entries
            .lock()
            .iter()
            .find(|e| &e.record.key() == key)
            .is_some_and(Entry::is_connected)
    }

    /// Attach a connection to a registered radio. Returns `false` if unknown.
    pub fn attach_session(&self, key: &RadioKey, session: Weak<dyn Session>) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| &e.record.key() == key) {
            Some(entry) => {
                entry.session = Some(session);
                true
            }
            None => false,
        }
    }

    pub fn detach_session(&self, key: &RadioKey) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| &e.record.key() == key) {
            entry.session = None;
        }
    }

    /// Run [`sweep`](Self::sweep) every [`SWEEP_INTERVAL`] until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.sweep().await;
                    }
                }
            }
            tracing::debug!("Discovery sweep stopped");
        })
    }

    /// Feed announcements from `source` until it ends or is cancelled.
    pub fn spawn_ingest<S>(self: &Arc<Self>, mut source: S, cancel: CancellationToken) -> JoinHandle<()>
    where
        S: AnnouncementSource + 'static,
    {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = source.next_announcement() => match next {
                        Some(record) => {
                            registry.on_announcement(record);
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("Discovery ingest stopped");
        })
    }
}

/// Update the mutable fields of a known radio from a fresh announcement.
fn merge(existing: &mut RadioRecord, incoming: &RadioRecord) {
    let v1 = ProtocolVersion::V1_0_0_0;

    if existing.discovery_protocol_version <= v1 && incoming.discovery_protocol_version > v1 {
        existing.discovery_protocol_version = incoming.discovery_protocol_version;
        existing.callsign = incoming.callsign.clone();
        existing.nickname = incoming.nickname.clone();
        existing.serial = incoming.serial.clone();
    }

    if existing.version != incoming.version {
        tracing::debug!(
            serial = %existing.serial,
            from = %existing.version,
            to = %incoming.version,
            "Radio firmware version changed"
        );
        existing.version = incoming.version;
        existing.updating = false;
    }

    if incoming.discovery_protocol_version > v1 {
        if existing.status != incoming.status {
            existing.status = incoming.status.clone();
        }
        existing.inuse_ip = incoming.inuse_ip.clone();
        existing.inuse_host = incoming.inuse_host.clone();
    }
}
