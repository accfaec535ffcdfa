//! One control connection to one radio.
//!
//! A [`Connection`] owns the command channel, the remote-object store, the
//! read loop and the background workers (meter, FFT, keepalive, network
//! quality). Teardown runs at most once no matter how many paths ask for it
//! concurrently: the read loop on EOF or error, the keepalive on silence,
//! the discovery registry on removal, or the application.
//!
//! Background tasks hold only weak references to the connection, so
//! dropping the last [`Connection`] handle does not leak them; dropping it
//! cancels the workers without publishing removal events.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sdrlink_core::{
    Clock, ConnectionState, Error, MessageSeverity, NetworkQuality, ProtocolVersion, RadioEvent,
    Result,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, LineFramer, RadioLine, RadioMessage, Reply};
use crate::demux::VitaDemux;
use crate::discovery::RadioRecord;
use crate::dispatch::{StatusDispatcher, publish_removed};
use crate::keepalive::{Liveness, spawn_keepalive};
use crate::objects::{ObjectStore, ProfileKind, RadioInfo};
use crate::pipeline::{Telemetry, WorkerContext, spawn_fft_worker, spawn_meter_worker};
use crate::quality::{CommandProbe, RoundTripProbe, spawn_quality_monitor};
use crate::registry::{DiscoveryRegistry, Session};
use crate::reply::{CommandChannel, ReplyHandler};
use crate::router::PacketRouter;

/// Broadcast capacity for [`RadioEvent`] subscribers.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Size of each socket read.
const READ_BUFFER_SIZE: usize = 8192;

/// Status categories subscribed to by default.
pub const DEFAULT_SUBSCRIPTIONS: &[&str] = &[
    "radio",
    "tx",
    "atu",
    "meter",
    "pan",
    "slice",
    "audio_stream",
    "daxiq",
    "dax",
    "client",
];

/// Options for one connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Program name sent with `client program`.
    pub client_name: String,
    /// Identify as a GUI client (`client gui`).
    pub gui: bool,
    /// Send one `sub <category> all` per entry in `subscriptions`.
    pub auto_subscribe: bool,
    pub subscriptions: Vec<String>,
    /// Send commands as `CD<seq>|...` so replies carry debug text.
    pub verbose_commands: bool,
    /// Port advertised with `client udpport` when no demultiplexer is attached.
    pub udp_port: Option<u16>,
    /// Command port; defaults to the port the radio announced.
    pub tcp_port: Option<u16>,
    /// Run the network quality monitor.
    pub network_monitor: bool,
    /// Log teardown at `info` instead of `debug`.
    pub log_disconnect: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_name: "sdrlink".to_string(),
            gui: false,
            auto_subscribe: true,
            subscriptions: DEFAULT_SUBSCRIPTIONS.iter().map(|s| s.to_string()).collect(),
            verbose_commands: false,
            udp_port: None,
            tcp_port: None,
            network_monitor: true,
            log_disconnect: false,
        }
    }
}

/// Everything [`Connection::start`] needs besides the streams.
pub(crate) struct StartParts {
    pub record: RadioRecord,
    pub options: ConnectOptions,
    pub registry: Option<Arc<DiscoveryRegistry>>,
    pub demux: Option<Arc<VitaDemux>>,
    pub probe: Option<Arc<dyn RoundTripProbe>>,
    pub clock: Arc<dyn Clock>,
    pub events: broadcast::Sender<RadioEvent>,
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

struct ConnectionInner {
    record: RadioRecord,
    state: Mutex<ConnectionState>,
    connected: Arc<AtomicBool>,
    channel: Arc<CommandChannel>,
    objects: Arc<ObjectStore>,
    dispatcher: StatusDispatcher,
    telemetry: Arc<Telemetry>,
    router: Arc<PacketRouter>,
    events: broadcast::Sender<RadioEvent>,
    liveness: Arc<Liveness>,
    handle: AtomicU32,
    version: Mutex<Option<ProtocolVersion>>,
    quality: Arc<Mutex<(NetworkQuality, i64)>>,
    cancel: CancellationToken,
    registry: Option<Arc<DiscoveryRegistry>>,
    demux: Option<Arc<VitaDemux>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    log_disconnect: bool,
}

/// A live control connection.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Run the handshake over `reader`/`writer` and start every worker.
    pub(crate) async fn start<R, W>(reader: R, writer: W, parts: StartParts) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let StartParts {
            record,
            options,
            registry,
            demux,
            probe,
            clock,
            events,
        } = parts;

        let objects = Arc::new(ObjectStore::new());
        let telemetry = Arc::new(Telemetry::new());
        let channel = Arc::new(CommandChannel::new(writer, options.verbose_commands));
        let router = Arc::new(PacketRouter::new(
            Arc::clone(&objects),
            Arc::clone(&telemetry),
            events.clone(),
        ));

        let inner = Arc::new(ConnectionInner {
            record,
            state: Mutex::new(ConnectionState::Connecting),
            connected: Arc::new(AtomicBool::new(true)),
            channel,
            dispatcher: StatusDispatcher::new(Arc::clone(&objects), events.clone()),
            objects,
            telemetry,
            router,
            events,
            liveness: Arc::new(Liveness::new(clock)),
            handle: AtomicU32::new(0),
            version: Mutex::new(None),
            quality: Arc::new(Mutex::new((NetworkQuality::Off, -1))),
            cancel: CancellationToken::new(),
            registry,
            demux,
            tasks: Mutex::new(Vec::new()),
            log_disconnect: options.log_disconnect,
        });

        tracing::debug!(radio = %inner.record, "Starting connection");

        if let Some(demux) = &inner.demux {
            demux.register(inner.record.ip, Arc::clone(&inner.router));
        }

        let read_task = tokio::spawn(read_loop(
            reader,
            Arc::downgrade(&inner),
            inner.cancel.clone(),
        ));
        inner.tasks.lock().push(read_task);

        inner.handshake(&options).await;
        inner.spawn_workers(probe, options.network_monitor);

        if let Some(registry) = &inner.registry {
            let session: Weak<dyn Session> = Arc::downgrade(&inner) as Weak<dyn Session>;
            if !registry.attach_session(&inner.record.key(), session) {
                tracing::debug!(radio = %inner.record, "Radio not in discovery registry");
            }
        }

        {
            let mut state = inner.state.lock();
            if *state != ConnectionState::Connecting {
                return Err(Error::ConnectionLost);
            }
            *state = ConnectionState::Connected;
        }
        let _ = inner.events.send(RadioEvent::Connected);
        tracing::debug!(radio = %inner.record, "Connected");

        Ok(Self { inner })
    }

    pub fn record(&self) -> &RadioRecord {
        &self.inner.record
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.inner.events.subscribe()
    }

    /// Client handle assigned by the radio, once its `H` line arrived.
    pub fn handle(&self) -> Option<u32> {
        match self.inner.handle.load(Ordering::SeqCst) {
            0 => None,
            h => Some(h),
        }
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        *self.inner.version.lock()
    }

    pub fn network_quality(&self) -> NetworkQuality {
        self.inner.quality.lock().0
    }

    /// Latest probe round trip in milliseconds, -1 when unknown or failed.
    pub fn rtt_ms(&self) -> i64 {
        self.inner.quality.lock().1
    }

    /// The synchronized remote objects.
    pub fn objects(&self) -> &Arc<ObjectStore> {
        &self.inner.objects
    }

    /// Snapshot of the handshake information replies.
    pub fn radio_info(&self) -> RadioInfo {
        self.inner.objects.info.lock().clone()
    }

    pub fn meter_errors(&self) -> u64 {
        self.inner.telemetry.meter_errors()
    }

    /// Receive the raw payloads of one audio, IQ, opus or waterfall stream.
    pub fn attach_stream_sink(&self, stream_id: u32, sink: mpsc::Sender<Bytes>) {
        self.inner.router.attach_sink(stream_id, sink);
    }

    pub fn detach_stream_sink(&self, stream_id: u32) -> bool {
        self.inner.router.detach_sink(stream_id)
    }

    /// Send a command without waiting. Returns its sequence number, or 0.
    pub async fn send_command(&self, text: &str) -> u32 {
        self.inner.channel.send_command(text).await
    }

    /// Send a command and run `handler` with its reply. Returns the sequence number, or 0.
    pub async fn send_reply_command(&self, text: &str, handler: ReplyHandler) -> u32 {
        self.inner.channel.send_reply_command(text, handler).await
    }

    /// Send a command and await its reply.
    pub async fn command(&self, text: &str) -> Result<Reply> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.inner.channel.command(text).await
    }

    pub fn pending_replies(&self) -> usize {
        self.inner.channel.pending_count()
    }

    /// Tear the connection down. Safe to call any number of times.
    pub async fn disconnect(&self) {
        self.inner.teardown().await;
    }

    /// Wait for every background task to finish after teardown.
    pub async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            self.inner.cancel.cancel();
            self.inner.telemetry.wake_all();
            if let Some(demux) = &self.inner.demux {
                demux.deregister(self.inner.record.ip, &self.inner.router);
            }
            if let Some(registry) = &self.inner.registry {
                registry.detach_session(&self.inner.record.key());
            }
        }
    }
}

impl ConnectionInner {
    async fn handshake(&self, options: &ConnectOptions) {
        let ch = &self.channel;
        ch.send_command(&codec::cmd_client_program(&options.client_name)).await;
        if options.gui {
            ch.send_command(&codec::cmd_client_gui()).await;
        }
        if options.auto_subscribe {
            for category in &options.subscriptions {
                ch.send_command(&codec::cmd_subscribe(category)).await;
            }
        }

        self.request_info(codec::cmd_info(), "info", RadioInfo::apply_info).await;
        self.request_info(codec::cmd_version(), "version", RadioInfo::apply_versions).await;
        self.request_info(codec::cmd_ant_list(), "ant list", RadioInfo::set_antennas).await;
        self.request_info(codec::cmd_mic_list(), "mic list", RadioInfo::set_microphones).await;
        for kind in ProfileKind::ALL {
            self.request_info(
                codec::cmd_profile_info(kind.as_str()),
                "profile",
                move |info: &mut RadioInfo, message: &str| info.set_profiles(kind, message),
            )
            .await;
        }

        let updating = match &self.registry {
            Some(registry) => registry
                .get(&self.record.key())
                .map_or(self.record.updating, |r| r.updating),
            None => self.record.updating,
        };
        if updating {
            tracing::debug!(radio = %self.record, "Radio update pending, disabling persistence");
            ch.send_command(&codec::cmd_persistence_off()).await;
        }

        let udp_port = self.demux.as_ref().map(|d| d.local_port()).or(options.udp_port);
        if let Some(port) = udp_port {
            ch.send_command(&codec::cmd_client_udpport(port)).await;
        }
        ch.send_command(&codec::cmd_keepalive_enable()).await;
    }

    async fn request_info<F>(&self, command: String, what: &'static str, apply: F)
    where
        F: FnOnce(&mut RadioInfo, &str) + Send + 'static,
    {
        let objects = Arc::clone(&self.objects);
        let handler: ReplyHandler = Box::new(move |reply| {
            if reply.code == 0 {
                apply(&mut objects.info.lock(), &reply.message);
            } else {
                tracing::debug!(request = what, code = format!("0x{:08X}", reply.code), "Info request failed");
            }
        });
        self.channel.send_reply_command(&command, handler).await;
    }

    fn spawn_workers(self: &Arc<Self>, probe: Option<Arc<dyn RoundTripProbe>>, network_monitor: bool) {
        let ctx = WorkerContext {
            telemetry: Arc::clone(&self.telemetry),
            objects: Arc::clone(&self.objects),
            events: self.events.clone(),
            connected: Arc::clone(&self.connected),
        };

        let mut tasks = vec![
            spawn_keepalive(
                Arc::clone(&self.channel),
                Arc::clone(&self.liveness),
                Arc::new(LinkWatch(Arc::downgrade(self))),
                self.cancel.clone(),
            ),
            spawn_meter_worker(ctx.clone()),
            spawn_fft_worker(ctx),
        ];

        if network_monitor {
            let probe = probe
                .unwrap_or_else(|| Arc::new(CommandProbe::new(Arc::clone(&self.channel))));
            let telemetry = Arc::clone(&self.telemetry);
            let objects = Arc::clone(&self.objects);
            let quality = Arc::clone(&self.quality);
            tasks.push(spawn_quality_monitor(
                probe,
                move || telemetry.meter_errors() + objects.stream_errors(),
                move |q, rtt| *quality.lock() = (q, rtt),
                self.events.clone(),
                self.cancel.clone(),
            ));
        }

        self.tasks.lock().extend(tasks);
    }

    fn handle_line(&self, line: &str) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        self.liveness.touch();
        if line.is_empty() {
            return;
        }

        match codec::parse_line(line) {
            Ok(RadioLine::Reply(reply)) => {
                self.channel.dispatch_reply(reply);
            }
            Ok(RadioLine::Status(status)) => {
                tracing::trace!(handle = format!("0x{:08X}", status.handle), payload = %status.payload, "Status");
                self.dispatcher.dispatch(&status.payload);
            }
            Ok(RadioLine::Handle(handle)) => {
                self.handle.store(handle, Ordering::SeqCst);
                tracing::debug!(handle = format!("0x{:08X}", handle), "Client handle assigned");
                let _ = self.events.send(RadioEvent::HandleAssigned { handle });
            }
            Ok(RadioLine::Version(version)) => {
                *self.version.lock() = Some(version);
                tracing::debug!(version = %version, "Protocol version");
                let _ = self.events.send(RadioEvent::ProtocolVersion { version });
            }
            Ok(RadioLine::Message(message)) => self.on_message(message),
            Ok(RadioLine::Unknown(line)) => {
                tracing::trace!(line = %line, "Unknown line from radio");
            }
            Err(e) => {
                tracing::debug!(error = %e, line = %line, "Dropping malformed line");
            }
        }
    }

    fn on_message(&self, message: RadioMessage) {
        let RadioMessage { id, severity, text } = message;
        match severity {
            MessageSeverity::Info => tracing::info!(id = format!("0x{:08X}", id), "Radio: {}", text),
            MessageSeverity::Warning => tracing::warn!(id = format!("0x{:08X}", id), "Radio: {}", text),
            MessageSeverity::Error | MessageSeverity::Fatal => {
                tracing::error!(id = format!("0x{:08X}", id), severity = %severity, "Radio: {}", text)
            }
        }
        let _ = self.events.send(RadioEvent::Message { id, severity, text });
    }

    async fn teardown(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    *state = ConnectionState::Disconnecting;
                }
                ConnectionState::Disconnecting | ConnectionState::Disconnected => return,
            }
        }
        disconnect_log!(self, radio = %self.record, "Disconnecting");

        self.connected.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.channel.close().await;
        let abandoned = self.channel.clear();
        if abandoned > 0 {
            tracing::debug!(abandoned = abandoned, "Abandoned pending replies");
        }

        publish_removed(&self.events, self.objects.close());
        self.telemetry.wake_all();

        if let Some(demux) = &self.demux {
            demux.deregister(self.record.ip, &self.router);
        }
        if let Some(registry) = &self.registry {
            registry.detach_session(&self.record.key());
        }

        *self.state.lock() = ConnectionState::Disconnected;
        let _ = self.events.send(RadioEvent::Disconnected);
        disconnect_log!(self, radio = %self.record, "Disconnected");
    }

    /// Keepalive timeout: tear down and forget the radio.
    async fn link_lost(&self) {
        self.teardown().await;
        if let Some(registry) = &self.registry {
            match registry.remove(&self.record.key()).await {
                Ok(Some(_)) => {
                    disconnect_log!(self, radio = %self.record, "Removed unresponsive radio");
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(error = %e, "Unresponsive radio kept"),
            }
        }
    }
}

#[async_trait]
impl Session for ConnectionInner {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.teardown().await;
    }
}

/// What the keepalive watchdog disconnects.
struct LinkWatch(Weak<ConnectionInner>);

#[async_trait]
impl Session for LinkWatch {
    fn is_connected(&self) -> bool {
        self.0.upgrade().is_some_and(|inner| inner.is_connected())
    }

    async fn disconnect(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.link_lost().await;
        }
    }
}

async fn read_loop<R>(mut reader: R, inner: Weak<ConnectionInner>, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut framer = LineFramer::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    'read: loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match read {
            Ok(0) => {
                disconnect_log!(inner, radio = %inner.record, "Connection closed by radio");
                inner.teardown().await;
                break;
            }
            Ok(n) => {
                framer.push(&buf[..n]);
                while let Some(line) = framer.next_line() {
                    if !inner.connected.load(Ordering::SeqCst) {
                        break 'read;
                    }
                    inner.handle_line(&line);
                }
            }
            Err(e) => {
                tracing::warn!(radio = %inner.record, error = %e, "Read error");
                inner.teardown().await;
                break;
            }
        }
    }
    tracing::debug!("Read loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdrlink_core::ManualClock;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    fn record() -> RadioRecord {
        let mut r = RadioRecord::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        r.serial = "1234-5678".into();
        r.model = "FLEX-6600".into();
        r
    }

    fn parts(options: ConnectOptions) -> StartParts {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        StartParts {
            record: record(),
            options,
            registry: None,
            demux: None,
            probe: None,
            clock: Arc::new(ManualClock::new()),
            events,
        }
    }

    fn quiet() -> ConnectOptions {
        ConnectOptions {
            auto_subscribe: false,
            network_monitor: false,
            ..ConnectOptions::default()
        }
    }

    /// A connection over in-memory pipes plus the radio's ends.
    async fn connect(options: ConnectOptions) -> (Connection, DuplexStream, BufReader<DuplexStream>) {
        let (radio_out, client_in) = tokio::io::duplex(64 * 1024);
        let (client_out, radio_in) = tokio::io::duplex(64 * 1024);
        let conn = Connection::start(client_in, client_out, parts(options))
            .await
            .unwrap();
        (conn, radio_out, BufReader::new(radio_in))
    }

    async fn next_command(reader: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn wait_until(mut f: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !f() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn handshake_commands_in_order() {
        let options = ConnectOptions {
            gui: true,
            subscriptions: vec!["slice".into(), "meter".into()],
            udp_port: Some(4993),
            network_monitor: false,
            ..ConnectOptions::default()
        };
        let (conn, _radio_out, mut radio_in) = connect(options).await;

        let mut commands = Vec::new();
        for _ in 0..13 {
            commands.push(next_command(&mut radio_in).await);
        }
        assert_eq!(
            commands,
            [
                "C1|client program sdrlink",
                "C2|client gui",
                "C3|sub slice all",
                "C4|sub meter all",
                "C5|info",
                "C6|version",
                "C7|ant list",
                "C8|mic list",
                "C9|profile global info",
                "C10|profile tx info",
                "C11|profile mic info",
                "C12|client udpport 4993",
                "C13|keepalive enable",
            ]
        );
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.pending_replies() >= 7);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn reply_runs_handler_and_clears_entry() {
        let (conn, mut radio_out, _radio_in) = connect(quiet()).await;
        let before = conn.pending_replies();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let seq = conn
            .send_reply_command(
                "ping",
                Box::new(move |reply| {
                    let _ = tx.send(reply);
                }),
            )
            .await;
        assert_ne!(seq, 0);

        radio_out
            .write_all(format!("R{seq}|00000000|0\n").as_bytes())
            .await
            .unwrap();
        let reply = rx.await.unwrap();
        assert_eq!((reply.sequence, reply.code, reply.message.as_str()), (seq, 0, "0"));
        assert_eq!(conn.pending_replies(), before);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn handle_version_and_info_replies() {
        let (conn, mut radio_out, _radio_in) = connect(quiet()).await;
        let mut events = conn.subscribe();

        radio_out
            .write_all(
                b"V1.4.0.0\nH2A3B4C5D\nR2|0|model=\"FLEX-6600\",chassis_serial=\"1234-5678\"\n\
                  R4|0|ANT1,ANT2\nM01000001|Client connected\n",
            )
            .await
            .unwrap();

        wait_until(|| conn.radio_info().antennas.len() == 2).await;
        assert_eq!(conn.handle(), Some(0x2A3B_4C5D));
        assert_eq!(conn.protocol_version(), Some(ProtocolVersion::new(1, 4, 0, 0)));
        assert_eq!(conn.radio_info().model(), Some("FLEX-6600"));

        let mut saw_message = false;
        while let Ok(event) = events.try_recv() {
            if let RadioEvent::Message { severity, text, .. } = event {
                assert_eq!(severity, MessageSeverity::Warning);
                assert_eq!(text, "Client connected");
                saw_message = true;
            }
        }
        assert!(saw_message);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn status_lines_reach_objects() {
        let (conn, mut radio_out, _radio_in) = connect(quiet()).await;
        let mut events = conn.subscribe();

        radio_out
            .write_all(b"S2A3B4C5D|slice 0 in_use=1 RF_frequency=7.074000 mode=DIGU\n")
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            RadioEvent::ObjectAdded {
                object: sdrlink_core::ObjectRef::Slice(0)
            }
        ));
        assert_eq!(conn.objects().slices.get(0).unwrap().mode, "DIGU");
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn concurrent_disconnects_remove_each_object_once() {
        let (conn, mut radio_out, _radio_in) = connect(quiet()).await;
        radio_out
            .write_all(b"S1|slice 0 in_use=1\nS1|slice 1 in_use=1\nS1|meter 3.nam=SWR#3.unit=SWR\n")
            .await
            .unwrap();
        wait_until(|| conn.objects().meters.is_announced(3)).await;

        let mut events = conn.subscribe();
        tokio::join!(conn.disconnect(), conn.disconnect(), conn.disconnect());

        let mut removed = Vec::new();
        let mut disconnected = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                RadioEvent::ObjectRemoved { object } => removed.push(object),
                RadioEvent::Disconnected => disconnected += 1,
                _ => {}
            }
        }
        removed.sort();
        assert_eq!(
            removed,
            vec![
                sdrlink_core::ObjectRef::Slice(0),
                sdrlink_core::ObjectRef::Slice(1),
                sdrlink_core::ObjectRef::Meter(3),
            ]
        );
        assert_eq!(disconnected, 1);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.send_command("ping").await, 0);
        assert!(matches!(conn.command("ping").await, Err(Error::NotConnected)));
        conn.join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_during_status_burst_leaves_nothing_behind() {
        let (conn, mut radio_out, _radio_in) = connect(quiet()).await;
        let mut events = conn.subscribe();

        let mut burst = String::new();
        for id in 1..=20_000u32 {
            burst.push_str(&format!("S1|meter {id}.nam=A#{id}.unit=dBm\n"));
        }
        let writer = tokio::spawn(async move {
            let _ = radio_out.write_all(burst.as_bytes()).await;
            radio_out
        });

        wait_until(|| !conn.objects().meters.is_empty()).await;
        conn.disconnect().await;
        conn.join().await;
        writer.abort();

        assert!(conn.objects().meters.is_empty());
        let mut disconnected = false;
        let mut added_after = 0;
        loop {
            match events.try_recv() {
                Ok(RadioEvent::Disconnected) => disconnected = true,
                Ok(RadioEvent::ObjectAdded { .. }) if disconnected => added_after += 1,
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => break,
            }
        }
        assert!(disconnected);
        assert_eq!(added_after, 0);
    }

    #[tokio::test]
    async fn radio_closing_socket_tears_down() {
        let (conn, radio_out, _radio_in) = connect(quiet()).await;
        let mut events = conn.subscribe();
        drop(radio_out);

        loop {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Ok(RadioEvent::Disconnected)) => break,
                Ok(Ok(_)) => continue,
                other => panic!("expected disconnect, got {:?}", other),
            }
        }
        assert!(!conn.is_connected());
        conn.join().await;
    }

    #[tokio::test]
    async fn verbose_mode_uses_cd_prefix() {
        let options = ConnectOptions {
            verbose_commands: true,
            ..quiet()
        };
        let (conn, _radio_out, mut radio_in) = connect(options).await;
        assert_eq!(next_command(&mut radio_in).await, "CD1|client program sdrlink");
        conn.disconnect().await;
    }
}
