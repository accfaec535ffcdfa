// ---------------------------------------------------------------------------
// sdrlink test application -- CLI tool for exercising the protocol engine
// against real radios on the LAN.
//
// Usage:
//   sdrlink-test-app discover
//   sdrlink-test-app watch --duration 60
//   sdrlink-test-app --host 192.168.1.100 info
//   sdrlink-test-app --discover info
//   sdrlink-test-app --host 192.168.1.100 command "slice list"
//   sdrlink-test-app --host 192.168.1.100 objects --settle 2
//   sdrlink-test-app --host 192.168.1.100 monitor --duration 30 --meters
//
// Logging is controlled by RUST_LOG (e.g. RUST_LOG=sdrlink_flex=debug).
// ---------------------------------------------------------------------------

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sdrlink::RadioEvent;
use sdrlink::flex::discovery::{self, RadioRecord};
use sdrlink::flex::{
    Connection, ConnectionBuilder, DiscoveryEvent, DiscoveryListener, DiscoveryRegistry,
    EngineConfig, VitaDemux,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// sdrlink test application -- exercises the SmartSDR engine from the command line.
#[derive(Parser)]
#[command(name = "sdrlink-test-app", version, about)]
struct Cli {
    /// Radio IP address (e.g. 192.168.1.100).
    #[arg(long)]
    host: Option<IpAddr>,

    /// Discover a radio on the LAN and connect to the first one found.
    #[arg(long)]
    discover: bool,

    /// TCP command port (default: the announced port, 4992).
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Program name sent with `client program`.
    #[arg(long, default_value = "sdrlink-test-app")]
    client_name: String,

    /// Send commands as `CD<seq>|...` so replies carry debug text.
    #[arg(long)]
    verbose_commands: bool,

    /// Directory holding filter.txt / log_discovery.txt / log_disconnect.txt.
    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for discovery broadcasts for 3 seconds and list the radios heard.
    Discover,

    /// Keep a discovery registry running and print radios as they come and go.
    Watch {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Connect and print the handshake information.
    Info,

    /// Send one command and print its reply.
    Command {
        /// Command text, e.g. "slice list".
        text: String,
    },

    /// Connect, let status settle, and list the synchronized objects.
    Objects {
        /// Seconds to wait for status before listing.
        #[arg(long, default_value_t = 2)]
        settle: u64,
    },

    /// Subscribe to radio events and print them in real time.
    Monitor {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Also print meter updates and FFT frames.
        #[arg(long)]
        meters: bool,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    match &cli.config_dir {
        Some(dir) => EngineConfig::load_from_dir(dir)
            .with_context(|| format!("failed to load config from {}", dir.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn print_radio_table(radios: &[RadioRecord]) {
    println!(
        "{:<14}  {:<20}  {:<16}  {:<16}  {:<14}  Status",
        "Model", "Serial", "Nickname", "IP Address", "Firmware"
    );
    println!(
        "{:<14}  {:<20}  {:<16}  {:<16}  {:<14}  {}",
        "-".repeat(14),
        "-".repeat(20),
        "-".repeat(16),
        "-".repeat(16),
        "-".repeat(14),
        "-".repeat(10),
    );
    for radio in radios {
        println!(
            "{:<14}  {:<20}  {:<16}  {:<16}  {:<14}  {}",
            radio.model,
            radio.serial,
            radio.nickname,
            radio.ip,
            radio.version.to_string(),
            radio.status
        );
    }
}

/// Resolve the radio to connect to from `--host` or `--discover`.
async fn resolve_radio(cli: &Cli, config: &EngineConfig) -> Result<RadioRecord> {
    if let Some(ip) = cli.host {
        return Ok(RadioRecord::new(ip));
    }
    if !cli.discover {
        bail!("--host or --discover is required for this command");
    }

    println!("Discovering radios (3 seconds)...");
    let radios = discovery::discover(Duration::from_secs(3))
        .await
        .context("discovery failed")?;
    radios
        .into_iter()
        .find(|r| {
            config.serial_filter.is_empty()
                || config.serial_filter.iter().any(|f| r.serial.contains(f.as_str()))
        })
        .context("no radio found on the LAN")
}

async fn connect(cli: &Cli) -> Result<Connection> {
    let config = load_config(cli)?;
    let record = resolve_radio(cli, &config).await?;
    println!("Connecting to {}...", record.ip);

    let demux = VitaDemux::bind().await.context("failed to bind telemetry port")?;
    let mut builder = ConnectionBuilder::new(record)
        .client_name(&cli.client_name)
        .verbose_commands(cli.verbose_commands)
        .engine_config(&config)
        .demux(demux);
    if let Some(port) = cli.tcp_port {
        builder = builder.tcp_port(port);
    }

    let conn = builder.connect().await.context("connect failed")?;
    println!("Connected.");
    Ok(conn)
}

/// Remaining time before `deadline`, or an hour when running until Ctrl-C.
fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        Some(dl) => {
            let left = dl.saturating_duration_since(Instant::now());
            (!left.is_zero()).then_some(left)
        }
        None => Some(Duration::from_secs(3600)),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_discover() -> Result<()> {
    println!("Discovering radios on the LAN (3 seconds)...");
    println!();

    let radios = discovery::discover(Duration::from_secs(3))
        .await
        .context("discovery failed")?;
    if radios.is_empty() {
        println!("No radios found.");
        return Ok(());
    }

    print_radio_table(&radios);
    println!();
    println!("{} radio(s) found.", radios.len());
    Ok(())
}

async fn cmd_watch(cli: &Cli, duration_secs: u64) -> Result<()> {
    let config = load_config(cli)?;
    let registry = Arc::new(DiscoveryRegistry::with_monotonic_clock(&config));
    let listener = DiscoveryListener::bind()
        .await
        .context("failed to bind discovery port")?;

    let cancel = CancellationToken::new();
    let mut events = registry.subscribe();
    let ingest = registry.spawn_ingest(listener, cancel.clone());
    let sweeper = registry.spawn_sweeper(cancel.clone());

    println!("Watching for radios (Ctrl-C to stop)...");
    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let Some(timeout) = remaining(deadline) else {
            break;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = tokio::time::timeout(timeout, events.recv()) => match next {
                Ok(Ok(DiscoveryEvent::Added(radio))) => println!("[added]   {radio}"),
                Ok(Ok(DiscoveryEvent::Removed(radio))) => println!("[removed] {radio}"),
                Ok(Err(RecvError::Lagged(n))) => println!("[warning] missed {n} events"),
                Ok(Err(RecvError::Closed)) | Err(_) => break,
            },
        }
    }

    cancel.cancel();
    let _ = tokio::join!(ingest, sweeper);
    println!();
    print_radio_table(&registry.snapshot());
    Ok(())
}

async fn cmd_info(conn: &Connection) -> Result<()> {
    // Replies to the handshake requests arrive shortly after connecting.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let info = conn.radio_info();

    println!("Radio:            {}", conn.record().ip);
    println!("Client handle:    {}", conn.handle().map_or("-".to_string(), |h| format!("0x{h:08X}")));
    println!(
        "Protocol version: {}",
        conn.protocol_version().map_or("-".to_string(), |v| v.to_string())
    );
    println!("Model:            {}", info.model().unwrap_or("-"));
    println!("Serial:           {}", info.serial().unwrap_or("-"));
    println!("Antennas:         {}", info.antennas.join(", "));
    println!("Microphones:      {}", info.microphones.join(", "));
    for (component, version) in &info.versions {
        println!("  {component:<16}{version}");
    }
    for (kind, profiles) in &info.profiles {
        println!(
            "Profiles ({}):  {} (current: {})",
            kind.as_str(),
            profiles.names.join(", "),
            profiles.current.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn cmd_command(conn: &Connection, text: &str) -> Result<()> {
    let reply = conn.command(text).await.context("command failed")?;
    println!("Sequence: {}", reply.sequence);
    println!("Code:     0x{:08X}", reply.code);
    println!("Message:  {}", reply.message);
    if let Some(debug) = &reply.debug {
        println!("Debug:    {debug}");
    }
    if reply.code != 0 {
        bail!("radio rejected command (0x{:08X})", reply.code);
    }
    Ok(())
}

async fn cmd_objects(conn: &Connection, settle_secs: u64) -> Result<()> {
    tokio::time::sleep(Duration::from_secs(settle_secs)).await;
    let objects = conn.objects();

    println!("Slices:");
    for s in objects.slices.announced() {
        println!(
            "  {}  {:>12.6} MHz  {:<6}  pan 0x{:08X}  rx {}",
            s.index, s.rf_frequency, s.mode, s.pan, s.rx_ant
        );
    }
    println!("Panadapters:");
    for p in objects.panadapters.announced() {
        println!(
            "  0x{:08X}  center {:.6} MHz  bw {:.6} MHz  waterfall 0x{:08X}",
            p.stream_id, p.center, p.bandwidth, p.waterfall
        );
    }
    println!("Waterfalls:");
    for w in objects.waterfalls.announced() {
        println!("  0x{:08X}  panadapter 0x{:08X}", w.stream_id, w.panadapter);
    }
    println!("Streams:");
    for a in objects.audio_streams.announced() {
        println!("  audio 0x{:08X}  {}", a.stream_id, a.endpoint.ip);
    }
    for q in objects.iq_streams.announced() {
        println!("  iq    0x{:08X}  {}", q.stream_id, q.endpoint.ip);
    }
    for o in objects.opus_streams.announced() {
        println!("  opus  0x{:08X}  {}", o.stream_id, o.endpoint.ip);
    }
    println!("Meters:");
    for m in objects.meters.announced() {
        println!(
            "  {:>4}  {:<8}  {:<16}  {}",
            m.id,
            m.source.as_deref().unwrap_or("-"),
            m.name.as_deref().unwrap_or("-"),
            m.unit.map_or(String::new(), |u| u.to_string())
        );
    }
    Ok(())
}

async fn cmd_monitor(conn: &Connection, duration_secs: u64, meters: bool) -> Result<()> {
    let mut events = conn.subscribe();
    println!("Monitoring radio events (Ctrl-C to stop)...");
    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let Some(timeout) = remaining(deadline) else {
            println!("Monitor duration elapsed.");
            break;
        };

        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = tokio::time::timeout(timeout, events.recv()) => next,
        };
        match next {
            Ok(Ok(RadioEvent::MeterUpdated { .. } | RadioEvent::PanadapterFrame { .. })) if !meters => {}
            Ok(Ok(RadioEvent::WaterfallTile { stream_id, width, height, .. })) => {
                println!("[event] waterfall 0x{stream_id:08X} tile {width}x{height}");
            }
            Ok(Ok(RadioEvent::Disconnected)) => {
                println!("[event] Disconnected");
                break;
            }
            Ok(Ok(event)) => println!("[event] {event:?}"),
            Ok(Err(RecvError::Lagged(n))) => println!("[warning] missed {n} events (consumer too slow)"),
            Ok(Err(RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    println!(
        "Network quality: {} (rtt {} ms), meter errors: {}",
        conn.network_quality(),
        conn.rtt_ms(),
        conn.meter_errors()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // Discovery commands do not need a connection.
    match &cli.command {
        Command::Discover => return cmd_discover().await,
        Command::Watch { duration } => return cmd_watch(&cli, *duration).await,
        _ => {}
    }

    let conn = connect(&cli).await?;
    let result = match &cli.command {
        Command::Info => cmd_info(&conn).await,
        Command::Command { text } => cmd_command(&conn, text).await,
        Command::Objects { settle } => cmd_objects(&conn, *settle).await,
        Command::Monitor { duration, meters } => cmd_monitor(&conn, *duration, *meters).await,
        Command::Discover | Command::Watch { .. } => unreachable!("handled above"),
    };
    conn.disconnect().await;
    result
}
