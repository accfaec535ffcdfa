//! Scripted mock radio speaking the line-oriented control protocol.
//!
//! [`MockRadio`] listens on a random localhost port. When a client connects
//! it writes the greeting lines (`V...` then `H...`), then answers every
//! `C<seq>|<command>` line with a reply. Replies default to success with an
//! empty message; individual commands can be scripted with
//! [`reply`](MockRadio::reply) or left unanswered with
//! [`silence`](MockRadio::silence).
//!
//! # Example
//!
//! ```no_run
//! use sdrlink_test_harness::MockRadio;
//!
//! # async fn example() -> sdrlink_core::Result<()> {
//! let mut radio = MockRadio::new().await?;
//! radio.reply("info", 0, "model=\"FLEX-6600\"");
//! let addr = radio.addr();
//! let handle = radio.start();
//! // ... connect to addr ...
//! handle.send_line("S0|slice 0 in_use=1 pan=0");
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sdrlink_core::error::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Protocol version announced by default.
pub const DEFAULT_VERSION_LINE: &str = "V1.4.0.0";
/// Client handle announced by default.
pub const DEFAULT_HANDLE_LINE: &str = "H12345678";

enum Control {
    Line(String),
    Mute,
    Close,
}

/// A mock radio control server, configured before [`start`](MockRadio::start).
pub struct MockRadio {
    listener: TcpListener,
    addr: SocketAddr,
    greeting: Vec<String>,
    replies: HashMap<String, (u32, String)>,
    silenced: HashSet<String>,
}

impl MockRadio {
    /// Bind a new mock radio on `127.0.0.1` with an OS-assigned port.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock radio: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?;

        Ok(Self {
            listener,
            addr,
            greeting: vec![DEFAULT_VERSION_LINE.into(), DEFAULT_HANDLE_LINE.into()],
            replies: HashMap::new(),
            silenced: HashSet::new(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Replace the lines written when a client connects.
    pub fn greeting(&mut self, lines: &[&str]) -> &mut Self {
        self.greeting = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Script the reply for an exact command text.
    pub fn reply(&mut self, command: &str, code: u32, message: &str) -> &mut Self {
        self.replies
            .insert(command.to_string(), (code, message.to_string()));
        self
    }

    /// Never answer this command.
    pub fn silence(&mut self, command: &str) -> &mut Self {
        self.silenced.insert(command.to_string());
        self
    }

    /// Start serving a single client connection in a background task.
    pub fn start(self) -> MockRadioHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(serve(self, control_rx, Arc::clone(&commands)));

        MockRadioHandle {
            control: control_tx,
            commands,
            task,
        }
    }
}

/// Handle to a running [`MockRadio`].
pub struct MockRadioHandle {
    control: mpsc::UnboundedSender<Control>,
    commands: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<std::result::Result<(), String>>,
}

impl MockRadioHandle {
    /// Write a raw line (without `\n`) to the connected client.
    pub fn send_line(&self, line: &str) {
        let _ = self.control.send(Control::Line(line.to_string()));
    }

    /// Stop answering every command from now on.
    pub fn mute(&self) {
        let _ = self.control.send(Control::Mute);
    }

    /// Close the client connection.
    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }

    /// Command texts received so far, sequence prefixes stripped.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Poll until `command` has been received or `timeout` elapses.
    pub async fn wait_for_command(&self, command: &str, timeout: Duration) -> bool {
        let poll = async {
            loop {
                if self.commands.lock().iter().any(|c| c == command) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Wait for the server task to finish and return any error it hit.
    pub async fn wait(self) -> std::result::Result<(), String> {
        self.task
            .await
            .map_err(|e| format!("mock radio task panicked: {}", e))?
    }
}

/// Split `C<seq>|cmd` or `CD<seq>|cmd` into its sequence and command text.
fn parse_command(line: &str) -> Option<(u32, &str)> {
    let rest = line.strip_prefix('C')?;
    let rest = rest.strip_prefix('D').unwrap_or(rest);
    let (seq, command) = rest.split_once('|')?;
    Some((seq.parse().ok()?, command))
}

async fn serve(
    radio: MockRadio,
    mut control: mpsc::UnboundedReceiver<Control>,
    commands: Arc<Mutex<Vec<String>>>,
) -> std::result::Result<(), String> {
    let (stream, peer) = radio
        .listener
        .accept()
        .await
        .map_err(|e| format!("failed to accept connection: {}", e))?;
    tracing::debug!(peer = %peer, "mock radio accepted client");

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    for line in &radio.greeting {
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| format!("greeting write error: {}", e))?;
    }

    let mut muted = false;
    loop {
        tokio::select! {
            read = lines.next_line() => {
                let line = match read {
                    Ok(Some(line)) => line,
                    Ok(None) => return Ok(()),
                    Err(e) => return Err(format!("read error: {}", e)),
                };
                let Some((seq, command)) = parse_command(line.trim_end()) else {
                    tracing::debug!(line = %line, "mock radio ignoring non-command line");
                    continue;
                };
                commands.lock().push(command.to_string());

                if muted || radio.silenced.contains(command) {
                    continue;
                }
                let (code, message) = radio
                    .replies
                    .get(command)
                    .cloned()
                    .unwrap_or((0, String::new()));
                let reply = format!("R{seq}|{code:08X}|{message}\n");
                writer
                    .write_all(reply.as_bytes())
                    .await
                    .map_err(|e| format!("reply write error: {}", e))?;
            }
            ctl = control.recv() => match ctl {
                Some(Control::Line(line)) => {
                    writer
                        .write_all(format!("{line}\n").as_bytes())
                        .await
                        .map_err(|e| format!("line write error: {}", e))?;
                }
                Some(Control::Mute) => muted = true,
                Some(Control::Close) | None => return Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    #[test]
    fn parse_command_forms() {
        assert_eq!(parse_command("C1|ping"), Some((1, "ping")));
        assert_eq!(parse_command("CD42|sub slice all"), Some((42, "sub slice all")));
        assert_eq!(parse_command("R1|0|"), None);
        assert_eq!(parse_command("Cx|ping"), None);
    }

    #[tokio::test]
    async fn greets_and_replies() {
        let mut radio = MockRadio::new().await.unwrap();
        radio.reply("info", 0x50000015, "nope");
        let addr = radio.addr();
        let handle = radio.start();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"C1|ping\nC2|info\n").await.unwrap();

        let expected = "V1.4.0.0\nH12345678\nR1|00000000|\nR2|50000015|nope\n";
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);

        assert!(handle.wait_for_command("info", Duration::from_secs(1)).await);
        assert_eq!(handle.commands(), vec!["ping", "info"]);

        handle.close();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn silenced_command_gets_no_reply() {
        let mut radio = MockRadio::new().await.unwrap();
        radio.greeting(&[]).silence("ping");
        let addr = radio.addr();
        let handle = radio.start();

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"C1|ping\nC2|info\n").await.unwrap();

        let expected = "R2|00000000|\n";
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);

        handle.send_line("S0|radio slices=4");
        let expected = "S0|radio slices=4\n";
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }
}
