//! TCP line framing, inbound line classification, and command encoding.
//!
//! The control protocol uses newline-terminated ASCII lines over TCP.
//! Commands flow from client to radio; replies, status lines, messages and
//! handshake lines flow from radio to client.
//!
//! # Line formats
//!
//! ```text
//! Command:   C<seq>|<command_text>\n        (CD<seq>|... in verbose mode)
//! Reply:     R<seq>|<hex_response>|<message>[|<debug>]\n
//! Status:    S<hex_handle>|<category> <payload>\n
//! Message:   M<hex_id>|<text>\n             (severity in bits 24-25 of id)
//! Version:   V<major>.<minor>.<patch>.<build>\n
//! Handle:    H<hex_handle>\n
//! ```
//!
//! All encoding/decoding in this module is pure parsing -- no I/O is performed.

use bytes::{Buf, BytesMut};

use sdrlink_core::{Error, MessageSeverity, ProtocolVersion, Result};

// ---------------------------------------------------------------------------
// Command encoding
// ---------------------------------------------------------------------------

/// Encode a command with the given sequence number.
///
/// Format: `C<seq>|<command>\n`, or `CD<seq>|<command>\n` when `verbose`
/// asks the radio to append a debug field to its reply.
pub fn encode_command(seq: u32, command: &str, verbose: bool) -> Vec<u8> {
    if verbose {
        format!("CD{seq}|{command}\n").into_bytes()
    } else {
        format!("C{seq}|{command}\n").into_bytes()
    }
}

// ---------------------------------------------------------------------------
// Command builders
//
// Each builder returns the command string WITHOUT the `C<seq>|` prefix.
// The prefix is added by the command channel when it assigns a sequence
// number.
// ---------------------------------------------------------------------------

/// Example output: `"client program sdrlink"`
pub fn cmd_client_program(name: &str) -> String {
    format!("client program {}", name)
}

/// Mark this client as a GUI client.
pub fn cmd_client_gui() -> String {
    "client gui".to_string()
}

/// Example output: `"sub slice all"`
pub fn cmd_subscribe(category: &str) -> String {
    format!("sub {} all", category)
}

/// Announce the local UDP port telemetry should be sent to.
///
/// Example output: `"client udpport 4991"`
pub fn cmd_client_udpport(port: u16) -> String {
    format!("client udpport {}", port)
}

pub fn cmd_info() -> String {
    "info".to_string()
}

pub fn cmd_version() -> String {
    "version".to_string()
}

pub fn cmd_ant_list() -> String {
    "ant list".to_string()
}

pub fn cmd_mic_list() -> String {
    "mic list".to_string()
}

/// Example output: `"profile global info"`
pub fn cmd_profile_info(kind: &str) -> String {
    format!("profile {} info", kind)
}

/// Tell the radio to expect periodic pings and drop us when they stop.
pub fn cmd_keepalive_enable() -> String {
    "keepalive enable".to_string()
}

pub fn cmd_ping() -> String {
    "ping".to_string()
}

/// Stop the radio from persisting settings while a firmware update is pending.
pub fn cmd_persistence_off() -> String {
    "persistence off".to_string()
}

// ---------------------------------------------------------------------------
// Line framing
// ---------------------------------------------------------------------------

/// Accumulates inbound TCP bytes and yields complete lines.
///
/// Bytes are buffered undecoded, so a multi-byte UTF-8 character split
/// across two reads survives intact. Each extracted line is decoded lossily
/// and stripped of its trailing `\r` and NUL padding.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: BytesMut,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from one socket read.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete line, if any.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(pos);
        self.buf.advance(1);

        let text = String::from_utf8_lossy(&line);
        Some(text.trim_matches('\0').trim_end_matches(['\r', '\0']).to_string())
    }

    /// Bytes buffered without a terminating newline yet.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ---------------------------------------------------------------------------
// Inbound line types
// ---------------------------------------------------------------------------

/// A decoded reply to a previously-sent command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Sequence number correlating this reply to the originating command.
    pub sequence: u32,
    /// Response code. `0` means success; anything else is device-reported.
    pub code: u32,
    /// Reply message (may be empty).
    pub message: String,
    /// Debug text, present only for verbose (`CD`) commands.
    pub debug: Option<String>,
}

/// A status line, split into the sender's handle and the raw payload.
///
/// The payload's first token is the category (`slice`, `display`, `radio`,
/// ...); the status dispatcher owns everything after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub handle: u32,
    pub payload: String,
}

/// A free-text message pushed by the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioMessage {
    pub id: u32,
    pub severity: MessageSeverity,
    pub text: String,
}

/// Kinds of lines received on the control connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioLine {
    /// `R<seq>|<code>|<message>[|<debug>]`
    Reply(Reply),
    /// `S<handle>|<payload>`
    Status(StatusLine),
    /// `H<hex_handle>`
    Handle(u32),
    /// `V<a.b.c.d>`
    Version(ProtocolVersion),
    /// `M<hex_id>|<text>`
    Message(RadioMessage),
    /// An unrecognised line.
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

/// Classify and parse a single line (without the trailing `\n`).
pub fn parse_line(line: &str) -> Result<RadioLine> {
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::Protocol("empty line".into()));
    }

    let mut chars = line.chars();
    let kind = chars.next();
    let body = chars.as_str();
    match kind {
        Some('R') => parse_reply(body).map(RadioLine::Reply),
        Some('S') => parse_status(body).map(RadioLine::Status),
        Some('H') => parse_handle(body).map(RadioLine::Handle),
        Some('V') => body.parse::<ProtocolVersion>().map(RadioLine::Version),
        Some('M') => parse_message(body).map(RadioLine::Message),
        _ => Ok(RadioLine::Unknown(line.to_string())),
    }
}

/// Parse a reply body: `<seq>|<hex_code>|<message>[|<debug>]`
fn parse_reply(body: &str) -> Result<Reply> {
    let parts: Vec<&str> = body.splitn(4, '|').collect();
    if parts.len() < 3 {
        return Err(Error::Protocol(format!(
            "malformed reply (need seq|code|message): R{body}"
        )));
    }

    let sequence = parts[0]
        .parse::<u32>()
        .map_err(|_| Error::Protocol(format!("invalid reply sequence number: {}", parts[0])))?;

    let code = u32::from_str_radix(parts[1], 16)
        .map_err(|_| Error::Protocol(format!("invalid reply response code: {}", parts[1])))?;

    Ok(Reply {
        sequence,
        code,
        message: parts[2].to_string(),
        debug: parts.get(3).map(|d| d.to_string()),
    })
}

/// Parse a status body: `<hex_handle>|<payload>`
fn parse_status(body: &str) -> Result<StatusLine> {
    let (handle_str, payload) = body
        .split_once('|')
        .ok_or_else(|| Error::Protocol(format!("malformed status (no pipe): S{body}")))?;

    let handle = u32::from_str_radix(handle_str, 16)
        .map_err(|_| Error::Protocol(format!("invalid status handle: {handle_str}")))?;

    Ok(StatusLine {
        handle,
        payload: payload.to_string(),
    })
}

fn parse_handle(body: &str) -> Result<u32> {
    u32::from_str_radix(body, 16).map_err(|_| Error::Protocol(format!("invalid hex handle: {body}")))
}

/// Parse a message body: `<hex_id>|<text>`
fn parse_message(body: &str) -> Result<RadioMessage> {
    let (id_str, text) = body
        .split_once('|')
        .ok_or_else(|| Error::Protocol(format!("malformed message (no pipe): M{body}")))?;

    let id = u32::from_str_radix(id_str, 16)
        .map_err(|_| Error::Protocol(format!("invalid message id: {id_str}")))?;

    Ok(RadioMessage {
        id,
        severity: MessageSeverity::from_message_id(id),
        text: text.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Split off the first whitespace-delimited token.
///
/// Returns `(token, rest)` with `rest` left-trimmed; both are empty for an
/// empty input.
pub fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Iterate whitespace-separated `key=value` tokens.
///
/// Tokens without exactly one `=` are logged and skipped.
pub fn key_values<'a>(
    payload: &'a str,
    context: &'static str,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    payload.split_whitespace().filter_map(move |token| {
        let kv = token.split_once('=');
        if kv.is_none() {
            tracing::debug!(context = context, token = %token, "Invalid key/value pair");
        }
        kv
    })
}

/// Parse an unsigned hex value with or without a `0x` prefix.
pub fn parse_hex_u32(s: &str) -> Option<u32> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

/// Parse a protocol boolean (`0`/`1`).
pub fn parse_flag(s: &str) -> Option<bool> {
    match s {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- Command encoding --

    #[test]
    fn encode_command_plain() {
        assert_eq!(encode_command(1, "ping", false), b"C1|ping\n");
    }

    #[test]
    fn encode_command_verbose() {
        assert_eq!(encode_command(42, "sub slice all", true), b"CD42|sub slice all\n");
    }

    #[test]
    fn command_builders() {
        assert_eq!(cmd_client_program("sdrlink"), "client program sdrlink");
        assert_eq!(cmd_subscribe("pan"), "sub pan all");
        assert_eq!(cmd_client_udpport(4993), "client udpport 4993");
        assert_eq!(cmd_profile_info("global"), "profile global info");
        assert_eq!(cmd_keepalive_enable(), "keepalive enable");
    }

    // -- Framing --

    #[test]
    fn framer_yields_complete_lines_only() {
        let mut framer = LineFramer::new();
        framer.push(b"R1|0|ok\nS1234|radio sl");
        assert_eq!(framer.next_line().as_deref(), Some("R1|0|ok"));
        assert_eq!(framer.next_line(), None);
        assert_eq!(framer.pending(), "S1234|radio sl".len());

        framer.push(b"ices=4\n");
        assert_eq!(framer.next_line().as_deref(), Some("S1234|radio slices=4"));
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn framer_strips_cr_and_nul() {
        let mut framer = LineFramer::new();
        framer.push(b"V1.4.0.0\r\n\0\0H12345678\0\n");
        assert_eq!(framer.next_line().as_deref(), Some("V1.4.0.0"));
        assert_eq!(framer.next_line().as_deref(), Some("H12345678"));
    }

    #[test]
    fn framer_keeps_split_utf8_intact() {
        let text = "M10000001|caf\u{e9}\n".as_bytes();
        let split = text.len() - 2; // inside the two-byte character
        let mut framer = LineFramer::new();
        framer.push(&text[..split]);
        assert_eq!(framer.next_line(), None);
        framer.push(&text[split..]);
        assert_eq!(framer.next_line().as_deref(), Some("M10000001|caf\u{e9}"));
    }

    // -- Reply --

    #[test]
    fn parse_reply_success() {
        let line = parse_line("R1|00000000|0").unwrap();
        assert_eq!(
            line,
            RadioLine::Reply(Reply {
                sequence: 1,
                code: 0,
                message: "0".into(),
                debug: None,
            })
        );
    }

    #[test]
    fn parse_reply_with_debug_field() {
        match parse_line("R17|50000015|bad slice|slice 9 not found").unwrap() {
            RadioLine::Reply(r) => {
                assert_eq!(r.sequence, 17);
                assert_eq!(r.code, 0x5000_0015);
                assert_eq!(r.message, "bad slice");
                assert_eq!(r.debug.as_deref(), Some("slice 9 not found"));
            }
            other => panic!("expected Reply, got {:?}", other),
        }
    }

    #[test]
    fn parse_reply_empty_message() {
        match parse_line("R5|0|").unwrap() {
            RadioLine::Reply(r) => assert_eq!(r.message, ""),
            other => panic!("expected Reply, got {:?}", other),
        }
    }

    #[test]
    fn parse_reply_too_few_fields() {
        assert!(parse_line("R5|0").is_err());
        assert!(parse_line("R5").is_err());
    }

    #[test]
    fn parse_reply_bad_numbers() {
        assert!(parse_line("Rxyz|0|ok").is_err());
        assert!(parse_line("R1|zz|ok").is_err());
    }

    // -- Status --

    #[test]
    fn parse_status_line() {
        match parse_line("S40000001|slice 0 in_use=1 RF_frequency=14.250000").unwrap() {
            RadioLine::Status(s) => {
                assert_eq!(s.handle, 0x4000_0001);
                assert_eq!(s.payload, "slice 0 in_use=1 RF_frequency=14.250000");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[test]
    fn parse_status_without_pipe_is_error() {
        assert!(parse_line("S40000001 slice 0").is_err());
    }

    #[test]
    fn parse_status_bad_handle_is_error() {
        assert!(parse_line("Sxyz|radio slices=4").is_err());
    }

    // -- Handle / version / message --

    #[test]
    fn parse_handle_line() {
        assert_eq!(parse_line("H12345678").unwrap(), RadioLine::Handle(0x1234_5678));
        assert!(parse_line("Hnothex").is_err());
    }

    #[test]
    fn parse_version_line() {
        match parse_line("V1.4.0.0").unwrap() {
            RadioLine::Version(v) => assert_eq!(v, ProtocolVersion::new(1, 4, 0, 0)),
            other => panic!("expected Version, got {:?}", other),
        }
    }

    #[test]
    fn parse_message_severity() {
        match parse_line("M21000005|Transmit inhibited").unwrap() {
            RadioLine::Message(m) => {
                assert_eq!(m.id, 0x2100_0005);
                assert_eq!(m.severity, MessageSeverity::Warning);
                assert_eq!(m.text, "Transmit inhibited");
            }
            other => panic!("expected Message, got {:?}", other),
        }
    }

    #[test]
    fn parse_unknown_and_empty() {
        assert_eq!(
            parse_line("Xsomething").unwrap(),
            RadioLine::Unknown("Xsomething".into())
        );
        assert!(parse_line("").is_err());
        assert!(parse_line("   ").is_err());
    }

    // -- Helpers --

    #[test]
    fn split_token_cases() {
        assert_eq!(split_token("slice 0 in_use=1"), ("slice", "0 in_use=1"));
        assert_eq!(split_token("  radio"), ("radio", ""));
        assert_eq!(split_token(""), ("", ""));
    }

    #[test]
    fn key_values_skips_bad_tokens() {
        let kvs: Vec<_> = key_values("a=1 junk b=two c=", "test").collect();
        assert_eq!(kvs, vec![("a", "1"), ("b", "two"), ("c", "")]);
    }

    #[test]
    fn hex_and_flag_parsing() {
        assert_eq!(parse_hex_u32("0x40000000"), Some(0x4000_0000));
        assert_eq!(parse_hex_u32("42000000"), Some(0x4200_0000));
        assert_eq!(parse_hex_u32("0xZZ"), None);
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("yes"), None);
    }
}
