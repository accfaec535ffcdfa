//! Snapshot information requested during the handshake.
//!
//! The replies to `info`, `version`, `ant list`, `mic list` and
//! `profile <kind> info` carry their payload in the reply message. None of
//! them changes often, so they are kept as plain maps and lists.

use std::collections::BTreeMap;

use sdrlink_core::ProtocolVersion;

/// Profile families a radio keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProfileKind {
    Global,
    Tx,
    Mic,
}

impl ProfileKind {
    pub const ALL: [ProfileKind; 3] = [ProfileKind::Global, ProfileKind::Tx, ProfileKind::Mic];

    /// Word used on the wire, as in `profile tx info`.
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileKind::Global => "global",
            ProfileKind::Tx => "tx",
            ProfileKind::Mic => "mic",
        }
    }

    pub fn from_status(word: &str) -> Option<Self> {
        match word {
            "global" => Some(ProfileKind::Global),
            "tx" => Some(ProfileKind::Tx),
            "mic" => Some(ProfileKind::Mic),
            _ => None,
        }
    }
}

/// Profile names of one kind plus the one currently loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileList {
    pub names: Vec<String>,
    pub current: Option<String>,
}

/// Static radio information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioInfo {
    /// `info` reply fields, quotes removed.
    pub fields: BTreeMap<String, String>,
    /// Component name to version string, from the `version` reply.
    pub versions: BTreeMap<String, String>,
    pub antennas: Vec<String>,
    pub microphones: Vec<String>,
    pub profiles: BTreeMap<ProfileKind, ProfileList>,
}

impl RadioInfo {
    pub fn model(&self) -> Option<&str> {
        self.fields.get("model").map(String::as_str)
    }

    pub fn serial(&self) -> Option<&str> {
        self.fields.get("chassis_serial").map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Parsed version of one component, e.g. `SmartSDR-MB`.
    pub fn component_version(&self, component: &str) -> Option<ProtocolVersion> {
        self.versions.get(component)?.parse().ok()
    }

    /// Apply an `info` reply: `model="FLEX-6600",chassis_serial="...",...`.
    ///
    /// Commas inside quotes belong to the value.
    pub fn apply_info(&mut self, message: &str) {
        for item in split_unquoted(message, ',') {
            match item.split_once('=') {
                Some((key, value)) => {
                    self.fields
                        .insert(key.trim().to_string(), unquote(value.trim()).to_string());
                }
                None if item.trim().is_empty() => {}
                None => tracing::debug!(item = %item, "Invalid info reply item"),
            }
        }
    }

    /// Apply a `version` reply: `SmartSDR-MB=3.4.23.0#PSoC-MBTRX=...`.
    pub fn apply_versions(&mut self, message: &str) {
        for item in message.split('#').filter(|s| !s.trim().is_empty()) {
            match item.split_once('=') {
                Some((component, version)) => {
                    self.versions
                        .insert(component.trim().to_string(), version.trim().to_string());
                }
                None => tracing::debug!(item = %item, "Invalid version reply item"),
            }
        }
    }

    pub fn set_antennas(&mut self, message: &str) {
        self.antennas = comma_list(message);
    }

    pub fn set_microphones(&mut self, message: &str) {
        self.microphones = comma_list(message);
    }

    /// Apply a `profile <kind> info` reply or a `profile <kind> list=` status.
    ///
    /// Names are `^`-separated; an optional `list=` prefix is accepted.
    pub fn set_profiles(&mut self, kind: ProfileKind, message: &str) {
        let list = message
            .find("list=")
            .map(|pos| &message[pos + "list=".len()..])
            .unwrap_or(message);
        self.profiles.entry(kind).or_default().names = list
            .split('^')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    pub fn set_current_profile(&mut self, kind: ProfileKind, name: &str) {
        self.profiles.entry(kind).or_default().current =
            (!name.is_empty()).then(|| name.to_string());
    }

    pub fn profile_names(&self, kind: ProfileKind) -> &[String] {
        self.profiles
            .get(&kind)
            .map(|p| p.names.as_slice())
            .unwrap_or(&[])
    }
}

fn comma_list(message: &str) -> Vec<String> {
    message
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == sep && !in_quotes {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}
