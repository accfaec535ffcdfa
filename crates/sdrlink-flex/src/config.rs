//! Engine configuration loaded from flag files.
//!
//! Configuration is detected by file presence in a directory, read once
//! at start-up:
//!
//! - `filter.txt` -- serial substrings, whitespace or newline separated.
//!   Only radios whose serial contains one of them are registered.
//! - `log_discovery.txt` -- raise discovery logging to `info`.
//! - `log_disconnect.txt` -- raise disconnect logging to `info`.
//!
//! A missing file means the default.

use std::path::Path;

use sdrlink_core::Result;

pub const FILTER_FILE: &str = "filter.txt";
pub const LOG_DISCOVERY_FILE: &str = "log_discovery.txt";
pub const LOG_DISCONNECT_FILE: &str = "log_disconnect.txt";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Serial allow-list. Empty admits every radio.
    pub serial_filter: Vec<String>,
    pub log_discovery: bool,
    pub log_disconnect: bool,
}

impl EngineConfig {
    /// Load from the flag files in `dir`.
    ///
    /// Only an unreadable `filter.txt` that exists is an error.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();

        let filter_path = dir.join(FILTER_FILE);
        let serial_filter = if filter_path.is_file() {
            let text = std::fs::read_to_string(&filter_path)?;
            parse_filter(&text)
        } else {
            Vec::new()
        };

        let config = Self {
            serial_filter,
            log_discovery: dir.join(LOG_DISCOVERY_FILE).exists(),
            log_disconnect: dir.join(LOG_DISCONNECT_FILE).exists(),
        };
        tracing::debug!(
            dir = %dir.display(),
            filters = config.serial_filter.len(),
            log_discovery = config.log_discovery,
            log_disconnect = config.log_disconnect,
            "Loaded engine configuration"
        );
        Ok(config)
    }
}

fn parse_filter(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|s| s.trim_matches('\0').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
