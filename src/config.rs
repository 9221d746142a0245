//! Server configuration module
//!
//! Parses the plain-text `key=value` configuration the query manager ships
//! with. `#` starts a comment, values may be quoted with `"`, `'` or a
//! backtick, durations accept `s|m|h` suffixes and sizes accept `k|m`
//! suffixes. Keys are matched case-insensitively; unknown keys are logged
//! and ignored so old config files keep working.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Main server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path to the database file (created if absent).
    pub database_file: String,
    /// Prepared-statement cache capacity.
    pub max_cached_statements: usize,
    /// Host-name cache capacity.
    pub max_cached_host_names: usize,
    /// Host-name cache TTL in milliseconds.
    pub host_name_expire_time: i64,
    /// Event-loop ticks per second.
    pub update_rate: u32,
    /// Listen port on the loopback interface.
    pub port: u16,
    /// Shared secret checked by the LOGIN query.
    pub password: String,
    /// Slot-table size; connections past this are rejected.
    pub max_connections: usize,
    /// Idle eviction threshold in milliseconds. 0 disables eviction.
    pub max_connection_idle_time: i64,
    /// Per-frame cap; frames announcing more are rejected.
    pub max_connection_packet_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_file: "querymanager.db".to_string(),
            max_cached_statements: 100,
            max_cached_host_names: 32,
            host_name_expire_time: 15 * 60 * 1000,
            update_rate: 20,
            port: 7174,
            password: String::new(),
            max_connections: 50,
            max_connection_idle_time: 60_000,
            max_connection_packet_size: 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from a `key=value` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a string. Useful for testing.
    pub fn from_str(contents: &str) -> Result<Self> {
        let mut config = Config::default();

        for (idx, raw_line) in contents.lines().enumerate() {
            let line_number = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, val)) = line.split_once('=') else {
                tracing::warn!("config line {}: no assignment found", line_number);
                continue;
            };

            let key = key.trim();
            let val = val.trim();
            if key.is_empty() {
                tracing::warn!("config line {}: empty key", line_number);
                continue;
            }
            if val.is_empty() {
                tracing::warn!("config line {}: empty value", line_number);
                continue;
            }

            if key.eq_ignore_ascii_case("DatabaseFile") {
                config.database_file = parse_string(val);
            } else if key.eq_ignore_ascii_case("MaxCachedStatements") {
                set_integer(&mut config.max_cached_statements, val, key, line_number);
            } else if key.eq_ignore_ascii_case("MaxCachedHostNames") {
                set_integer(&mut config.max_cached_host_names, val, key, line_number);
            } else if key.eq_ignore_ascii_case("HostNameExpireTime") {
                set_duration(&mut config.host_name_expire_time, val, key, line_number);
            } else if key.eq_ignore_ascii_case("UpdateRate") {
                set_integer(&mut config.update_rate, val, key, line_number);
            } else if key.eq_ignore_ascii_case("Port")
                || key.eq_ignore_ascii_case("QueryManagerPort")
            {
                set_integer(&mut config.port, val, key, line_number);
            } else if key.eq_ignore_ascii_case("Password")
                || key.eq_ignore_ascii_case("QueryManagerPassword")
            {
                config.password = parse_string(val);
            } else if key.eq_ignore_ascii_case("MaxConnections") {
                set_integer(&mut config.max_connections, val, key, line_number);
            } else if key.eq_ignore_ascii_case("MaxConnectionIdleTime") {
                set_duration(&mut config.max_connection_idle_time, val, key, line_number);
            } else if key.eq_ignore_ascii_case("MaxConnectionPacketSize") {
                set_size(&mut config.max_connection_packet_size, val, key, line_number);
            } else {
                tracing::warn!("config line {}: unknown key \"{}\"", line_number, key);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that values the engine divides or allocates by are sane.
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.update_rate > 0, "UpdateRate must be positive");
        anyhow::ensure!(self.max_connections > 0, "MaxConnections must be positive");
        anyhow::ensure!(
            self.max_connection_packet_size >= 8,
            "MaxConnectionPacketSize too small: {}",
            self.max_connection_packet_size
        );
        anyhow::ensure!(
            self.max_cached_statements > 0,
            "MaxCachedStatements must be positive"
        );
        anyhow::ensure!(
            self.max_cached_host_names > 0,
            "MaxCachedHostNames must be positive"
        );
        Ok(())
    }
}

/// Strips one level of matching `"`, `'` or backtick quotes.
fn parse_string(val: &str) -> String {
    let bytes = val.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'' || first == b'`') {
            return val[1..val.len() - 1].to_string();
        }
    }
    val.to_string()
}

/// Splits a value into its leading integer and whatever suffix follows.
/// Accepts an optional `0x` prefix like a base-0 strtol would.
fn parse_number(val: &str) -> Option<(i64, &str)> {
    let (digits, radix, rest_offset) =
        if let Some(hex) = val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
            let end = hex
                .find(|c: char| !c.is_ascii_hexdigit())
                .unwrap_or(hex.len());
            (&hex[..end], 16, 2 + end)
        } else {
            let end = val.find(|c: char| !c.is_ascii_digit()).unwrap_or(val.len());
            (&val[..end], 10, end)
        };

    if digits.is_empty() {
        return None;
    }
    let n = i64::from_str_radix(digits, radix).ok()?;
    Some((n, val[rest_offset..].trim_start()))
}

fn set_integer<T: TryFrom<i64>>(dest: &mut T, val: &str, key: &str, line: usize) {
    match parse_number(val).and_then(|(n, _)| T::try_from(n).ok()) {
        Some(n) => *dest = n,
        None => tracing::warn!("config line {}: invalid integer for \"{}\"", line, key),
    }
}

/// Durations are milliseconds unless suffixed with `s`, `m` or `h`.
fn set_duration(dest: &mut i64, val: &str, key: &str, line: usize) {
    match parse_number(val) {
        Some((n, suffix)) => {
            *dest = match suffix.chars().next() {
                Some('s') | Some('S') => n * 1000,
                Some('m') | Some('M') => n * 60 * 1000,
                Some('h') | Some('H') => n * 60 * 60 * 1000,
                _ => n,
            };
        }
        None => tracing::warn!("config line {}: invalid duration for \"{}\"", line, key),
    }
}

/// Sizes are bytes unless suffixed with `k` or `m`.
fn set_size(dest: &mut usize, val: &str, key: &str, line: usize) {
    let parsed = parse_number(val).map(|(n, suffix)| match suffix.chars().next() {
        Some('k') | Some('K') => n * 1024,
        Some('m') | Some('M') => n * 1024 * 1024,
        _ => n,
    });

    match parsed.and_then(|n| usize::try_from(n).ok()) {
        Some(n) => *dest = n,
        None => tracing::warn!("config line {}: invalid size for \"{}\"", line, key),
    }
}
