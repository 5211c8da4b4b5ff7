//! Configuration file management for ogn-live.
//!
//! Reads/writes `~/.ogn-live/config.yaml` with upstream feed settings,
//! tracker bounds, and the relay server address.

use std::path::{Path, PathBuf};

use crate::types::OgnError;

/// Full configuration structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub feed: FeedConfig,
    pub tracker: TrackerConfig,
    pub server: ServerConfig,
}

/// Upstream feed connection and login.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// `-1` is the receive-only sentinel.
    pub pass: String,
    pub client: String,
    pub version: String,
    pub filter: String,
    /// Seconds between a dropped connection and the next attempt.
    pub reconnect_delay: f64,
    /// Seconds without any bytes, or spent connecting, before the
    /// connection counts as dead.
    pub idle_timeout: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub trail_length: usize,
    /// Seconds an aircraft stays live without a new report.
    pub ttl: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-subscriber queue capacity.
    pub queue: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            host: "aprs.glidernet.org".into(),
            port: 14580,
            user: "FOCACH".into(),
            pass: "-1".into(),
            client: "ogn-live".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            filter: "r/46.8182/8.2275/250".into(),
            reconnect_delay: 5.0,
            idle_timeout: 60.0,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            trail_length: 100,
            ttl: 60.0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            queue: 256,
        }
    }
}

impl FeedConfig {
    /// `host:port` for the stream socket.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Get the config directory path (`~/.ogn-live/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".ogn-live")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.ogn-live/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    load_config_from(&config_file()).unwrap_or_default()
}

/// Load config from an explicit path. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<Config, OgnError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| OgnError::Config(format!("{}: {e}", path.display())))?;
    Ok(parse_config(&text))
}

/// Save config to `~/.ogn-live/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, OgnError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save config to an explicit path, creating parent directories.
pub fn save_config_to(config: &Config, path: &Path) -> Result<(), OgnError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| OgnError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| OgnError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys and unparsable values
/// leave the default in place.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }

        match current_section.as_deref() {
            Some("feed") => apply_feed(&mut config.feed, key, val),
            Some("tracker") => match key {
                "trail_length" => set_parsed(&mut config.tracker.trail_length, val),
                "ttl" => set_parsed(&mut config.tracker.ttl, val),
                _ => {}
            },
            Some("server") => match key {
                "host" => set_string(&mut config.server.host, val),
                "port" => set_parsed(&mut config.server.port, val),
                "queue" => set_parsed(&mut config.server.queue, val),
                _ => {}
            },
            _ => {}
        }
    }

    config
}

fn apply_feed(feed: &mut FeedConfig, key: &str, val: &str) {
    match key {
        "host" => set_string(&mut feed.host, val),
        "port" => set_parsed(&mut feed.port, val),
        "user" => set_string(&mut feed.user, val),
        "pass" => set_string(&mut feed.pass, val),
        "client" => set_string(&mut feed.client, val),
        "version" => set_string(&mut feed.version, val),
        "filter" => set_string(&mut feed.filter, val),
        "reconnect_delay" => set_parsed(&mut feed.reconnect_delay, val),
        "idle_timeout" => set_parsed(&mut feed.idle_timeout, val),
        _ => {}
    }
}

fn set_string(slot: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *slot = v;
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, val: &str) {
    if let Some(v) = parse_string_value(val).and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let feed = &config.feed;
    let mut lines = vec!["# ogn-live configuration".to_string(), String::new()];

    lines.push("feed:".into());
    lines.push(format!("  host: \"{}\"", feed.host));
    lines.push(format!("  port: {}", feed.port));
    lines.push(format!("  user: \"{}\"", feed.user));
    lines.push(format!("  pass: \"{}\"", feed.pass));
    lines.push(format!("  client: \"{}\"", feed.client));
    lines.push(format!("  version: \"{}\"", feed.version));
    lines.push(format!("  filter: \"{}\"", feed.filter));
    lines.push(format!("  reconnect_delay: {}", feed.reconnect_delay));
    lines.push(format!("  idle_timeout: {}", feed.idle_timeout));
    lines.push(String::new());

    lines.push("tracker:".into());
    lines.push(format!("  trail_length: {}", config.tracker.trail_length));
    lines.push(format!("  ttl: {}", config.tracker.ttl));
    lines.push(String::new());

    lines.push("server:".into());
    lines.push(format!("  host: \"{}\"", config.server.host));
    lines.push(format!("  port: {}", config.server.port));
    lines.push(format!("  queue: {}", config.server.queue));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
