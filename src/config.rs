//! Relay configuration
//!
//! The config file is JSON extended with `//` line and `/* */` block
//! comments; a small scanner strips them before serde sees the text.
//! Single- and double-quoted strings both protect their contents from the
//! stripper, matching what the usual hand-edited configs contain.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::protocol::constants::{DEFAULT_VHOST, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Default merged-write latency budget in milliseconds
pub const DEFAULT_MW_LATENCY: u64 = 350;

fn default_listen() -> u16 {
    1935
}

fn default_chunk_size() -> u32 {
    60_000
}

fn default_mw_latency() -> u64 {
    DEFAULT_MW_LATENCY
}

fn default_log_tank() -> String {
    "console".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// RTMP listen port
    #[serde(default = "default_listen")]
    pub listen: u16,

    /// Runtime worker threads; 0 lets the runtime decide
    #[serde(default)]
    pub workers: u32,

    /// Outgoing chunk size negotiated with every client
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub vhosts: Vec<VhostConfig>,

    /// Telemetry block: recognized, parsed, and ignored by the stream core
    #[serde(default)]
    pub heartbeat: Option<serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: 0,
            chunk_size: default_chunk_size(),
            log: LogConfig::default(),
            vhosts: Vec::new(),
            heartbeat: None,
        }
    }
}

/// Logging sink and level
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// `console` or `file`
    #[serde(default = "default_log_tank")]
    pub tank: String,

    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path when tank is `file`
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            tank: default_log_tank(),
            level: default_log_level(),
            file: None,
        }
    }
}

/// Per-vhost tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VhostConfig {
    pub name: String,

    #[serde(default)]
    pub play: PlayConfig,

    /// Realtime mode: disables merged writes whatever mw_latency says
    #[serde(default)]
    pub min_latency: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayConfig {
    /// Merged-write latency budget in ms; 0 disables batching
    #[serde(default = "default_mw_latency")]
    pub mw_latency: u64,
}

impl Default for PlayConfig {
    fn default() -> Self {
        Self {
            mw_latency: default_mw_latency(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("read {}: {}", path.as_ref().display(), e)))?;
        Self::parse(&text)
    }

    /// Parse config text (comments allowed) and validate it.
    pub fn parse(text: &str) -> Result<Self> {
        let stripped = strip_comments(text);
        let config: Config = serde_json::from_str(&stripped)
            .map_err(|e| Error::Config(format!("parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.listen == 0 {
            return Err(Error::Config("listen port must be 1-65535".into()));
        }
        if self.workers > 64 {
            return Err(Error::Config(format!(
                "workers must be 0-64, got {}",
                self.workers
            )));
        }
        if self.chunk_size < MIN_CHUNK_SIZE || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "chunk_size must be {}-{}, got {}",
                MIN_CHUNK_SIZE, MAX_CHUNK_SIZE, self.chunk_size
            )));
        }
        match self.log.tank.as_str() {
            "console" => {}
            "file" => {
                if self.log.file.is_none() {
                    return Err(Error::Config("log.tank is file but log.file unset".into()));
                }
            }
            other => {
                return Err(Error::Config(format!("unknown log.tank {:?}", other)));
            }
        }
        match self.log.level.as_str() {
            "trace" | "info" | "warn" | "error" => {}
            other => {
                return Err(Error::Config(format!("unknown log.level {:?}", other)));
            }
        }
        Ok(())
    }

    /// Settings for a vhost, falling back to the `__defaultVhost__` entry
    /// and then to built-in defaults.
    pub fn vhost(&self, name: &str) -> VhostConfig {
        self.vhosts
            .iter()
            .find(|v| v.name == name)
            .or_else(|| self.vhosts.iter().find(|v| v.name == DEFAULT_VHOST))
            .cloned()
            .unwrap_or_else(|| VhostConfig {
                name: name.to_string(),
                play: PlayConfig::default(),
                min_latency: false,
            })
    }

    /// Effective merged-write parameters for a vhost:
    /// (mw_latency, batching enabled).
    pub fn merged_write(&self, vhost: &str) -> (u64, bool) {
        let v = self.vhost(vhost);
        let batching = !v.min_latency && v.play.mw_latency > 0;
        (v.play.mw_latency, batching)
    }
}

/// Remove `//` line and `/* */` block comments outside quoted strings.
/// Both `"` and `'` delimit strings; backslash escapes inside them.
fn strip_comments(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Text,
        InString(char),
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Text;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Text => match c {
                '"' | '\'' => {
                    state = State::InString(c);
                    out.push(c);
                }
                '/' => match chars.peek() {
                    Some('/') => {
                        chars.next();
                        state = State::LineComment;
                    }
                    Some('*') => {
                        chars.next();
                        state = State::BlockComment;
                    }
                    _ => out.push(c),
                },
                _ => out.push(c),
            },
            State::InString(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote {
                    state = State::Text;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    out.push(c);
                    state = State::Text;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Text;
                }
            }
        }
    }

    out
}
