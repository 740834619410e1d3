//! RTMP request: tcUrl + stream name → vhost/app/stream
//!
//! The standard url is `rtmp://host:port/app?params`, but clients are
//! inventive:
//!
//! ```text
//! rtmp://vhost/app/stream               vhost in tcUrl
//! rtmp://ip/app?vhost=vhost             vhost in tcUrl query
//! rtmp://ip/app + play("stream?vhost=v") vhost smuggled in the stream name
//! rtmp://ip/app...vhost...v/stream      separators mangled by encoders that
//!                                       cannot emit '?' or '&'
//! ```
//!
//! All forms are normalized here into one request carrying the canonical
//! `vhost/app/stream` key.

use crate::error::{Error, Result};
use crate::protocol::constants::{DEFAULT_VHOST, RTMP_PORT};

/// The client type identified from the command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnType {
    Unknown,
    Play,
    FmlePublish,
    FlashPublish,
}

impl ConnType {
    pub fn is_play(&self) -> bool {
        matches!(self, ConnType::Play)
    }

    pub fn is_publish(&self) -> bool {
        matches!(self, ConnType::FmlePublish | ConnType::FlashPublish)
    }
}

impl std::fmt::Display for ConnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnType::Unknown => write!(f, "unknown"),
            ConnType::Play => write!(f, "play"),
            ConnType::FmlePublish => write!(f, "fmle-publish"),
            ConnType::FlashPublish => write!(f, "flash-publish"),
        }
    }
}

/// Parsed session request, filled in across connect and identify
#[derive(Debug, Clone)]
pub struct Request {
    /// The tcUrl announced in connect
    pub tc_url: String,
    /// Object encoding requested by the client
    pub object_encoding: f64,
    /// Stream name from publish/play
    pub stream: String,
    /// Client type from identify
    pub conn_type: ConnType,
    /// Play duration argument, when given
    pub duration: f64,

    /// Vhost parsed from tcUrl host or query override
    pub vhost: String,
    /// App parsed from the tcUrl path
    pub app: String,
    /// Port from tcUrl, defaulting to 1935
    pub port: u16,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            tc_url: String::new(),
            object_encoding: 0.0,
            stream: String::new(),
            conn_type: ConnType::Unknown,
            duration: -1.0,
            vhost: String::new(),
            app: String::new(),
            port: RTMP_PORT,
        }
    }
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical stream key, `vhost/app/stream`. The default vhost is
    /// elided so keys read naturally in logs.
    pub fn key(&self) -> String {
        let mut key = String::new();
        if self.vhost != DEFAULT_VHOST {
            key.push_str(&self.vhost);
        }
        key.push('/');
        key.push_str(&self.app);
        key.push('/');
        key.push_str(&self.stream);
        key
    }

    /// Reparse tcUrl and stream once both are known (after identify).
    ///
    /// Resolves vhost/app/port, applies the query overrides, and validates
    /// the result.
    pub fn reparse(&mut self) -> Result<()> {
        let tc_url = normalize_separators(&self.tc_url);
        let stream = normalize_separators(&self.stream);

        // pull query strings off both parts; stream params win last
        let (tc_url, mut params) = match tc_url.split_once('?') {
            Some((u, q)) => (u.to_string(), q.to_string()),
            None => (tc_url, String::new()),
        };
        let (stream, stream_params) = match stream.split_once('?') {
            Some((s, q)) => (s.to_string(), q.to_string()),
            None => (stream, String::new()),
        };
        if !stream_params.is_empty() {
            if !params.is_empty() {
                params.push_str("&&");
            }
            params.push_str(&stream_params);
        }

        let rest = tc_url
            .strip_prefix("rtmp://")
            .ok_or_else(|| Error::InvalidStreamKey(self.tc_url.clone()))?;

        let (authority, path) = match rest.split_once('/') {
            Some((a, p)) => (a, p),
            None => (rest, ""),
        };

        let (host, port) = match authority.split_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse::<u16>()
                    .ok()
                    .filter(|p| *p > 0)
                    .unwrap_or(RTMP_PORT);
                (h, port)
            }
            None => (authority, RTMP_PORT),
        };

        self.vhost = host.to_string();
        self.port = port;
        self.app = path.trim_matches('/').to_string();
        self.stream = stream.trim_matches('/').to_string();

        // query overrides: vhost= or domain=
        for pair in params.split("&&").flat_map(|p| p.split('&')) {
            if let Some((name, value)) = pair.split_once('=') {
                if (name == "vhost" || name == "domain") && !value.is_empty() {
                    self.vhost = value.to_string();
                }
            }
        }

        if self.vhost.is_empty() {
            self.vhost = DEFAULT_VHOST.to_string();
        }
        if self.app.is_empty() {
            return Err(Error::InvalidStreamKey(format!(
                "no app in tcUrl {}",
                self.tc_url
            )));
        }

        Ok(())
    }
}

/// Rewrite the `...`/`___` separator mangling some encoders apply:
/// `app...pn0...pv0...pn1...pv1` becomes `app?pn0=pv0&&pn1=pv1`.
fn normalize_separators(s: &str) -> String {
    let mut r = s.to_string();
    for pattern in ["...", "___", "?", "&&", "&"] {
        r = r.replace(pattern, "...");
    }

    let mut out = r;
    let mut first = true;
    loop {
        if !out.contains("...") {
            break;
        }
        out = out.replacen("...", if first { "?" } else { "&&" }, 1);
        first = false;

        if !out.contains("...") {
            break;
        }
        out = out.replacen("...", "=", 1);
    }
    out
}
