//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::time::Duration;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Depth of each connection's outbound frame queue.
    pub outbound_buffer: usize,

    /// Close a connection after this long without an inbound frame.
    /// `None` disables the read deadline.
    pub idle_timeout: Option<Duration>,

    /// Deadline for a single handler invocation. `None` disables it.
    pub handler_timeout: Option<Duration>,

    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_bytes: usize,

    /// `token:identity` pairs for the static bearer authenticator.
    pub auth_tokens: String,

    /// Tracing output format.
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            outbound_buffer: 256,
            idle_timeout: None,
            handler_timeout: None,
            max_message_bytes: 64 * 1024,
            auth_tokens: String::new(),
            log_format: LogFormat::Text,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr: SocketAddr = match std::env::var("LISTEN_ADDR") {
            Ok(addr) => addr.parse()?,
            Err(_) => defaults.listen_addr,
        };

        let outbound_buffer = parse_env("WS_OUTBOUND_BUFFER", defaults.outbound_buffer).max(1);
        let idle_timeout = parse_env_secs("WS_IDLE_TIMEOUT_SECS");
        let handler_timeout = parse_env_secs("HANDLER_TIMEOUT_SECS");
        let max_message_bytes = parse_env("WS_MAX_MESSAGE_BYTES", defaults.max_message_bytes);
        let auth_tokens = std::env::var("AUTH_TOKENS").unwrap_or_default();
        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            outbound_buffer,
            idle_timeout,
            handler_timeout,
            max_message_bytes,
            auth_tokens,
            log_format,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses a whole number of seconds. Missing, invalid or `0` means off.
fn parse_env_secs(key: &str) -> Option<Duration> {
    match parse_env::<u64>(key, 0) {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}
