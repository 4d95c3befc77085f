//! Process configuration.
//!
//! Kept deliberately small, in the same spirit as this codebase's own `env::args().nth(1)`
//! convention in `main.rs` — a CLI flag parser is more machinery than a single-binary chat hub
//! needs.

use std::time::Duration;

/// Default bind address when no port is given on the command line.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Base unit for the connection's idle-read timeout (§5). The hub never originates a `ping`
/// itself — a client may send one and get a `pong` back — this is purely how long the transport
/// will wait for *any* line from the peer before treating the connection as dead.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// The idle-read timeout is this many multiples of [`DEFAULT_PING_INTERVAL`] (§5).
pub const DEFAULT_PING_TIMEOUT_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub ping_interval: Duration,
    pub ping_timeout_multiplier: u32,
}

impl Config {
    /// Builds a config from the process's command-line arguments: an optional first positional
    /// argument is either a bare port (`8080`) or a full `host:port` address.
    pub fn from_args() -> Self {
        let arg = std::env::args().nth(1);
        Self::from_arg(arg)
    }

    fn from_arg(arg: Option<String>) -> Self {
        let listen_addr = match arg {
            Some(value) if value.contains(':') => value,
            Some(port) => format!("127.0.0.1:{port}"),
            None => DEFAULT_LISTEN_ADDR.to_string(),
        };
        Self {
            listen_addr,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout_multiplier: DEFAULT_PING_TIMEOUT_MULTIPLIER,
        }
    }

    /// How long the transport will wait for a line from the peer before dropping the connection
    /// — a passive idle-read timeout, not a round trip with an active probe.
    pub fn ping_timeout(&self) -> Duration {
        self.ping_interval * self.ping_timeout_multiplier
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_arg(None)
    }
}
