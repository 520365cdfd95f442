//! Server configuration parsed from environment variables.
//!
//! Optional:
//! - `HOST`: bind address, default `0.0.0.0`
//! - `PORT`: bind port, default 3000
//! - `DEFAULT_ROOM`: room joined when `join-room` omits `roomId`, default `default`
//! - `CLIENT_CHANNEL_CAPACITY`: per-connection outbound queue depth, default 256
//!
//! Unparseable values fall back to their defaults.

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_ROOM: &str = "default";
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub default_room: String,
    pub client_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            default_room: DEFAULT_ROOM.to_owned(),
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Build config from process environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        Self {
            host: non_empty("HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: parse_or(non_empty("PORT"), DEFAULT_PORT),
            default_room: non_empty("DEFAULT_ROOM").unwrap_or_else(|| DEFAULT_ROOM.to_owned()),
            // tokio mpsc channels panic on zero capacity.
            client_channel_capacity: Some(parse_or(non_empty("CLIENT_CHANNEL_CAPACITY"), DEFAULT_CLIENT_CHANNEL_CAPACITY))
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_CLIENT_CHANNEL_CAPACITY),
        }
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr,
{
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
