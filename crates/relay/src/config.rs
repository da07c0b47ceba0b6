// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development, including the per-connection and per-room tuning knobs of
// the real-time layer.

use std::{net::SocketAddr, time::Duration};

pub const DEV_JWT_SECRET: &str = "watchroom_local_development_jwt_secret_must_be_32_chars";

pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4_096;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
pub const DEFAULT_ROOM_INBOX_CAPACITY: usize = 1_024;
pub const DEFAULT_MEDIA_SYNC_INTERVAL_MS: u64 = 5_000;

/// Limits applied to every participant connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Deadline for a single outbound frame (messages and pings).
    pub write_timeout: Duration,
    /// A connection that delivers no frame for this long is dropped.
    pub idle_timeout: Duration,
    /// Largest inbound text frame that is decoded.
    pub max_frame_bytes: usize,
    /// Outbound queue depth; a full queue evicts the connection.
    pub outbound_capacity: usize,
}

impl ConnectionConfig {
    /// Pings go out at 90% of the idle window.
    pub fn ping_interval(&self) -> Duration {
        self.idle_timeout * 9 / 10
    }

    /// Hard cap enforced by the WebSocket codec itself. Frames between
    /// `max_frame_bytes` and this cap get a scoped error instead of a close.
    pub fn transport_frame_limit(&self) -> usize {
        self.max_frame_bytes.saturating_mul(16)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Settings for each room session actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConfig {
    pub inbox_capacity: usize,
    pub media_sync_interval: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: DEFAULT_ROOM_INBOX_CAPACITY,
            media_sync_interval: Duration::from_millis(DEFAULT_MEDIA_SYNC_INTERVAL_MS),
        }
    }
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    /// HS256 secret shared with the service that issues access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string for the room catalog. `None` selects
    /// the in-memory catalog.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `watchroom_relay=debug`).
    pub log_filter: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
    pub connection: ConnectionConfig,
    pub room: RoomConfig,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `WATCHROOM_RELAY_HOST` | `0.0.0.0` |
    /// | `WATCHROOM_RELAY_PORT` | `8080` |
    /// | `WATCHROOM_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `WATCHROOM_RELAY_DATABASE_URL` | *(none)* |
    /// | `WATCHROOM_RELAY_CORS_ORIGINS` | *(none, dev origins)* |
    /// | `WATCHROOM_RELAY_LOG_FILTER` | `info` |
    /// | `WATCHROOM_RELAY_LOG_FORMAT` | `text` (`json` for structured output) |
    /// | `WATCHROOM_RELAY_WS_WRITE_TIMEOUT_MS` | `10000` |
    /// | `WATCHROOM_RELAY_WS_IDLE_TIMEOUT_MS` | `60000` |
    /// | `WATCHROOM_RELAY_WS_MAX_FRAME_BYTES` | `4096` |
    /// | `WATCHROOM_RELAY_WS_OUTBOUND_CAPACITY` | `256` |
    /// | `WATCHROOM_RELAY_ROOM_INBOX_CAPACITY` | `1024` |
    /// | `WATCHROOM_RELAY_MEDIA_SYNC_INTERVAL_MS` | `5000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("WATCHROOM_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("WATCHROOM_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("WATCHROOM_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let database_url = env("WATCHROOM_RELAY_DATABASE_URL").ok().filter(|v| !v.is_empty());
        let cors_origins = env("WATCHROOM_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("WATCHROOM_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json =
            env("WATCHROOM_RELAY_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

        let positive_u64 = |key: &str, default: u64| {
            env(key).ok().and_then(|v| v.parse::<u64>().ok()).filter(|v| *v > 0).unwrap_or(default)
        };
        let positive_usize = |key: &str, default: usize| {
            env(key)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let connection = ConnectionConfig {
            write_timeout: Duration::from_millis(positive_u64(
                "WATCHROOM_RELAY_WS_WRITE_TIMEOUT_MS",
                DEFAULT_WRITE_TIMEOUT_MS,
            )),
            idle_timeout: Duration::from_millis(positive_u64(
                "WATCHROOM_RELAY_WS_IDLE_TIMEOUT_MS",
                DEFAULT_IDLE_TIMEOUT_MS,
            )),
            max_frame_bytes: positive_usize(
                "WATCHROOM_RELAY_WS_MAX_FRAME_BYTES",
                DEFAULT_MAX_FRAME_BYTES,
            ),
            outbound_capacity: positive_usize(
                "WATCHROOM_RELAY_WS_OUTBOUND_CAPACITY",
                DEFAULT_OUTBOUND_CAPACITY,
            ),
        };

        let room = RoomConfig {
            inbox_capacity: positive_usize(
                "WATCHROOM_RELAY_ROOM_INBOX_CAPACITY",
                DEFAULT_ROOM_INBOX_CAPACITY,
            ),
            media_sync_interval: Duration::from_millis(positive_u64(
                "WATCHROOM_RELAY_MEDIA_SYNC_INTERVAL_MS",
                DEFAULT_MEDIA_SYNC_INTERVAL_MS,
            )),
        };

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            cors_origins,
            log_filter,
            log_json,
            connection,
            room,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
