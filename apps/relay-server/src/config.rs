use std::str::FromStr;
use std::time::Duration;

/// Which persistence backend the relay talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local store. Nothing survives a restart.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend `{other}`")),
        }
    }
}

/// Relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageBackend,
    /// PostgreSQL connection string. Required when `storage` is Postgres.
    pub database_url: Option<String>,
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Maximum queued messages per connected user before the oldest is evicted.
    pub mailbox_capacity: usize,
    /// Cadence clients are expected to heartbeat at when idle.
    pub heartbeat_interval: Duration,
    /// The server emits its own heartbeat after this long without outbound traffic.
    pub outbound_heartbeat: Duration,
    /// A connection with no inbound frame for this long is closed.
    pub idle_timeout: Duration,
    /// Attempts per storage operation when the backend is unreachable.
    pub storage_retry_attempts: u32,
    /// Base delay between storage attempts; grows linearly per attempt.
    pub storage_retry_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageBackend::Memory,
            database_url: None,
            port: 50051,
            mailbox_capacity: 256,
            heartbeat_interval: Duration::from_millis(100),
            outbound_heartbeat: Duration::from_millis(1000),
            idle_timeout: Duration::from_secs(30),
            storage_retry_attempts: 3,
            storage_retry_backoff: Duration::from_millis(1000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing
    /// or malformed.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let storage = match std::env::var("RELAY_STORAGE") {
            Ok(v) => v
                .parse()
                .unwrap_or_else(|e: String| panic!("RELAY_STORAGE: {e}")),
            Err(_) => StorageBackend::Postgres,
        };

        let database_url = match storage {
            StorageBackend::Postgres => Some(required_var("DATABASE_URL")),
            StorageBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };

        Self {
            storage,
            database_url,
            port: parsed_var("PORT").unwrap_or(defaults.port),
            mailbox_capacity: positive(parsed_var::<usize>("MAILBOX_CAPACITY"))
                .unwrap_or(defaults.mailbox_capacity),
            heartbeat_interval: parsed_var("HEARTBEAT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
            outbound_heartbeat: positive(parsed_var("OUTBOUND_HEARTBEAT_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbound_heartbeat),
            idle_timeout: positive(parsed_var("IDLE_TIMEOUT_SECS"))
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            storage_retry_attempts: positive(parsed_var::<u32>("STORAGE_RETRY_ATTEMPTS"))
                .unwrap_or(defaults.storage_retry_attempts),
            storage_retry_backoff: parsed_var("STORAGE_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.storage_retry_backoff),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Zero is never usable for these settings; treat it as unset.
fn positive<T: PartialOrd + Default>(value: Option<T>) -> Option<T> {
    value.filter(|v| *v > T::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parses_aliases() {
        assert_eq!("postgres".parse::<StorageBackend>(), Ok(StorageBackend::Postgres));
        assert_eq!(" PG ".parse::<StorageBackend>(), Ok(StorageBackend::Postgres));
        assert_eq!("memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn defaults_match_reference_cadence() {
        let config = Config::default();
        assert_eq!(config.heartbeat_interval, Duration::from_millis(100));
        assert_eq!(config.storage_retry_attempts, 3);
        assert!(config.mailbox_capacity > 0);
    }

    #[test]
    fn zero_values_fall_back_to_defaults() {
        assert_eq!(positive(Some(0u64)), None);
        assert_eq!(positive(Some(250u64)), Some(250));
        assert_eq!(positive::<u32>(None), None);

        let defaults = Config::default();
        let outbound = positive(Some(0u64))
            .map(Duration::from_millis)
            .unwrap_or(defaults.outbound_heartbeat);
        assert_eq!(outbound, Duration::from_millis(1000));
    }
}
