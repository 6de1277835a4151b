use std::env;

/// Process configuration, loaded once at startup from the environment.
///
/// CLI flag parsing and configuration-category fetching from a remote
/// management plane are out of scope here (external collaborators); this
/// only covers the env-var surface the core itself needs to boot.
#[derive(Debug, Clone)]
pub struct Config {
    /// South-side listen address (handed to the out-of-scope south plugin).
    pub south_listen: String,
    /// libpq-style connection string, e.g. `"dbname = foglamp"` or a
    /// `postgres://` URL — `sqlx`'s Postgres connector accepts both.
    pub database_url: String,
    /// Ingest queue drain threshold (readings) before an early wake.
    pub drain_threshold: usize,
    /// Ingest queue drain deadline in milliseconds.
    pub drain_timeout_ms: u64,
    /// Performance monitor housekeeper flush interval.
    pub perf_flush_interval_secs: u64,
    /// North-side fetch/poll interval in milliseconds.
    pub north_poll_ms: u64,
    /// Block size requested from `fetchReadings` per north cycle.
    pub north_block_size: i64,
    /// Bearer token presented to the north HTTP transport, if any.
    pub omf_producer_token: Option<String>,
    /// North endpoint base path readings are POSTed to.
    pub north_endpoint: String,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Builds a `Config` from an arbitrary lookup function rather than the
    /// process environment directly, so defaulting logic is testable
    /// without mutating global env state.
    fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse().ok());
        Self {
            south_listen: lookup("EDGECORE_SOUTH_LISTEN").unwrap_or_else(|| "0.0.0.0:8118".into()),
            database_url: lookup("DB_CONNECTION").unwrap_or_else(|| "dbname = foglamp".into()),
            drain_threshold: parsed("EDGECORE_DRAIN_THRESHOLD").unwrap_or(1000),
            drain_timeout_ms: parsed("EDGECORE_DRAIN_TIMEOUT_MS").unwrap_or(5000),
            perf_flush_interval_secs: parsed("EDGECORE_PERF_FLUSH_SECS").unwrap_or(15),
            north_poll_ms: parsed("EDGECORE_NORTH_POLL_MS").unwrap_or(2000),
            north_block_size: parsed("EDGECORE_NORTH_BLOCK_SIZE").unwrap_or(500),
            omf_producer_token: lookup("EDGECORE_OMF_TOKEN"),
            north_endpoint: lookup("EDGECORE_NORTH_ENDPOINT")
                .unwrap_or_else(|| "https://omf.example/ingress/messages".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::load_from(|_| None);
        assert_eq!(cfg.database_url, "dbname = foglamp");
        assert_eq!(cfg.drain_threshold, 1000);
        assert_eq!(cfg.drain_timeout_ms, 5000);
        assert!(cfg.omf_producer_token.is_none());
    }

    #[test]
    fn overrides_take_the_looked_up_value() {
        let cfg = Config::load_from(|key| (key == "EDGECORE_DRAIN_THRESHOLD").then(|| "42".to_string()));
        assert_eq!(cfg.drain_threshold, 42);
        assert_eq!(cfg.database_url, "dbname = foglamp");
    }
}
