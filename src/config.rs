use envconfig::Envconfig;
use std::path::PathBuf;
use std::time::Duration;

/// Process settings read from the environment.
///
/// These are distinct from the persisted [`OverlayConfig`](crate::config_store::OverlayConfig):
/// settings describe where the service runs and which cache it talks to, and are never
/// written back.
#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Path of the persisted overlay configuration file
    #[envconfig(from = "OVERLAY_CONFIG_PATH", default = "config/overlay.json")]
    pub config_path: PathBuf,

    /// Host the listener binds to; the port comes from the overlay config
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub bind_host: String,

    /// Single-node Redis endpoint
    #[envconfig(from = "REDIS_URL", default = "redis://localhost:6379/0")]
    pub redis_url: String,

    /// Comma-separated `host:port` list of cluster nodes
    #[envconfig(from = "REDIS_CLUSTER_NODES")]
    pub redis_cluster_nodes: Option<String>,

    /// Comma-separated `host:port` list of sentinels
    #[envconfig(from = "REDIS_SENTINELS")]
    pub redis_sentinels: Option<String>,

    /// Service name monitored by the sentinels
    #[envconfig(from = "REDIS_SENTINEL_SERVICE")]
    pub redis_sentinel_service: Option<String>,

    /// Upper bound on a single counter store round-trip
    #[envconfig(from = "REDIS_TIMEOUT_MS", default = "2000")]
    pub redis_timeout_ms: u64,

    /// How long in-flight requests may run after a shutdown request
    #[envconfig(from = "SHUTDOWN_GRACE_SECS", default = "10")]
    pub shutdown_grace_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.config_path, PathBuf::from("config/overlay.json"));
        assert_eq!(config.redis_url, "redis://localhost:6379/0");
        assert!(config.redis_cluster_nodes.is_none());
        assert!(config.redis_sentinels.is_none());
        assert!(config.redis_sentinel_service.is_none());
        assert_eq!(config.redis_timeout(), Duration::from_secs(2));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_reads_topology_variables() {
        let mut env = HashMap::new();
        env.insert("REDIS_SENTINELS".to_string(), "x:1,y:2".to_string());
        env.insert("REDIS_SENTINEL_SERVICE".to_string(), "svc".to_string());
        env.insert("REDIS_TIMEOUT_MS".to_string(), "250".to_string());

        let config = Config::init_from_hashmap(&env).unwrap();
        assert_eq!(config.redis_sentinels.as_deref(), Some("x:1,y:2"));
        assert_eq!(config.redis_sentinel_service.as_deref(), Some("svc"));
        assert_eq!(config.redis_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_non_numeric_timeout() {
        let mut env = HashMap::new();
        env.insert("REDIS_TIMEOUT_MS".to_string(), "soon".to_string());
        assert!(Config::init_from_hashmap(&env).is_err());
    }
}
