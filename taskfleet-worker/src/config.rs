use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // ── Coordination service ────────────────────────────────────────
    #[envconfig(default = "http://localhost:2379")]
    pub etcd_endpoints: String,

    #[envconfig(default = "10")]
    pub lease_ttl_secs: i64,

    // ── Queue store ─────────────────────────────────────────────────
    #[envconfig(default = "redis://localhost:6379")]
    pub redis_url: String,

    /// Back-off while this worker owns no partitions.
    #[envconfig(default = "1000")]
    pub idle_backoff: EnvMsDuration,

    /// Back-off after a failed pop (other than a rebalance restart).
    #[envconfig(default = "1000")]
    pub error_backoff: EnvMsDuration,

    // ── Metrics endpoint ────────────────────────────────────────────
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    /// Port for the scrape endpoint. 0 assigns the fleet convention
    /// `11111 + pid % 1000`.
    #[envconfig(from = "BIND_PORT", default = "0")]
    pub port: u16,

    /// Host other processes use to reach the scrape endpoint; advertised
    /// through the coordination service for discovery.
    #[envconfig(default = "localhost")]
    pub advertise_host: String,

    #[envconfig(default = "5000")]
    pub metrics_log_interval: EnvMsDuration,
}

impl Config {
    pub fn etcd_endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn metrics_port(&self) -> u16 {
        if self.port != 0 {
            self.port
        } else {
            11111 + (std::process::id() % 1000) as u16
        }
    }

    /// `host:port` for binding the scrape endpoint's listener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.metrics_port())
    }

    /// `host:port` advertised to the discovery sidecar.
    pub fn advertise(&self) -> String {
        format!("{}:{}", self.advertise_host, self.metrics_port())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;
        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}
