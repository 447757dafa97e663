use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::store::RetryPolicy;

/// Server settings. Every flag can also come from the environment.
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Secret exchange server", long_about = None)]
pub struct Config {
    /// Address the HTTP API binds to.
    #[clap(long, env = "SECRET_EXCHANGE_ADDR", default_value = "127.0.0.1:8000")]
    pub addr: SocketAddr,

    /// Segment file for durable storage. Without it records live in memory.
    #[clap(long, env = "SECRET_EXCHANGE_DATA")]
    pub data: Option<PathBuf>,

    /// Save attempts per atomic update before giving up.
    #[clap(long, env = "SECRET_EXCHANGE_MAX_ATTEMPTS", default_value = "8")]
    pub max_attempts: u32,

    #[clap(long, env = "SECRET_EXCHANGE_INITIAL_BACKOFF_MS", default_value = "10")]
    pub initial_backoff_ms: u64,

    #[clap(long, env = "SECRET_EXCHANGE_MAX_BACKOFF_MS", default_value = "1000")]
    pub max_backoff_ms: u64,

    /// Seconds between segment compactions. 0 disables them.
    #[clap(long, env = "SECRET_EXCHANGE_COMPACT_INTERVAL_SECS", default_value = "600")]
    pub compact_interval_secs: u64,

    /// fsync after every write, regardless of the detected system profile.
    #[clap(long, env = "SECRET_EXCHANGE_STRICT_DURABILITY")]
    pub strict_durability: bool,
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
        }
    }

    pub fn compact_interval(&self) -> Option<Duration> {
        (self.compact_interval_secs > 0).then(|| Duration::from_secs(self.compact_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["secret-exchange"]).unwrap();
        assert_eq!(config.addr, "127.0.0.1:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.data, None);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.compact_interval(), Some(Duration::from_secs(600)));
        assert!(!config.strict_durability);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "secret-exchange",
            "--addr",
            "0.0.0.0:9000",
            "--data",
            "/tmp/secrets.seg",
            "--max-attempts",
            "0",
            "--initial-backoff-ms",
            "50",
            "--max-backoff-ms",
            "20",
            "--compact-interval-secs",
            "0",
            "--strict-durability",
        ])
        .unwrap();

        assert_eq!(config.data, Some(PathBuf::from("/tmp/secrets.seg")));
        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 1);
        assert_eq!(retry.initial_backoff, Duration::from_millis(50));
        // the cap never undercuts the starting backoff
        assert_eq!(retry.max_backoff, Duration::from_millis(50));
        assert_eq!(config.compact_interval(), None);
        assert!(config.strict_durability);
    }
}
