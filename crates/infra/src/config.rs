//! Environment-driven pipeline configuration.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::delivery::DeliveryWorkerConfig;
use crate::delivery::bulk::{DEFAULT_BULK_BATCH_SIZE, DEFAULT_BULK_DELAY};
use crate::prober::DEFAULT_PROBE_TIMEOUT;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Postgres URL when persistent stores are enabled.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub worker_id: String,
    pub worker_count: usize,
    pub worker_batch_size: usize,
    pub worker_poll_interval: Duration,
    pub bulk_batch_size: usize,
    pub bulk_delay: Duration,
    pub probe_timeout: Duration,
    /// `json` or `pretty`.
    pub log_format: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            worker_id: format!("worker-{}", uuid::Uuid::now_v7()),
            worker_count: 1,
            worker_batch_size: 10,
            worker_poll_interval: Duration::from_millis(1000),
            bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
            bulk_delay: DEFAULT_BULK_DELAY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            log_format: "json".to_string(),
        }
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn positive(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match parse::<usize>(var, raw)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be at least 1".to_string(),
        }),
        n => Ok(n),
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        let persistent = match get("USE_PERSISTENT_STORES") {
            Some(raw) => parse::<bool>("USE_PERSISTENT_STORES", &raw)?,
            None => false,
        };
        if persistent {
            config.database_url = Some(get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?);
        }

        if let Some(raw) = get("MAILROOM_BIND_ADDR") {
            config.bind_addr = parse("MAILROOM_BIND_ADDR", &raw)?;
        }
        if let Some(raw) = get("MAILROOM_WORKER_ID") {
            config.worker_id = raw.trim().to_string();
        }
        if let Some(raw) = get("MAILROOM_WORKER_COUNT") {
            config.worker_count = parse("MAILROOM_WORKER_COUNT", &raw)?;
        }
        if let Some(raw) = get("MAILROOM_WORKER_BATCH_SIZE") {
            config.worker_batch_size = positive("MAILROOM_WORKER_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = get("MAILROOM_WORKER_POLL_INTERVAL_MS") {
            config.worker_poll_interval =
                Duration::from_millis(parse("MAILROOM_WORKER_POLL_INTERVAL_MS", &raw)?);
        }
        if let Some(raw) = get("MAILROOM_BULK_BATCH_SIZE") {
            config.bulk_batch_size = positive("MAILROOM_BULK_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = get("MAILROOM_BULK_DELAY_MS") {
            config.bulk_delay = Duration::from_millis(parse("MAILROOM_BULK_DELAY_MS", &raw)?);
        }
        if let Some(raw) = get("MAILROOM_PROBE_TIMEOUT_SECS") {
            let secs: u64 = parse("MAILROOM_PROBE_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    var: "MAILROOM_PROBE_TIMEOUT_SECS",
                    value: raw,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = get("MAILROOM_LOG_FORMAT") {
            let format = raw.trim().to_ascii_lowercase();
            if !matches!(format.as_str(), "json" | "pretty" | "text") {
                return Err(ConfigError::Invalid {
                    var: "MAILROOM_LOG_FORMAT",
                    value: raw,
                    reason: "expected 'json' or 'pretty'".to_string(),
                });
            }
            config.log_format = format;
        }

        Ok(config)
    }

    pub fn is_persistent(&self) -> bool {
        self.database_url.is_some()
    }

    /// Worker settings for the `index`-th in-process worker. Ids stay unique
    /// across workers of one process.
    pub fn worker(&self, index: usize) -> DeliveryWorkerConfig {
        let worker_id = if self.worker_count > 1 {
            format!("{}-{index}", self.worker_id)
        } else {
            self.worker_id.clone()
        };
        DeliveryWorkerConfig::default()
            .with_worker_id(worker_id)
            .with_batch_size(self.worker_batch_size)
            .with_poll_interval(self.worker_poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert!(!config.is_persistent());
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.worker_batch_size, 10);
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.bulk_delay, Duration::from_millis(100));
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        assert_eq!(
            load(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let config = load(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/mail"),
        ])
        .unwrap();
        assert!(config.is_persistent());
    }

    #[test]
    fn bad_numbers_are_errors_not_defaults() {
        let err = load(&[("MAILROOM_WORKER_BATCH_SIZE", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "MAILROOM_WORKER_BATCH_SIZE", .. }));
        assert!(load(&[("MAILROOM_BULK_BATCH_SIZE", "0")]).is_err());
        assert!(load(&[("MAILROOM_LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn worker_ids_are_suffixed_when_several_run() {
        let config = load(&[("MAILROOM_WORKER_ID", "node-a"), ("MAILROOM_WORKER_COUNT", "2")]).unwrap();
        assert_eq!(config.worker(0).worker_id, "node-a-0");
        assert_eq!(config.worker(1).worker_id, "node-a-1");

        let single = load(&[("MAILROOM_WORKER_ID", "node-a")]).unwrap();
        assert_eq!(single.worker(0).worker_id, "node-a");
    }
}
