//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Tuning for the callback bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bound of the per-run progress channel.
    pub channel_capacity: usize,
    /// How long a worker thread waits for room in a full channel before the
    /// event is dropped.
    pub enqueue_timeout: Duration,
    /// Coordinator wait slice between checks of the stop signal.
    pub poll_interval: Duration,
    /// Time allowed to apply queued events once the blocking call returns.
    pub drain_deadline: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            enqueue_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            drain_deadline: Duration::from_secs(2),
        }
    }
}

/// Retention of finished runs.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Terminal runs idle for longer than this are evicted. `None` keeps
    /// every run for the life of the process.
    pub ttl: Option<Duration>,
    /// Period of the eviction sweep.
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(3600)), // 1 hour
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Bearer secret; when unset every caller is accepted.
    pub auth_secret: Option<SecretString>,
    /// Agent used by routes that do not name one.
    pub default_agent: String,
    /// Maximum concurrent blocking agent calls.
    pub worker_threads: usize,
    pub bridge: BridgeConfig,
    pub retention: RetentionConfig,
    /// Directory for rolling log files; stdout only when unset.
    pub log_dir: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            auth_secret: None,
            default_agent: "echo-agent".to_string(),
            worker_threads: 8,
            bridge: BridgeConfig::default(),
            retention: RetentionConfig::default(),
            log_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Load from `AGENT_JOBS_*` environment variables, defaulting anything
    /// unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let retention_secs = parse(&var, "AGENT_JOBS_RETENTION_SECS")?;
        let retention = RetentionConfig {
            ttl: match retention_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.retention.ttl,
            },
            sweep_interval: parse(&var, "AGENT_JOBS_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention.sweep_interval),
        };

        let bridge = BridgeConfig {
            channel_capacity: parse(&var, "AGENT_JOBS_BRIDGE_CAPACITY")?
                .unwrap_or(defaults.bridge.channel_capacity),
            enqueue_timeout: parse(&var, "AGENT_JOBS_ENQUEUE_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.bridge.enqueue_timeout),
            poll_interval: parse(&var, "AGENT_JOBS_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.bridge.poll_interval),
            drain_deadline: parse(&var, "AGENT_JOBS_DRAIN_DEADLINE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.bridge.drain_deadline),
        };
        if bridge.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_JOBS_BRIDGE_CAPACITY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if retention.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "AGENT_JOBS_SWEEP_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host: var("AGENT_JOBS_HOST").unwrap_or(defaults.host),
            port: parse(&var, "AGENT_JOBS_PORT")?.unwrap_or(defaults.port),
            auth_secret: var("AGENT_JOBS_AUTH_SECRET").map(SecretString::from),
            default_agent: var("AGENT_JOBS_DEFAULT_AGENT").unwrap_or(defaults.default_agent),
            worker_threads: parse(&var, "AGENT_JOBS_WORKER_THREADS")?
                .unwrap_or(defaults.worker_threads),
            bridge,
            retention,
            log_dir: var("AGENT_JOBS_LOG_DIR"),
        })
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T, F>(var: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert!(config.auth_secret.is_none());
        assert_eq!(config.default_agent, "echo-agent");
        assert_eq!(config.bridge.channel_capacity, 256);
        assert_eq!(config.retention.ttl, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("AGENT_JOBS_PORT", "9000"),
            ("AGENT_JOBS_AUTH_SECRET", "s3cret"),
            ("AGENT_JOBS_BRIDGE_CAPACITY", "8"),
            ("AGENT_JOBS_ENQUEUE_TIMEOUT_MS", "25"),
            ("AGENT_JOBS_WORKER_THREADS", "3"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.auth_secret.unwrap().expose_secret(), "s3cret");
        assert_eq!(config.bridge.channel_capacity, 8);
        assert_eq!(config.bridge.enqueue_timeout, Duration::from_millis(25));
        assert_eq!(config.worker_threads, 3);
    }

    #[test]
    fn zero_retention_disables_eviction() {
        let config = load(&[("AGENT_JOBS_RETENTION_SECS", "0")]).unwrap();
        assert!(config.retention.ttl.is_none());
    }

    #[test]
    fn unparseable_value_is_rejected() {
        let err = load(&[("AGENT_JOBS_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "AGENT_JOBS_PORT"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(load(&[("AGENT_JOBS_BRIDGE_CAPACITY", "0")]).is_err());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = load(&[("AGENT_JOBS_AUTH_SECRET", "  ")]).unwrap();
        assert!(config.auth_secret.is_none());
    }
}
