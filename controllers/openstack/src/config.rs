//! Controller configuration
//!
//! Read once from environment variables at start-up.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings of the controller
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    /// Address of the `/healthz` and `/readyz` endpoints
    pub probe_addr: SocketAddr,
    /// Reconciles running at once, per object kind
    pub concurrency: u16,
    /// Quiet period after the last change event before reconciling
    pub debounce: Duration,
    pub backoff_min_seconds: u64,
    pub backoff_max_seconds: u64,
    /// Timeout of a single OpenStack API request
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: None,
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            concurrency: 4,
            debounce: Duration::from_secs(1),
            backoff_min_seconds: 5,
            backoff_max_seconds: 300,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let config = Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            probe_addr: parse(&lookup, "PROBE_ADDR")?.unwrap_or(defaults.probe_addr),
            concurrency: parse(&lookup, "RECONCILE_CONCURRENCY")?.unwrap_or(defaults.concurrency),
            debounce: parse(&lookup, "DEBOUNCE_SECONDS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.debounce),
            backoff_min_seconds: parse(&lookup, "BACKOFF_MIN_SECONDS")?.unwrap_or(defaults.backoff_min_seconds),
            backoff_max_seconds: parse(&lookup, "BACKOFF_MAX_SECONDS")?.unwrap_or(defaults.backoff_max_seconds),
            request_timeout: parse(&lookup, "OPENSTACK_REQUEST_TIMEOUT_SECONDS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };

        if config.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if config.backoff_min_seconds == 0 || config.backoff_min_seconds > config.backoff_max_seconds {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff bounds {}s..{}s are invalid",
                config.backoff_min_seconds, config.backoff_max_seconds
            )));
        }
        Ok(config)
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ControllerError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ControllerError::InvalidConfig(format!("{key}={raw:?} is not valid"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(load(&[]).unwrap(), Config::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WATCH_NAMESPACE", "capi-system"),
            ("PROBE_ADDR", "127.0.0.1:9090"),
            ("RECONCILE_CONCURRENCY", "8"),
            ("OPENSTACK_REQUEST_TIMEOUT_SECONDS", "30"),
        ])
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("capi-system"));
        assert_eq!(config.probe_addr.port(), 9090);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("RECONCILE_CONCURRENCY", "lots")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("BACKOFF_MIN_SECONDS", "600")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }
}
