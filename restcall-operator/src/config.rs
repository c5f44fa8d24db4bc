use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{OperatorError, Result};

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_RESYNC_SECONDS: u64 = 300;
const DEFAULT_INITIAL_BACKOFF_MILLIS: u64 = 5;
const DEFAULT_MAX_BACKOFF_SECONDS: u64 = 1000;
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_MAX_REDIRECTS: usize = 10;
const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub controller: ControllerConfig,
    pub backoff: BackoffConfig,
    pub http: HttpClientConfig,
}

impl OperatorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OperatorError::invalid_config(format!(
                "cannot read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub workers: usize,
    #[serde(with = "humantime_serde")]
    pub resync_period: Duration,
    /// Restricts the watch to one namespace; `None` watches the whole cluster.
    pub namespace: Option<String>,
    /// Drop update notifications that did not change `metadata.generation`.
    pub ignore_status_updates: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            resync_period: Duration::from_secs(DEFAULT_RESYNC_SECONDS),
            namespace: None,
            ignore_status_updates: true,
        }
    }
}

impl ControllerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_ignore_status_updates(mut self, ignore: bool) -> Self {
        self.ignore_status_updates = ignore;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MILLIS),
            max: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECONDS),
        }
    }
}

impl BackoffConfig {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }
}

/// Settings for the outbound client. Every reconciliation uses a client built
/// from these unless a caller injects its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
    pub max_response_bytes: usize,
    pub fail_on_error_status: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: concat!("restcall-operator/", env!("CARGO_PKG_VERSION")).to_string(),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            fail_on_error_status: false,
        }
    }
}

impl HttpClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }

    pub fn with_fail_on_error_status(mut self, fail: bool) -> Self {
        self.fail_on_error_status = fail;
        self
    }
}

mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms_str) = s.strip_suffix("ms") {
            let ms: u64 = ms_str.parse().map_err(serde::de::Error::custom)?;
            return Ok(Duration::from_millis(ms));
        }

        if let Some(m_str) = s.strip_suffix('m') {
            let mins: u64 = m_str.parse().map_err(serde::de::Error::custom)?;
            let secs = mins
                .checked_mul(60)
                .ok_or_else(|| serde::de::Error::custom(format!("{}m is out of range", mins)))?;
            return Ok(Duration::from_secs(secs));
        }

        if let Some(s_str) = s.strip_suffix('s') {
            let secs: u64 = s_str.parse().map_err(serde::de::Error::custom)?;
            return Ok(Duration::from_secs(secs));
        }

        let ms: u64 = s.parse().map_err(serde::de::Error::custom)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.controller.workers, 4);
        assert_eq!(config.controller.resync_period, Duration::from_secs(300));
        assert!(config.controller.namespace.is_none());
        assert!(config.controller.ignore_status_updates);
        assert_eq!(config.backoff.initial, Duration::from_millis(5));
        assert_eq!(config.backoff.max, Duration::from_secs(1000));
        assert_eq!(config.http.timeout, Duration::from_secs(30));
        assert_eq!(config.http.max_redirects, 10);
        assert_eq!(config.http.max_response_bytes, 1024 * 1024);
        assert!(!config.http.fail_on_error_status);
        assert!(config.http.user_agent.starts_with("restcall-operator/"));
    }

    #[test]
    fn test_builders() {
        let config = OperatorConfig::default()
            .with_controller(
                ControllerConfig::default()
                    .with_workers(0)
                    .with_namespace("team-a")
                    .with_resync_period(Duration::from_secs(10))
                    .with_ignore_status_updates(false),
            )
            .with_backoff(BackoffConfig::new(
                Duration::from_millis(100),
                Duration::from_secs(5),
            ))
            .with_http(
                HttpClientConfig::default()
                    .with_timeout(Duration::from_secs(2))
                    .with_max_response_bytes(64)
                    .with_fail_on_error_status(true),
            );

        assert_eq!(config.controller.workers, 1);
        assert_eq!(config.controller.namespace.as_deref(), Some("team-a"));
        assert_eq!(config.controller.resync_period, Duration::from_secs(10));
        assert!(!config.controller.ignore_status_updates);
        assert_eq!(config.backoff.initial, Duration::from_millis(100));
        assert_eq!(config.http.timeout, Duration::from_secs(2));
        assert_eq!(config.http.max_response_bytes, 64);
        assert!(config.http.fail_on_error_status);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "controller": { "workers": 8, "resync_period": "2m" },
            "backoff": { "initial": "250ms" },
            "http": { "timeout": "5s" }
        }"#;
        let config: OperatorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.controller.workers, 8);
        assert_eq!(config.controller.resync_period, Duration::from_secs(120));
        assert_eq!(config.backoff.initial, Duration::from_millis(250));
        assert_eq!(config.backoff.max, Duration::from_secs(1000));
        assert_eq!(config.http.timeout, Duration::from_secs(5));
        assert_eq!(config.http.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_duration_serialization_roundtrip() {
        let config = OperatorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"300000ms\""));
        let parsed: OperatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.controller.resync_period, config.controller.resync_period);
        assert_eq!(parsed.http.timeout, config.http.timeout);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let json = r#"{ "backoff": { "initial": "soonms" } }"#;
        assert!(serde_json::from_str::<OperatorConfig>(json).is_err());
    }

    #[test]
    fn test_overflowing_minutes_rejected() {
        let json = format!(r#"{{ "controller": {{ "resync_period": "{}m" }} }}"#, u64::MAX);
        assert!(serde_json::from_str::<OperatorConfig>(&json).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("operator.json");
        std::fs::write(&path, r#"{ "controller": { "workers": 2 } }"#).unwrap();

        let config = OperatorConfig::from_file(&path).unwrap();
        assert_eq!(config.controller.workers, 2);

        assert!(OperatorConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
