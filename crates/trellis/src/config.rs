//! Runtime configuration for composed servers.
//!
//! All structs deserialize with `serde` and fall back to the documented
//! defaults for any absent key, so they can be loaded from whatever
//! hierarchical source the binary prefers (environment, CLI, files).
//!
//! ## Keys
//!
//! | Key | Default |
//! |---|---|
//! | `address` | [`DEFAULT_ADDRESS`] |
//! | `in_process` | `false` |
//! | `buffer_size` | [`DEFAULT_BUFFER_SIZE`] |
//! | `reflection` | `false` |
//! | `health_service` | `true` |
//! | `debug` | `false` |
//! | `timeout_ms` | none |
//! | `concurrency_limit` | none |
//! | `tracing.enabled` / `tracing.excluded_methods` | `false` / health methods |
//! | `logging.metadata_keys` / `logging.excluded_methods` | empty / empty |
//! | `metrics.enabled` / `namespace` / `subsystem` / `buckets` | `false` / empty / empty / [`DEFAULT_BUCKETS`] |

use crate::{Error, Result};
use core::time::Duration;
use serde::Deserialize;

/// Default bind address. A leading `:` binds every interface.
pub const DEFAULT_ADDRESS: &str = ":50051";

/// Default capacity, in bytes, of each in-process pipe.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Default histogram buckets, in seconds.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Methods excluded from tracing unless configured otherwise.
pub const DEFAULT_TRACING_EXCLUSIONS: [&str; 2] = [
    "/grpc.health.v1.Health/Check",
    "/grpc.health.v1.Health/Watch",
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network bind address (`host:port` or `:port`).
    pub address: String,
    /// Serve over an in-memory pipe instead of a socket.
    pub in_process: bool,
    /// Capacity of each in-process pipe.
    pub buffer_size: usize,
    /// Expose the gRPC reflection service.
    pub reflection: bool,
    /// Expose the built-in `grpc.health.v1.Health` service.
    pub health_service: bool,
    /// Include panic payloads in error responses.
    pub debug: bool,
    /// Per-request timeout applied by the transport, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Maximum concurrent requests per connection.
    pub concurrency_limit: Option<usize>,
    pub tracing: TracingConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            in_process: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reflection: false,
            health_service: true,
            debug: false,
            timeout_ms: None,
            concurrency_limit: None,
            tracing: TracingConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// A configuration for the in-process transport, otherwise default.
    pub fn in_process() -> Self {
        Self {
            in_process: true,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Checks invariants the serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when:
    /// - `buffer_size` is zero in in-process mode
    /// - `address` is empty in network mode
    /// - `concurrency_limit` is zero
    /// - any bucket is not finite, or buckets are not strictly increasing
    pub fn validate(&self) -> Result<()> {
        if self.in_process && self.buffer_size == 0 {
            return Err(invalid("buffer_size must be greater than 0"));
        }
        if !self.in_process && self.address.trim().is_empty() {
            return Err(invalid("address must not be empty"));
        }
        if self.concurrency_limit == Some(0) {
            return Err(invalid("concurrency_limit must be greater than 0"));
        }
        self.metrics.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// Full method paths (`/pkg.Service/Method`) that get no span.
    pub excluded_methods: Vec<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            excluded_methods: DEFAULT_TRACING_EXCLUSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Request metadata keys copied into the logging context.
    pub metadata_keys: Vec<String>,
    /// Full method paths whose start/success lines are suppressed. Failures
    /// are always logged.
    pub excluded_methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub namespace: String,
    pub subsystem: String,
    /// Histogram bucket boundaries in seconds. Empty means
    /// [`DEFAULT_BUCKETS`].
    pub buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: String::new(),
            subsystem: String::new(),
            buckets: DEFAULT_BUCKETS.to_vec(),
        }
    }
}

impl MetricsConfig {
    /// The configured buckets, or the defaults when none are set.
    pub fn buckets(&self) -> Vec<f64> {
        if self.buckets.is_empty() {
            DEFAULT_BUCKETS.to_vec()
        } else {
            self.buckets.clone()
        }
    }

    /// `namespace_subsystem_name`, skipping empty parts.
    pub fn metric_name(&self, name: &str) -> String {
        [self.namespace.as_str(), self.subsystem.as_str(), name]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("_")
    }

    fn validate(&self) -> Result<()> {
        if self.buckets.iter().any(|b| !b.is_finite()) {
            return Err(invalid("metrics buckets must be finite"));
        }
        if self.buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(invalid("metrics buckets must be strictly increasing"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidConfig {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_keys_fall_back_to_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.address, ":50051");
        assert_eq!(config.buffer_size, 1024 * 1024);
        assert!(config.health_service);
        assert!(!config.tracing.enabled);
        assert_eq!(config.metrics.buckets(), DEFAULT_BUCKETS.to_vec());
    }

    #[test]
    fn nested_keys_override_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "address": "127.0.0.1:6000",
                "tracing": { "enabled": true },
                "logging": { "metadata_keys": ["x-tenant"] },
                "metrics": { "enabled": true, "namespace": "shop", "buckets": [0.1, 1.0] }
            }"#,
        )
        .unwrap();

        assert_eq!(config.address, "127.0.0.1:6000");
        assert!(config.tracing.enabled);
        // Exclusions keep their default when only `enabled` is set.
        assert_eq!(config.tracing.excluded_methods.len(), 2);
        assert_eq!(config.logging.metadata_keys, vec!["x-tenant".to_string()]);
        assert_eq!(config.metrics.buckets(), vec![0.1, 1.0]);
        config.validate().unwrap();
    }

    #[test]
    fn empty_bucket_list_uses_defaults() {
        let metrics = MetricsConfig {
            buckets: vec![],
            ..MetricsConfig::default()
        };
        assert_eq!(metrics.buckets(), DEFAULT_BUCKETS.to_vec());
    }

    #[test]
    fn metric_names_skip_empty_prefixes() {
        let mut metrics = MetricsConfig::default();
        assert_eq!(metrics.metric_name("grpc_server_handled_total"), "grpc_server_handled_total");
        metrics.namespace = "shop".into();
        assert_eq!(metrics.metric_name("x"), "shop_x");
        metrics.subsystem = "api".into();
        assert_eq!(metrics.metric_name("x"), "shop_api_x");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = ServerConfig::in_process();
        config.buffer_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));

        let mut config = ServerConfig::default();
        config.address = " ".into();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.metrics.buckets = vec![1.0, 0.5];
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.metrics.buckets = vec![f64::NAN];
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.concurrency_limit = Some(0);
        assert!(config.validate().is_err());
    }
}
