use anyhow::bail;
use clap::Parser;
use trellis::ServerConfig;
use trellis::config::{
    DEFAULT_BUCKETS, DEFAULT_BUFFER_SIZE, DEFAULT_TRACING_EXCLUSIONS, LoggingConfig,
    MetricsConfig, TracingConfig,
};

/// Runtime configuration for the `trellis-server` binary.
///
/// Every value is parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first). Defaults match the library defaults so an empty
/// environment serves the order service on every interface, port 50051.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "trellis-server",
    version,
    about = "A composed gRPC order server"
)]
pub struct CliArgs {
    /// Address to listen on. A leading `:` binds every interface.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from(":50051"))]
    pub server_addr: String,

    /// Expose the gRPC reflection service.
    ///
    /// Environment variable: `REFLECTION`
    #[arg(long, env = "REFLECTION", default_value_t = false)]
    pub reflection: bool,

    /// Do not expose the built-in `grpc.health.v1.Health` service.
    ///
    /// Environment variable: `DISABLE_HEALTH_SERVICE`
    #[arg(long, env = "DISABLE_HEALTH_SERVICE", default_value_t = false)]
    pub disable_health_service: bool,

    /// Return panic payloads to callers instead of a generic message.
    ///
    /// Environment variable: `DEBUG_ERRORS`
    #[arg(long, env = "DEBUG_ERRORS", default_value_t = false)]
    pub debug: bool,

    /// Per-request timeout in milliseconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Maximum concurrent requests per connection.
    ///
    /// Environment variable: `CONCURRENCY_LIMIT`
    #[arg(long, env = "CONCURRENCY_LIMIT")]
    pub concurrency_limit: Option<usize>,

    /// Open a server span for every call.
    ///
    /// Environment variable: `GRPC_TRACING`
    #[arg(long, env = "GRPC_TRACING", default_value_t = false)]
    pub grpc_tracing: bool,

    /// Comma separated method paths that get no span. Defaults to the health
    /// methods.
    ///
    /// Environment variable: `TRACING_EXCLUDED_METHODS`
    #[arg(long, env = "TRACING_EXCLUDED_METHODS", value_delimiter = ',')]
    pub tracing_excluded_methods: Vec<String>,

    /// Comma separated request metadata keys copied into call logs.
    ///
    /// Environment variable: `LOG_METADATA_KEYS`
    #[arg(long, env = "LOG_METADATA_KEYS", value_delimiter = ',')]
    pub log_metadata_keys: Vec<String>,

    /// Comma separated method paths whose start and success lines are not
    /// logged.
    ///
    /// Environment variable: `LOG_EXCLUDED_METHODS`
    #[arg(long, env = "LOG_EXCLUDED_METHODS", value_delimiter = ',')]
    pub log_excluded_methods: Vec<String>,

    /// Record per-call counters and latency histograms.
    ///
    /// Environment variable: `GRPC_METRICS`
    #[arg(long, env = "GRPC_METRICS", default_value_t = false)]
    pub grpc_metrics: bool,

    /// Prefix for every server metric name.
    ///
    /// Environment variable: `METRICS_NAMESPACE`
    #[arg(long, env = "METRICS_NAMESPACE", default_value_t = String::new())]
    pub metrics_namespace: String,

    /// Second prefix, after the namespace.
    ///
    /// Environment variable: `METRICS_SUBSYSTEM`
    #[arg(long, env = "METRICS_SUBSYSTEM", default_value_t = String::new())]
    pub metrics_subsystem: String,

    /// Comma separated latency histogram buckets, in seconds.
    ///
    /// Environment variable: `METRICS_BUCKETS`
    #[arg(long, env = "METRICS_BUCKETS", value_delimiter = ',')]
    pub metrics_buckets: Vec<f64>,

    /// Largest quantity a single order may carry.
    ///
    /// Environment variable: `MAX_ORDER_QUANTITY`
    #[arg(long, env = "MAX_ORDER_QUANTITY", default_value_t = 10_000)]
    pub max_order_quantity: u32,

    /// Capacity of the order store. Readiness fails once it is full.
    ///
    /// Environment variable: `ORDER_CAPACITY`
    #[arg(long, env = "ORDER_CAPACITY", default_value_t = 100_000)]
    pub order_capacity: usize,
}

/// Settings of the orders feature module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrdersConfig {
    pub max_quantity: u32,
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub orders: OrdersConfig,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_order_quantity == 0 {
            bail!("MAX_ORDER_QUANTITY must be greater than 0");
        }
        if args.order_capacity == 0 {
            bail!("ORDER_CAPACITY must be greater than 0");
        }

        let tracing_excluded_methods = if args.tracing_excluded_methods.is_empty() {
            DEFAULT_TRACING_EXCLUSIONS
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            args.tracing_excluded_methods
        };
        let buckets = if args.metrics_buckets.is_empty() {
            DEFAULT_BUCKETS.to_vec()
        } else {
            args.metrics_buckets
        };

        let server = ServerConfig {
            address: args.server_addr,
            in_process: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reflection: args.reflection,
            health_service: !args.disable_health_service,
            debug: args.debug,
            timeout_ms: args.request_timeout_ms,
            concurrency_limit: args.concurrency_limit,
            tracing: TracingConfig {
                enabled: args.grpc_tracing,
                excluded_methods: tracing_excluded_methods,
            },
            logging: LoggingConfig {
                metadata_keys: args.log_metadata_keys,
                excluded_methods: args.log_excluded_methods,
            },
            metrics: MetricsConfig {
                enabled: args.grpc_metrics,
                namespace: args.metrics_namespace,
                subsystem: args.metrics_subsystem,
                buckets,
            },
        };
        server.validate()?;

        Ok(Self {
            server,
            orders: OrdersConfig {
                max_quantity: args.max_order_quantity,
                capacity: args.order_capacity,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<AppConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("trellis-server").chain(args.iter().copied()))?;
        AppConfig::try_from(args)
    }

    #[test]
    fn empty_args_use_library_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.orders.max_quantity, 10_000);
    }

    #[test]
    fn lists_are_comma_separated() {
        let config = parse(&[
            "--log-metadata-keys",
            "x-tenant,x-region",
            "--metrics-buckets",
            "0.1,1,10",
            "--grpc-metrics",
        ])
        .unwrap();
        assert_eq!(config.server.logging.metadata_keys, vec!["x-tenant", "x-region"]);
        assert_eq!(config.server.metrics.buckets, vec![0.1, 1.0, 10.0]);
        assert!(config.server.metrics.enabled);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse(&["--max-order-quantity", "0"]).is_err());
        assert!(parse(&["--metrics-buckets", "1,0.5"]).is_err());
        assert!(parse(&["--concurrency-limit", "0"]).is_err());
    }
}
