//! Logging and OpenTelemetry export.
//!
//! Console logging through `tracing_subscriber::fmt` is always on and honors
//! `RUST_LOG` (default `info`). Cargo features add export on top:
//!
//! - `tracing`: spans, including the per-call `grpc.server` spans opened when
//!   `GRPC_TRACING` is set, are exported and W3C trace context is propagated.
//! - `metrics`: the global meter provider exports the RPC instruments and the
//!   orders counters.
//! - `stdout` / `honeycomb`: where exports go. Either needs `tracing` or
//!   `metrics`; both may be enabled together.
//!
//! ```bash
//! cargo run --features tracing,metrics,honeycomb -- --grpc-tracing --grpc-metrics
//! ```

#[cfg(all(
    any(feature = "honeycomb", feature = "stdout"),
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!("The 'honeycomb' and 'stdout' exporters require 'tracing' or 'metrics'.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::KeyValue;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

/// Name under which the process reports itself to telemetry backends.
pub const SERVICE_NAME: &str = "trellis";

/// Providers installed by [`init_telemetry`]. Flush them on exit.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every installed provider.
    ///
    /// The subscriber may already be gone, so failures go to stderr.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        if let Err(err) = self
            .tracer_provider
            .force_flush()
            .and_then(|()| self.tracer_provider.shutdown())
        {
            eprintln!("Error shutting down tracer provider: {err:#?}");
        }

        #[cfg(feature = "metrics")]
        if let Err(err) = self
            .meter_provider
            .force_flush()
            .and_then(|()| self.meter_provider.shutdown())
        {
            eprintln!("Error shutting down meter provider: {err:#?}");
        }
    }
}

/// Installs the global subscriber, propagator and providers.
///
/// Must run before the server is assembled: the server's instruments are
/// created on the global meter provider at assembly time.
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let (registry, tracer_provider) = {
        use opentelemetry::InstrumentationScope;
        use opentelemetry::trace::TracerProvider;

        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
        let provider = init_tracer()?;
        opentelemetry::global::set_tracer_provider(provider.clone());

        let scope = InstrumentationScope::builder(SERVICE_NAME)
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        let layer = tracing_opentelemetry::layer()
            .with_tracer(provider.tracer_with_scope(scope))
            .with_error_records_to_exceptions(true);
        (registry.with(layer), provider)
    };

    #[cfg(feature = "metrics")]
    let meter_provider = {
        let provider = init_metrics()?;
        opentelemetry::global::set_meter_provider(provider.clone());
        provider
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(std::time::Duration::from_secs(5))
            .build(),
    );

    #[cfg(feature = "honeycomb")]
    let builder = builder.with_periodic_exporter(honeycomb::metric_exporter()?);

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch_processor(
        opentelemetry_stdout::SpanExporter::default(),
    ));

    #[cfg(feature = "honeycomb")]
    let builder = builder.with_span_processor(batch_processor(honeycomb::span_exporter()?));

    Ok(builder.build())
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "honeycomb")))]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: sdktrace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

/// OTLP over gRPC to Honeycomb, configured from `HONEYCOMB_*` variables.
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
mod honeycomb {
    use anyhow::Context;
    use core::str::FromStr;
    use core::time::Duration;
    use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
    use tonic::metadata::MetadataMap;
    use tonic::transport::ClientTlsConfig;

    const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

    struct Target {
        endpoint: String,
        compression: Compression,
        metadata: MetadataMap,
    }

    fn var(name: &str) -> anyhow::Result<String> {
        std::env::var(name).with_context(|| format!("missing `{name}`"))
    }

    impl Target {
        fn from_env() -> anyhow::Result<Self> {
            let mut metadata = MetadataMap::new();
            metadata.insert(
                "x-honeycomb-team",
                var("HONEYCOMB_API_KEY")?.parse().context("invalid API key")?,
            );
            metadata.insert(
                "x-honeycomb-dataset",
                var("HONEYCOMB_DATASET")?.parse().context("invalid dataset")?,
            );
            let compression =
                Compression::from_str(&var("HONEYCOMB_COMPRESSION")?.to_ascii_lowercase())?;

            Ok(Self {
                endpoint: var("HONEYCOMB_ENDPOINT")?,
                compression,
                metadata,
            })
        }
    }

    #[cfg(feature = "metrics")]
    pub(super) fn metric_exporter() -> anyhow::Result<opentelemetry_otlp::MetricExporter> {
        let target = Target::from_env()?;
        opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(target.metadata)
            .with_timeout(EXPORT_TIMEOUT)
            .with_compression(target.compression)
            .with_endpoint(target.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(opentelemetry_sdk::metrics::Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")
    }

    #[cfg(feature = "tracing")]
    pub(super) fn span_exporter() -> anyhow::Result<opentelemetry_otlp::SpanExporter> {
        let target = Target::from_env()?;
        opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(target.metadata)
            .with_timeout(EXPORT_TIMEOUT)
            .with_compression(target.compression)
            .with_endpoint(target.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build span exporter")
    }
}
