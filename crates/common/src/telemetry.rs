//! Tracing initialization for Cohort.
//!
//! `init_tracing` is the single entry point a host binary calls after loading
//! its configuration: it installs an env-filtered fmt subscriber plus, when
//! the `telemetry` feature is compiled in and [`TelemetryConfig::enabled`] is
//! set, an OTLP/gRPC export layer. Without the feature, or with telemetry
//! disabled, the export slot holds an identity layer so the subscriber shape
//! is the same either way.

use crate::config::TelemetryConfig;
use anyhow::Result;

#[cfg(feature = "telemetry")]
use {
    opentelemetry::trace::TracerProvider, opentelemetry::KeyValue,
    opentelemetry_otlp::WithExportConfig,
    opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider, opentelemetry_sdk::Resource,
    tracing_opentelemetry::OpenTelemetryLayer,
};

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Build the export layer for the configured collector.
///
/// Disabled telemetry yields an identity layer; so does a build without the
/// `telemetry` feature, regardless of configuration.
pub fn telemetry_layer<S>(config: &TelemetryConfig) -> Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span> + Send + Sync,
{
    if !config.enabled {
        return Ok(Box::new(tracing_subscriber::layer::Identity::new()));
    }

    #[cfg(feature = "telemetry")]
    {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .build()?;

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(Resource::new(vec![KeyValue::new(
                "service.name",
                config.service_name.clone(),
            )]))
            .build();

        let tracer = provider.tracer(config.service_name.clone());
        opentelemetry::global::set_tracer_provider(provider);

        Ok(Box::new(OpenTelemetryLayer::new(tracer)))
    }
    #[cfg(not(feature = "telemetry"))]
    Ok(Box::new(tracing_subscriber::layer::Identity::new()))
}

/// Install the process-wide subscriber: env filter (`RUST_LOG`, default
/// `info`), fmt output, and the export layer above. Call once at startup.
pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer(config)?)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))?;

    Ok(())
}

pub fn shutdown_telemetry() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::Registry;

    #[test]
    fn test_disabled_config_yields_a_layer() {
        let config = TelemetryConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(telemetry_layer::<Registry>(&config).is_ok());
    }

    #[test]
    fn test_init_tracing_is_single_shot() {
        let config = TelemetryConfig::default();
        // Another test in the process may have installed a subscriber
        // already; when ours wins, a second install must be refused.
        if init_tracing(&config).is_ok() {
            assert!(init_tracing(&config).is_err());
        }
    }
}
