//! Tracing Setup
//!
//! Console logging with optional OpenTelemetry export:
//! - OTLP export to any OTLP-compatible collector
//! - Configurable via environment variables
//!
//! Environment variables:
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - OTLP endpoint (e.g., `http://tempo:4317`)
//! - `OTEL_SERVICE_NAME` - Service name (default: the binary name)
//! - `LOG_FORMAT` - Set to `json` for JSON output (default: `text`)
//! - `RUST_LOG` - Filter directives, overriding the default level

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Global tracer provider for shutdown
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// OTLP endpoint for trace export (None = disabled)
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
    /// Log format: "text" or "json"
    pub log_format: String,
    /// Level used when `RUST_LOG` is not set
    pub default_level: LevelFilter,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_service("steward")
    }
}

impl TracingConfig {
    /// Read the environment, falling back to `service` as the service name.
    pub fn for_service(service: &str) -> Self {
        Self {
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| service.to_string()),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            default_level: LevelFilter::INFO,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.default_level = LevelFilter::DEBUG;
        }
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(self.default_level.into())
            .from_env_lossy()
    }
}

/// Initialize the tracing subscriber with optional OpenTelemetry export.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let is_json = config.log_format.eq_ignore_ascii_case("json");

    if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;

        let resource = Resource::builder()
            .with_service_name(config.service_name.clone())
            .build();

        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build();

        let tracer = provider.tracer(config.service_name.clone());
        let _ = TRACER_PROVIDER.set(provider);
        let otel_layer = OpenTelemetryLayer::new(tracer);

        if is_json {
            tracing_subscriber::registry()
                .with(config.env_filter())
                .with(otel_layer)
                .with(fmt::layer().json())
                .try_init()?;
        } else {
            tracing_subscriber::registry()
                .with(config.env_filter())
                .with(otel_layer)
                .with(fmt::layer())
                .try_init()?;
        }

        tracing::info!(
            endpoint = %endpoint,
            service_name = %config.service_name,
            "OpenTelemetry tracing initialized"
        );
    } else {
        if is_json {
            tracing_subscriber::registry()
                .with(config.env_filter())
                .with(fmt::layer().json())
                .try_init()?;
        } else {
            tracing_subscriber::registry()
                .with(config.env_filter())
                .with(fmt::layer())
                .try_init()?;
        }

        tracing::debug!("Tracing initialized (no OTLP export)");
    }

    Ok(())
}

/// Flush pending spans. Call once on the way out.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Error shutting down tracer provider");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_lowers_default_level() {
        let config = TracingConfig::for_service("steward-automaton");
        assert_eq!(config.default_level, LevelFilter::INFO);
        assert_eq!(config.verbose(true).default_level, LevelFilter::DEBUG);
    }
}
