use std::time::Duration;

use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{self, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::util::env::Env;

pub type Result<T> = core::result::Result<T, Box<dyn std::error::Error>>;

/// Console logging, plus OTLP trace and log export when a collector endpoint is configured.
#[derive(Debug)]
pub struct Telemetry {
    pub service_name: String,
    pub collector_url: Option<String>,
    log_filter: String,

    logger_provider: Option<SdkLoggerProvider>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn new(env: &Env) -> Result<Telemetry> {
        let service_name = env.service_name.clone();
        let collector_url = env.otel_exporter_otlp_endpoint.clone();

        let (logger_provider, tracer_provider) = match &collector_url {
            Some(url) => {
                let base_resource = base_attrs(&service_name, env!("CARGO_PKG_VERSION"));
                (
                    Some(build_logger_provider(url, base_resource.clone())?),
                    Some(build_tracer_provider(url, base_resource)?),
                )
            }
            None => (None, None),
        };

        Ok(Self {
            service_name,
            collector_url,
            log_filter: env.log_filter.clone(),
            logger_provider,
            tracer_provider,
        })
    }

    pub fn register(self) -> Self {
        let trace_layer = self.tracer_provider.as_ref().map(|provider| {
            global::set_tracer_provider(provider.clone());
            tracing_opentelemetry::layer().with_tracer(global::tracer(self.service_name.clone()))
        });
        let log_layer = self
            .logger_provider
            .as_ref()
            .map(|provider| OpenTelemetryTracingBridge::new(provider));

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(log_layer)
            .with(EnvFilter::new(&self.log_filter))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        if let Some(url) = &self.collector_url {
            tracing::debug!(collector = %url, "exporting traces and logs over otlp");
        }

        self
    }

    pub fn shutdown(self) {
        if let Some(Err(e)) = self.logger_provider.map(|p| p.shutdown()) {
            eprintln!("error during logging shutdown: {e:?}");
        }

        if let Some(Err(e)) = self.tracer_provider.map(|p| p.shutdown()) {
            eprintln!("error during tracing shutdown: {e:?}");
        }
    }
}

pub fn build_logger_provider(
    collector_url: &str,
    base_resource: Resource,
) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

pub fn build_tracer_provider(
    collector_url: &str,
    base_resource: Resource,
) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(base_resource)
        .build())
}

fn base_attrs(name: &str, version: &'static str) -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", name.to_string()),
            KeyValue::new("service.version", version),
        ])
        .build()
}
