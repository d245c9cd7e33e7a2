//! OpenTelemetry trace export
//!
//! Spans from `tracing` are exported over OTLP/gRPC when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set. The layer is built against the
//! caller's subscriber so it can be stacked on top of the fmt layer.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, runtime, trace, Resource};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

pub const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

const SERVICE_NAME: &str = "kubenova-operator";

/// Endpoint to export to, if export is configured
pub fn otlp_endpoint() -> Option<String> {
    std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .filter(|endpoint| !endpoint.trim().is_empty())
}

/// Build the OpenTelemetry layer for `_subscriber`
///
/// Returns `None` when export is not configured or the pipeline cannot be
/// installed; tracing then falls back to local logging only.
pub fn init_telemetry<S>(_subscriber: &S) -> Option<OpenTelemetryLayer<S, trace::Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let endpoint = otlp_endpoint()?;
    global::set_text_map_propagator(TraceContextPropagator::new());

    let installed = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint.clone()),
        )
        .with_trace_config(trace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio);

    match installed {
        Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
        Err(e) => {
            // The subscriber is not installed yet, so this cannot go through tracing
            eprintln!("Failed to install OTLP exporter for {}: {}", endpoint, e);
            None
        }
    }
}

/// Flush buffered spans; call once before the process exits
pub fn shutdown_telemetry() {
    if otlp_endpoint().is_some() {
        global::shutdown_tracer_provider();
    }
}
