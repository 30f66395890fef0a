use opentelemetry::trace::TraceId;

/// Fetch the current `opentelemetry::trace::TraceId` through the whole stack, for correlating
/// a single reconcile's logs with whatever trace the OTLP exporter shipped.
pub fn get_trace_id() -> TraceId {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}

#[cfg(feature = "telemetry")]
pub async fn init_tracer() -> opentelemetry::sdk::trace::Tracer {
    use opentelemetry::sdk::{trace, Resource};
    use opentelemetry::KeyValue;

    let otlp_endpoint =
        std::env::var("OPENTELEMETRY_ENDPOINT_URL").expect("OPENTELEMETRY_ENDPOINT_URL must be set");

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(otlp_endpoint),
        )
        .with_trace_config(trace::config().with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            "observability-operator",
        )])))
        .install_batch(opentelemetry::runtime::Tokio)
        .expect("failed to install otlp tracer")
}

/// Initialize tracing: an env-filtered fmt layer, plus an optional OTLP layer behind the
/// `telemetry` feature.
pub fn init() {
    use tracing_subscriber::{prelude::*, EnvFilter, Registry};

    let logger = tracing_subscriber::fmt::layer().json();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    let collector = Registry::default().with(env_filter).with(logger);
    tracing::subscriber::set_global_default(collector).expect("failed to set global subscriber");
}
