use std::sync::Arc;

use axum::{
    extract::State as AxumState,
    routing::get,
    Json, Router,
};
use clap::Parser;
use kube::Client;
use prometheus::{Encoder, TextEncoder};
use tracing::info;

use observability_operator::{config::Config, reconcilers, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::parse());
    telemetry::init();

    let client = Client::try_default().await.expect("failed to create kube Client");
    let state = reconcilers::State::default();

    let controllers = futures::future::join4(
        reconcilers::cluster_monitoring::run(client.clone(), state.clone(), config.clone()),
        reconcilers::grafana_organization::run(client.clone(), state.clone(), config.clone()),
        reconcilers::alertmanager::run(client.clone(), state.clone(), config.clone()),
        reconcilers::dashboard::run(client.clone(), state.clone(), config.clone()),
    );

    let metrics_server = run_metrics_server(state.clone(), &config.operator.metrics_bind_address);

    if Config::webhooks_enabled() {
        let webhook_server = run_webhook_server(client.clone(), &config.operator.webhook_cert_path);
        info!("starting reconcilers, metrics server and webhook server");
        tokio::join!(controllers, metrics_server, webhook_server).2?;
    } else {
        info!("starting reconcilers and metrics server (ENABLE_WEBHOOKS=false)");
        tokio::join!(controllers, metrics_server).1?;
    }
    Ok(())
}

async fn metrics(AxumState(state): AxumState<reconcilers::State>) -> Vec<u8> {
    let families = state.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer).expect("prometheus encoding is infallible");
    buffer
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}

async fn diagnostics(AxumState(state): AxumState<reconcilers::State>) -> Json<reconcilers::Diagnostics> {
    Json(state.diagnostics().await)
}

/// Plain-HTTP server for `/metrics`, `/healthz`, `/readyz` and diagnostics (spec.md §14).
async fn run_metrics_server(state: reconcilers::State, bind_address: &str) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/", get(diagnostics))
        .with_state(state);

    let addr = normalize_bind_address(bind_address);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("metrics server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// TLS-served admission-webhook listener, on the kubebuilder/controller-runtime convention port
/// (spec.md §12, §14). Certs are read from `--webhook-cert-path`, expected to hold a `tls.crt` /
/// `tls.key` pair as projected by cert-manager or the chart's Secret mount.
async fn run_webhook_server(client: Client, cert_path: &str) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let cert_path = std::path::Path::new(cert_path);
    let tls_config =
        RustlsConfig::from_pem_file(cert_path.join("tls.crt"), cert_path.join("tls.key")).await?;

    let app = observability_operator::webhook::router(client);
    let addr: std::net::SocketAddr = "0.0.0.0:9443".parse().expect("static address is valid");
    info!("webhook server listening on {addr}");
    axum_server::bind_rustls(addr, tls_config)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

/// `--metrics-bind-address`/`--health-probe-bind-address` follow the controller-runtime
/// convention of a bare `:PORT` meaning "all interfaces"; `axum`/`tokio` need an explicit host.
fn normalize_bind_address(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_port_to_all_interfaces() {
        assert_eq!(normalize_bind_address(":8080"), "0.0.0.0:8080");
    }

    #[test]
    fn leaves_explicit_host_unchanged() {
        assert_eq!(normalize_bind_address("127.0.0.1:8080"), "127.0.0.1:8080");
    }
}
