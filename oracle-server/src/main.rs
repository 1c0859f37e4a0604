//! Oracle HTTP API binary: loads configuration, assembles the data plane, and
//! serves the HTTP surface from spec §6 on a raw `hyper` server -- following the
//! teacher's `torq-health-check` idiom rather than reaching for a web framework.

mod dto;
mod handlers;
mod health;
mod router;
mod state;
mod validation;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use oracle_core::OracleConfig;

use crate::state::AppState;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = OracleConfig::from_env();
    config.validate().map_err(anyhow::Error::msg).context("invalid configuration")?;

    tracing::info!(?config.max_data_age_ms, ?config.min_sources, "starting oracle-server");

    let (pipeline, mut manager_events) = oracle_core::build(config.clone()).await;

    tokio::spawn(async move {
        while let Some(event) = manager_events.recv().await {
            tracing::info!(?event, "data manager event");
        }
    });

    let health_monitor = pipeline.data_manager.clone();
    tokio::spawn(async move {
        health_monitor.run_health_monitor().await;
    });

    let shutting_down = Arc::new(AtomicBool::new(false));
    let state = Arc::new(AppState {
        config: config.clone(),
        registry: pipeline.registry,
        aggregation: pipeline.aggregation,
        data_manager: pipeline.data_manager,
        cache: pipeline.cache,
        rate_limiter: pipeline.rate_limiter,
        started_at: Instant::now(),
        shutting_down: shutting_down.clone(),
        #[cfg(feature = "metrics")]
        metrics: pipeline.metrics,
    });

    let port: u16 = std::env::var("ORACLE_HTTP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let shutdown_data_manager = state.data_manager.clone();
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(router::dispatch(req, state).await) }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    let graceful = server.with_graceful_shutdown(shutdown_signal(
        shutting_down.clone(),
        config,
        shutdown_data_manager,
    ));

    tracing::info!(%addr, "oracle-server listening");
    tracing::info!("endpoints: POST /feed-values, POST /feed-values/:votingRoundId, POST /volumes, GET /health, GET /health/ready, GET /health/live, GET /metrics");

    if let Err(e) = graceful.await {
        tracing::error!(error = %e, "server error");
    }

    Ok(())
}

/// Waits for ctrl-c, flips the shutdown flag (suppressing reconnect noise and
/// flipping readiness), then disconnects every adapter and gives that drain up
/// to `shutdown_deadline` before returning and letting hyper finish its own
/// graceful drain (spec §5).
async fn shutdown_signal(
    shutting_down: Arc<AtomicBool>,
    config: OracleConfig,
    data_manager: Arc<oracle_core::DataManager>,
) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining");
    shutting_down.store(true, Ordering::SeqCst);
    let deadline = std::cmp::min(config.shutdown_deadline, std::time::Duration::from_secs(30));
    if tokio::time::timeout(deadline, data_manager.shutdown()).await.is_err() {
        tracing::warn!("adapter shutdown did not finish within the deadline");
    }
}
