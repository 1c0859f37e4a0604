//! Request handlers for each route (spec §4.8 "Request Handler" / §6 HTTP surface).
//! Every handler reads from the cache and falls through to a stale-but-present
//! value rather than a 404 where the spec's Open Question recommends it
//! (spec §9: "return with a `stale` flag and let the caller decide").

use std::sync::Arc;

use hyper::{Body, Response, StatusCode};

use oracle_core::now_ms;

use crate::dto::{
    ErrorResponse, FeedRefOut, FeedValueDatum, FeedValuesRequest, FeedValuesResponse,
    FeedVolumeDatum, VolumeDatum, VolumesResponse,
};
use crate::health::{build_report, is_alive, is_ready};
use crate::state::AppState;
use crate::validation::{validate_feeds, ValidationError};

fn json_response(status: StatusCode, body: &impl serde::Serialize) -> Response<Body> {
    let payload = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(payload))
        .unwrap_or_else(|_| Response::new(Body::from("{}")))
}

fn validation_error_response(err: ValidationError) -> Response<Body> {
    json_response(
        StatusCode::BAD_REQUEST,
        &ErrorResponse::new("ValidationError", err.message()),
    )
}

async fn parse_body<T: serde::de::DeserializeOwned>(req: Body) -> Result<T, Response<Body>> {
    let bytes = hyper::body::to_bytes(req).await.map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &ErrorResponse::new("MalformedRequest", format!("failed to read body: {e}")),
        )
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &ErrorResponse::new("MalformedRequest", format!("invalid JSON body: {e}")),
        )
    })
}

/// `POST /feed-values` and `POST /feed-values/:votingRoundId` (spec §6).
pub async fn feed_values(
    state: Arc<AppState>,
    body: Body,
    voting_round_id: Option<u64>,
) -> Response<Body> {
    let request: FeedValuesRequest = match parse_body(body).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let validated = match validate_feeds(&request.feeds) {
        Ok(v) => v,
        Err(e) => return validation_error_response(e),
    };

    let now = now_ms();
    let mut data = Vec::with_capacity(validated.len());
    let mut any_missing = false;

    for (feed_id, category_code) in &validated {
        match state.cache.get(feed_id, now) {
            Some(aggregated) => {
                let stale = aggregated.stale || now - aggregated.timestamp > state.config.cache_ttl_ms;
                data.push(FeedValueDatum {
                    feed: FeedRefOut {
                        category: *category_code,
                        name: feed_id.name.clone(),
                    },
                    value: aggregated.price,
                    timestamp: aggregated.timestamp,
                    confidence: aggregated.confidence,
                    source: aggregated.sources,
                    stale,
                });
            }
            None => {
                any_missing = true;
                // No cached value yet -- make sure the feed is actually subscribed
                // somewhere (spec §4.4 `subscribeToFeed`). Subscribing is idempotent
                // (adapters dedupe against their own subscription set), so repeating
                // this on every miss just costs a HashSet lookup once data starts
                // flowing. Fired in the background so a cold feed doesn't make the
                // caller wait on a venue round-trip before receiving its 404/partial.
                let data_manager = state.data_manager.clone();
                let category = feed_id.category;
                let name = feed_id.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = data_manager.subscribe_to_feed(category, &name).await {
                        tracing::debug!(feed = %name, error = %e, "subscribe_to_feed failed");
                    }
                });
            }
        }
    }

    if data.is_empty() && any_missing {
        return json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse::new("NoDataAvailable", "no cached value for any requested feed"),
        );
    }

    json_response(
        StatusCode::OK,
        &FeedValuesResponse {
            data,
            voting_round_id,
        },
    )
}

/// `POST /volumes?window=<seconds>` (spec §6). There is no persisted volume time
/// series (spec §1 Non-goals: "only a small bounded per-feed observation window"),
/// so this reports the latest per-source volume still inside that window.
pub async fn volumes(state: Arc<AppState>, body: Body, window_sec: u64) -> Response<Body> {
    let request: FeedValuesRequest = match parse_body(body).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    let validated = match validate_feeds(&request.feeds) {
        Ok(v) => v,
        Err(e) => return validation_error_response(e),
    };

    let mut data = Vec::with_capacity(validated.len());
    for (feed_id, category_code) in validated {
        let latest = state.aggregation.latest_volumes(&feed_id.name).await;
        let volumes: Vec<VolumeDatum> = latest
            .into_iter()
            .map(|(_, volume, timestamp)| VolumeDatum { volume, timestamp })
            .collect();
        data.push(FeedVolumeDatum {
            feed: FeedRefOut {
                category: category_code,
                name: feed_id.name,
            },
            volumes,
        });
    }

    json_response(
        StatusCode::OK,
        &VolumesResponse {
            data,
            window_sec,
        },
    )
}

pub async fn health(state: Arc<AppState>) -> Response<Body> {
    let report = build_report(&state).await;
    let status = if report.status == crate::health::ProcessStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    json_response(status, &report)
}

pub async fn health_ready(state: Arc<AppState>) -> Response<Body> {
    let report = build_report(&state).await;
    let ready = is_ready(&report, state.is_shutting_down());
    let body = serde_json::json!({
        "ready": ready,
        "status": report.status,
        "timestamp": report.timestamp,
        "uptime": report.uptime,
    });
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    json_response(status, &body)
}

pub async fn health_live(state: Arc<AppState>) -> Response<Body> {
    let alive = is_alive(state.is_shutting_down());
    let body = serde_json::json!({
        "alive": alive,
        "status": if alive { "healthy" } else { "unhealthy" },
        "timestamp": now_ms(),
        "uptime": state.uptime_seconds(),
    });
    let status = if alive { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    json_response(status, &body)
}

/// Prometheus text-exposition body when the `metrics` feature is enabled
/// (SPEC_FULL.md §F); a plain JSON snapshot otherwise, matching the spec's
/// unopinionated "metrics snapshot" response shape (spec §6).
#[cfg(feature = "metrics")]
pub async fn metrics(state: Arc<AppState>) -> Response<Body> {
    let body = state.metrics.render().await;
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(not(feature = "metrics"))]
pub async fn metrics(state: Arc<AppState>) -> Response<Body> {
    let cache_stats = state.cache.stats();
    let registry_stats = state.registry.get_stats().await;
    let connection_health = state.data_manager.connection_health().await;

    let body = serde_json::json!({
        "uptime_seconds": state.uptime_seconds(),
        "cache": {
            "hits": cache_stats.hits,
            "misses": cache_stats.misses,
            "hit_rate": cache_stats.hit_rate(),
            "entries": state.cache.len(),
        },
        "registry": {
            "total": registry_stats.total,
            "active": registry_stats.active,
            "by_category": registry_stats.by_category,
            "by_health": registry_stats.by_health,
        },
        "sources": connection_health.iter().map(|h| {
            let rest = state.rate_limiter.stats(&h.name);
            serde_json::json!({
                "name": h.name,
                "healthy": h.healthy,
                "age_ms": h.age_ms,
                "consecutive_failures": h.consecutive_failures,
                "rest_fallback": rest.map(|r| serde_json::json!({
                    "total": r.total,
                    "successful": r.successful,
                    "rate_limited": r.rate_limited,
                    "success_rate": r.success_rate(),
                })),
            })
        }).collect::<Vec<_>>(),
    });
    json_response(StatusCode::OK, &body)
}

pub fn not_found() -> Response<Body> {
    json_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse::new("NotFound", "no such route"),
    )
}

pub fn method_not_allowed() -> Response<Body> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorResponse::new("MethodNotAllowed", "method not allowed for this route"),
    )
}
