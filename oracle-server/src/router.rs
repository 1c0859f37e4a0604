//! Route dispatch (spec §6 HTTP API surface table).

use std::collections::HashMap;
use std::sync::Arc;

use hyper::{Body, Method, Request, Response};

use crate::handlers;
use crate::state::AppState;

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            Some((parts.next()?.to_string(), parts.next().unwrap_or("").to_string()))
        })
        .collect()
}

pub async fn dispatch(req: Request<Body>, state: Arc<AppState>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = parse_query(req.uri().query());
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (Method::POST, ["feed-values"]) => handlers::feed_values(state, req.into_body(), None).await,
        (Method::POST, ["feed-values", round]) => match round.parse::<u64>() {
            Ok(id) => handlers::feed_values(state, req.into_body(), Some(id)).await,
            Err(_) => handlers::not_found(),
        },
        (Method::POST, ["volumes"]) => {
            let window_sec = query.get("window").and_then(|w| w.parse().ok()).unwrap_or(3600);
            handlers::volumes(state, req.into_body(), window_sec).await
        }
        (Method::GET, ["health"]) => handlers::health(state).await,
        (Method::GET, ["health", "ready"]) => handlers::health_ready(state).await,
        (Method::GET, ["health", "live"]) => handlers::health_live(state).await,
        (Method::GET, ["metrics"]) => handlers::metrics(state).await,
        (_, ["feed-values"] | ["volumes"] | ["health"] | ["health", "ready"] | ["health", "live"] | ["metrics"]) => {
            handlers::method_not_allowed()
        }
        _ => handlers::not_found(),
    }
}
