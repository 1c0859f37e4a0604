//! Request/response DTOs for the HTTP surface (spec §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct FeedRef {
    pub category: u8,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedValuesRequest {
    pub feeds: Vec<FeedRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedRefOut {
    pub category: u8,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedValueDatum {
    pub feed: FeedRefOut,
    pub value: f64,
    pub timestamp: i64,
    pub confidence: f64,
    pub source: Vec<String>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedValuesResponse {
    pub data: Vec<FeedValueDatum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting_round_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeDatum {
    pub volume: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedVolumeDatum {
    pub feed: FeedRefOut,
    pub volumes: Vec<VolumeDatum>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumesResponse {
    pub data: Vec<FeedVolumeDatum>,
    pub window_sec: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: &'static str,
    pub message: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            error,
            message: message.into(),
            timestamp: oracle_core::now_ms(),
            request_id: None,
        }
    }
}
