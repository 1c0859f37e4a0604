//! Process health surface (spec §6 `/health`, `/health/ready`, `/health/live`),
//! modeled on the teacher's `ServiceHealth`/`HealthCheckServer` (`torq-health-check`):
//! a small status enum, a component map, and three endpoints with distinct
//! semantics (liveness vs. readiness vs. detailed status).

use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub healthy: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ProcessStatus,
    pub timestamp: i64,
    pub uptime: u64,
    pub components: Vec<ComponentStatus>,
}

/// Builds a point-in-time health report from the registry's adapter stats and the
/// data manager's per-source freshness (spec §4.4 `getConnectionHealth`).
pub async fn build_report(state: &AppState) -> HealthReport {
    let stats = state.registry.get_stats().await;
    let connection_health = state.data_manager.connection_health().await;

    let mut components: Vec<ComponentStatus> = connection_health
        .iter()
        .map(|h| ComponentStatus {
            name: h.name.clone(),
            healthy: h.healthy,
            detail: format!("age={}ms failures={}", h.age_ms, h.consecutive_failures),
        })
        .collect();
    components.push(ComponentStatus {
        name: "registry".to_string(),
        healthy: stats.active > 0,
        detail: format!("{} active of {} registered", stats.active, stats.total),
    });

    let healthy_sources = connection_health.iter().filter(|h| h.healthy).count();
    let status = if stats.active == 0 {
        ProcessStatus::Unhealthy
    } else if healthy_sources == 0 {
        ProcessStatus::Degraded
    } else if healthy_sources < connection_health.len() {
        ProcessStatus::Degraded
    } else {
        ProcessStatus::Healthy
    };

    HealthReport {
        status,
        timestamp: oracle_core::now_ms(),
        uptime: state.uptime_seconds(),
        components,
    }
}

/// Readiness: the process accepts traffic once at least one source has ever
/// reported healthy and the process is not mid-shutdown.
pub fn is_ready(report: &HealthReport, shutting_down: bool) -> bool {
    !shutting_down && report.status != ProcessStatus::Unhealthy
}

/// Liveness: the process is alive as long as it hasn't begun its shutdown drain.
pub fn is_alive(shutting_down: bool) -> bool {
    !shutting_down
}
