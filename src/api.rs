// src/api.rs
//! Small operational HTTP surface: health, Prometheus metrics, task count.

use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::registry::TaskRegistry;

#[derive(Clone)]
pub struct ApiState {
    pub registry: TaskRegistry,
    /// `None` when no recorder is installed; `/metrics` then serves an empty body.
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics_text))
        .route("/debug/tasks", get(debug_tasks))
        .with_state(state)
}

async fn metrics_text(State(state): State<ApiState>) -> String {
    state.metrics.as_ref().map(|h| h.render()).unwrap_or_default()
}

#[derive(serde::Serialize)]
struct TasksOut {
    running: usize,
    sources: usize,
}

async fn debug_tasks(State(state): State<ApiState>) -> Json<TasksOut> {
    Json(TasksOut {
        running: state.registry.running().await,
        sources: state.registry.sources().len(),
    })
}
