use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinSet;

use deepresearch_common::api::{
    CrawlBatchRequest, CrawlBatchResponse, CrawlResult, CrawlStats, ExportRequest,
    StartResearchRequest, StartResearchResponse,
};
use deepresearch_common::config::Settings;
use deepresearch_common::{ResearchError, SessionId};
use deepresearch_fetch::ContentFetcher;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::export::ExportRegistry;
use crate::health::StartupReport;
use crate::memory::MemoryStore;
use crate::orchestrator::Orchestrator;

/// Shared application state accessible from axum handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub settings: Arc<Settings>,
    pub memory: Arc<MemoryStore>,
    pub fetcher: Arc<ContentFetcher>,
    pub exports: ExportRegistry,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub startup: StartupReport,
    pub metrics_handle: PrometheusHandle,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/research/start", post(start_research_handler))
        .route("/research/{id}/status", get(status_handler))
        .route("/research/{id}/approve", post(approve_handler))
        .route("/research/{id}/stop", post(stop_handler))
        .route("/research/{id}/report", get(report_handler))
        .route("/research/{id}/events", get(events_handler))
        .route("/crawl/batch", post(crawl_batch_handler))
        .route("/export", post(export_handler))
        .route("/health", get(health_handler))
        .route("/health/detailed", get(health_detailed_handler))
        .route("/health/config", get(health_config_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Map an error to its HTTP shape: human-readable reason plus machine code.
fn error_response(e: ResearchError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        ResearchError::NotFound(_) => StatusCode::NOT_FOUND,
        ResearchError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ResearchError::PolicyViolation(_) => StatusCode::FORBIDDEN,
        ResearchError::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = serde_json::json!({
        "error": e.to_string(),
        "code": e.code(),
    });
    (status, Json(body))
}

/// POST /research/start — create a session and run it in the background.
async fn start_research_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartResearchRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .start_research(&request.query, request.privacy_mode)
        .await
    {
        Ok(session_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::to_value(StartResearchResponse {
                session_id,
                status: "started".into(),
            })
            .unwrap_or_default()),
        ),
        Err(e) => error_response(e),
    }
}

/// GET /research/{id}/status.
async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.status(SessionId::from_uuid(id)).await {
        Ok(status) => (
            StatusCode::OK,
            Json(serde_json::to_value(status).unwrap_or_default()),
        ),
        Err(e) => error_response(e),
    }
}

/// POST /research/{id}/approve — proceed after clarify.
async fn approve_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.approve(SessionId::from_uuid(id)).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "approved"})),
        ),
        Err(e) => error_response(e),
    }
}

/// POST /research/{id}/stop — cooperative cancellation.
async fn stop_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.stop(SessionId::from_uuid(id)).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "stopping"})),
        ),
        Err(e) => error_response(e),
    }
}

/// GET /research/{id}/report.
async fn report_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
) -> impl IntoResponse {
    match state.orchestrator.report(SessionId::from_uuid(id)).await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::to_value(report).unwrap_or_default()),
        ),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct EventsQuery {
    #[serde(default)]
    since: usize,
}

/// GET /research/{id}/events?since=N — poll the buffered progress stream.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<uuid::Uuid>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .events_since(SessionId::from_uuid(id), query.since)
        .await
    {
        Ok((events, next)) => (
            StatusCode::OK,
            Json(serde_json::json!({"events": events, "next": next})),
        ),
        Err(e) => error_response(e),
    }
}

/// POST /crawl/batch — fetch a set of URLs through the stealth fetcher.
async fn crawl_batch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CrawlBatchRequest>,
) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let requested = request.urls.len();

    let mut join_set = JoinSet::new();
    for url in request.urls {
        let fetcher = Arc::clone(&state.fetcher);
        join_set.spawn(async move {
            let outcome = fetcher.fetch(&url).await;
            (url, outcome)
        });
    }

    let mut results = Vec::with_capacity(requested);
    let mut failed = 0usize;

    while let Some(joined) = join_set.join_next().await {
        let Ok((url, outcome)) = joined else {
            continue;
        };
        match outcome {
            Ok(page) => results.push(CrawlResult {
                url,
                content: page.content,
                status_code: Some(page.status_code),
                error: None,
            }),
            Err(e) => {
                failed += 1;
                state
                    .memory
                    .record_access_failure(&url, "crawler", e.kind())
                    .await;
                results.push(CrawlResult {
                    url,
                    content: String::new(),
                    status_code: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    // Deterministic response ordering regardless of completion order.
    results.sort_by(|a, b| a.url.cmp(&b.url));

    let response = CrawlBatchResponse {
        stats: CrawlStats {
            requested,
            fetched: results.len() - failed,
            failed,
            elapsed_ms: start.elapsed().as_millis() as u64,
        },
        results,
    };

    (StatusCode::OK, Json(response))
}

/// POST /export — render a report in the requested format.
async fn export_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExportRequest>,
) -> axum::response::Response {
    match state.exports.render(request.format, &request.report) {
        Ok((bytes, content_type)) => {
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /health — liveness plus store reachability.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store_ok = state.memory.health_check().await.is_ok();
    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if store_ok { "healthy" } else { "unhealthy" },
        })),
    )
}

/// GET /health/detailed — feature matrix, circuit states, session count.
async fn health_detailed_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.breakers.report_metrics();

    Json(serde_json::json!({
        "status": if state.startup.pass { "healthy" } else { "degraded" },
        "features": state.startup.features,
        "active_sessions": state.orchestrator.active_sessions().await,
        "export_formats": state.exports.available_formats(),
    }))
}

/// GET /health/config — effective configuration with secrets masked.
async fn health_config_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.settings.masked())
}

/// GET /metrics — Prometheus exposition.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
