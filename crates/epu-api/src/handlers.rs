//! REST API handlers. Each reads/writes via the shared `EpumReactor` /
//! `Dispatcher` and returns a JSON `ApiResponse<T>` envelope.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use epu_core::types::PropertyMap;
use epu_core::ErrorKind;
use epu_reactor::DomainConfigPatch;
use epu_store::DomainConfig;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Every library error exposes `kind()`; this maps the §7 kind taxonomy
/// onto HTTP status uniformly so handlers never match concrete variants.
fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Configuration => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Stale => StatusCode::OK,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Invariant => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
    }
}

// ── Domains ─────────────────────────────────────────────────────

/// GET /api/v1/domains
pub async fn list_domains(State(state): State<ApiState>) -> impl IntoResponse {
    match state.reactor.list_domains(&state.default_owner) {
        Ok(domains) => ApiResponse::ok(domains).into_response(),
        Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
    }
}

#[derive(serde::Deserialize)]
pub struct CreateDomainRequest {
    pub domain_id: String,
    #[serde(default)]
    pub config: DomainConfig,
    #[serde(default)]
    pub subscriber: Option<(String, String)>,
}

/// POST /api/v1/domains
pub async fn create_domain(
    State(state): State<ApiState>,
    Json(req): Json<CreateDomainRequest>,
) -> impl IntoResponse {
    match state
        .reactor
        .add_domain(&state.default_owner, &req.domain_id, req.config, req.subscriber)
    {
        Ok(()) => match state.reactor.describe_domain(&state.default_owner, &req.domain_id) {
            Ok(desc) => (StatusCode::CREATED, ApiResponse::ok(desc)).into_response(),
            Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
        },
        Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
    }
}

/// GET /api/v1/domains/:id
pub async fn describe_domain(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.reactor.describe_domain(&state.default_owner, &id) {
        Ok(desc) => ApiResponse::ok(desc).into_response(),
        Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
    }
}

/// DELETE /api/v1/domains/:id
pub async fn remove_domain(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.reactor.remove_domain(&state.default_owner, &id) {
        Ok(()) => ApiResponse::ok("removed").into_response(),
        Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
    }
}

/// POST /api/v1/domains/:id/reconfigure
pub async fn reconfigure_domain(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(patch): Json<DomainConfigPatch>,
) -> impl IntoResponse {
    match state.reactor.reconfigure_domain(&state.default_owner, &id, patch) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
    }
}

// ── Processes ──────────────────────────────────────────────────

#[derive(serde::Deserialize)]
pub struct DispatchProcessRequest {
    pub upid: String,
    pub run_type: String,
    #[serde(default)]
    pub parameters: PropertyMap,
    #[serde(default)]
    pub subscribers: Vec<(String, String)>,
    #[serde(default)]
    pub constraints: PropertyMap,
    #[serde(default)]
    pub immediate: bool,
}

/// POST /api/v1/processes
pub async fn dispatch_process(
    State(state): State<ApiState>,
    Json(req): Json<DispatchProcessRequest>,
) -> impl IntoResponse {
    match state
        .dispatcher
        .dispatch_process(&req.upid, &req.run_type, req.parameters, req.subscribers, req.constraints, req.immediate)
        .await
    {
        Ok(record) => (StatusCode::CREATED, ApiResponse::ok(record)).into_response(),
        Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
    }
}

/// GET /api/v1/processes/:upid
pub async fn get_process(State(state): State<ApiState>, Path(upid): Path<String>) -> impl IntoResponse {
    match state.dispatcher.get_process(&upid).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
    }
}

/// DELETE /api/v1/processes/:upid
pub async fn terminate_process(State(state): State<ApiState>, Path(upid): Path<String>) -> impl IntoResponse {
    match state.dispatcher.terminate_process(&upid).await {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => error_response(&e.to_string(), status_for_kind(e.kind())),
    }
}

/// GET /api/v1/dispatcher/dump
pub async fn dispatcher_dump(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.dispatcher.dump().await).into_response()
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    match state.metrics.snapshot().await {
        Ok(snapshot) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            epu_metrics::render_prometheus(&snapshot),
        )
            .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use epu_core::{LoggingEeAgent, LoggingEpumClient, LoggingSubscriberSink};
    use epu_dispatch::Dispatcher;
    use epu_metrics::MetricsCollector;
    use epu_reactor::EpumReactor;
    use epu_store::EpumStore;

    fn test_state() -> ApiState {
        let store = EpumStore::open_in_memory().unwrap();
        let notifier = Arc::new(LoggingSubscriberSink);
        let reactor = Arc::new(EpumReactor::new(store.clone(), notifier.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            "pdc-test",
            Arc::new(LoggingEeAgent),
            Arc::new(LoggingEpumClient),
            notifier,
            epu_core::EeRegistryTable::default(),
        ));
        let metrics = Arc::new(MetricsCollector::new(store, Duration::from_secs(60)));
        ApiState {
            reactor,
            dispatcher,
            metrics,
            default_owner: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn list_domains_empty() {
        let state = test_state();
        let resp = list_domains(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_describe_domain() {
        let state = test_state();
        let req = CreateDomainRequest {
            domain_id: "dom1".to_string(),
            config: DomainConfig::default(),
            subscriber: None,
        };
        let resp = create_domain(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = describe_domain(State(state), Path("dom1".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn describe_nonexistent_domain_is_not_found() {
        let state = test_state();
        let resp = describe_domain(State(state), Path("nope".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_domain_twice_is_conflict() {
        let state = test_state();
        let req = || CreateDomainRequest {
            domain_id: "dom1".to_string(),
            config: DomainConfig::default(),
            subscriber: None,
        };
        let _ = create_domain(State(state.clone()), Json(req())).await;
        let resp = create_domain(State(state), Json(req())).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn dispatch_and_get_process() {
        let state = test_state();
        let req = DispatchProcessRequest {
            upid: "p1".to_string(),
            run_type: "batch".to_string(),
            parameters: PropertyMap::new(),
            subscribers: vec![],
            constraints: PropertyMap::new(),
            immediate: false,
        };
        let resp = dispatch_process(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_process(State(state), Path("p1".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn terminate_unknown_process_is_not_found() {
        let state = test_state();
        let resp = terminate_process(State(state), Path("ghost".to_string())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dump_returns_ok_even_when_empty() {
        let state = test_state();
        let resp = dispatcher_dump(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let state = test_state();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
