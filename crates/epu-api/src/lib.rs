//! `epu-api` — REST API for EPUM/PDC operational introspection and control
//! (spec §10.3).
//!
//! Exposes domain CRUD/reconfigure, process dispatch/inspect/terminate,
//! the PDC dump snapshot, and a Prometheus exposition endpoint over a
//! shared `EpumReactor` + `Dispatcher` + `MetricsCollector`, following the
//! existing API crate's `ApiResponse<T>{success,data,error}` JSON envelope
//! and handler-per-route structure.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/domains` | List domains for the default owner |
//! | POST | `/api/v1/domains` | Add a domain |
//! | GET | `/api/v1/domains/:id` | Describe a domain (config + instances) |
//! | DELETE | `/api/v1/domains/:id` | Remove a domain |
//! | POST | `/api/v1/domains/:id/reconfigure` | Reconfigure a domain |
//! | POST | `/api/v1/processes` | Dispatch a process |
//! | GET | `/api/v1/processes/:upid` | Get process record |
//! | DELETE | `/api/v1/processes/:upid` | Terminate a process |
//! | GET | `/api/v1/dispatcher/dump` | PDC introspection snapshot |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use epu_dispatch::Dispatcher;
use epu_metrics::MetricsCollector;
use epu_reactor::EpumReactor;

/// Shared state for every API handler.
#[derive(Clone)]
pub struct ApiState {
    pub reactor: Arc<EpumReactor>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<MetricsCollector>,
    /// Owner scoping domain listing/creation when the request does not
    /// name one explicitly — this crate does not implement multi-tenant
    /// auth (spec §1), so a single configured owner stands in for it.
    pub default_owner: String,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let domain_routes = Router::new()
        .route("/domains", get(handlers::list_domains).post(handlers::create_domain))
        .route(
            "/domains/{id}",
            get(handlers::describe_domain).delete(handlers::remove_domain),
        )
        .route("/domains/{id}/reconfigure", post(handlers::reconfigure_domain));

    let process_routes = Router::new()
        .route("/processes", post(handlers::dispatch_process))
        .route(
            "/processes/{upid}",
            get(handlers::get_process).delete(handlers::terminate_process),
        )
        .route("/dispatcher/dump", get(handlers::dispatcher_dump));

    Router::new()
        .nest("/api/v1", domain_routes.merge(process_routes))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
