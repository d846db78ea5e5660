//! Default request handler tree.
//!
//! # Responsibilities
//! - Build the Axum router served by the bound socket
//! - Report database readiness so clients can tell the startup window apart
//!   from a healthy server
//! - Wire up request tracing

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::db::{ConnectionState, DatabaseHandle};

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    database: ConnectionState,
}

/// Build the router with the health endpoint and tracing middleware.
pub fn build_router(db: DatabaseHandle) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(db)
        .layer(TraceLayer::new_for_http())
}

/// 200 once a session is live, 503 while the database is unavailable.
async fn health_handler(State(db): State<DatabaseHandle>) -> impl IntoResponse {
    let database = db.state();
    if db.session().is_some() {
        (StatusCode::OK, Json(HealthReport { status: "ok", database }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthReport {
                status: "degraded",
                database,
            }),
        )
    }
}
