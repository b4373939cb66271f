pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::screening::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Screening API
        .route("/api/v1/screenings", post(handlers::handle_run_screening))
        .route(
            "/api/v1/screenings/extract",
            post(handlers::handle_extract_preview),
        )
        .route(
            "/api/v1/screenings/:id",
            get(handlers::handle_get_screening),
        )
        .route(
            "/api/v1/screenings/:id/cancel",
            post(handlers::handle_cancel_screening),
        )
        .with_state(state)
}
