use axum::{
    Router,
    routing::{get, post},
};

use crate::{AppState, handlers};

/// Create all v1 API routes
pub fn create_v1_router(_state: AppState) -> Router<AppState> {
    Router::new()
        .route("/attendance", post(handlers::submit_attendance_handler))
        // Route used by older capture stations
        .route("/log_attendance", post(handlers::submit_attendance_handler))
        .route("/attendance/live", get(handlers::live_attendance_handler))
}
