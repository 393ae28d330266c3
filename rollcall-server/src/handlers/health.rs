use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::AppState;

pub async fn health_handler(State(state): State<AppState>) -> Response {
    let mut health_status = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {}
    });

    let mut is_unhealthy = false;

    match state.event_log().ping().await {
        Ok(()) => {
            health_status["checks"]["event_log"] = json!({
                "status": "healthy",
                "stream": state.config().log.stream,
            });
        }
        Err(e) => {
            health_status["checks"]["event_log"] = json!({
                "status": "unhealthy",
                "error": e.to_string()
            });
            is_unhealthy = true;
        }
    }

    health_status["checks"]["observers"] = json!({
        "connected": state.websocket_manager.connection_count(),
        "bridge_running": state.fanout.is_running(),
    });

    if is_unhealthy {
        health_status["status"] = json!("unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status)).into_response()
    } else {
        Json(health_status).into_response()
    }
}
