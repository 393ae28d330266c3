pub mod v1;

use crate::{AppState, handlers};
use axum::{
    Router,
    http::HeaderValue,
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main API router with all versions
pub fn create_api_router(state: AppState) -> Router<AppState> {
    Router::new().nest("/api/v1", v1::create_v1_router(state))
}

/// Full application: health, versioned API, CORS and request tracing.
pub fn create_app(state: AppState) -> Router {
    let versioned_api = create_api_router(state.clone());

    let cors_layer = {
        let cors = &state.config().cors;
        if cors.allowed_origins.is_empty() || cors.is_wildcard_included() {
            CorsLayer::permissive()
        } else {
            let origins: Vec<HeaderValue> = cors
                .allowed_origins
                .iter()
                .filter_map(|s| HeaderValue::from_str(s).ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
    };

    Router::new()
        .route("/health", get(handlers::health_handler))
        .merge(versioned_api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(state)
}
