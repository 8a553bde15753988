use crate::config::Config;
use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn build_router(state: AppState, config: &Config) -> Router {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid cors origin {:?}", origin);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/cases", post(handlers::create_case).get(handlers::list_cases))
        .route(
            "/api/v1/cases/:id",
            get(handlers::get_case).put(handlers::update_case).delete(handlers::delete_case),
        )
        .route("/api/v1/cases/:id/view", post(handlers::view_case))
        .route("/api/v1/cases/:id/answer", post(handlers::answer_case))
        .route("/api/v1/grade", post(handlers::grade))
        .route(
            "/api/v1/views/:view_id/results",
            get(handlers::view_results),
        )
        .route("/api/v1/views/:view_id", delete(handlers::end_view))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
