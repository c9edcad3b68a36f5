pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::IssuerConfig;
use crate::services::post_policy::PostPolicySigner;
use axum::{Router, http::HeaderValue, middleware::from_fn, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::signed_url::signed_url,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            models::SignedPost,
            models::SignedUrls,
            models::SignedUrlResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "uploads", description = "Upload grant endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub signer: Arc<PostPolicySigner>,
    pub config: IssuerConfig,
}

pub fn create_app(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/signed_url", get(api::handlers::signed_url::signed_url))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors)
        .with_state(state)
}
