pub mod error;
pub mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
    pub static_path: String,
}

impl From<&Config> for ApiSettings {
    fn from(config: &Config) -> Self {
        ApiSettings {
            allowed_origins: config.allowed_origins.clone(),
            max_upload_bytes: config.max_upload_bytes,
            static_path: config.public_images_path.clone(),
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {origin}");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn build_router(state: AppState, settings: &ApiSettings) -> Router {
    let static_files = ServeDir::new(state.local.dir());

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/images", get(handlers::list_images))
        .route("/api/images/{*id}", delete(handlers::delete_image))
        .route("/api/upload", post(handlers::upload_image))
        .route("/submit-order", post(handlers::submit_order))
        .route("/migrate-images", get(handlers::migrate_images))
        .nest_service(&settings.static_path, static_files)
        .with_state(state)
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(settings.max_upload_bytes))
        .layer(cors_layer(&settings.allowed_origins))
        .layer(TraceLayer::new_for_http())
}
