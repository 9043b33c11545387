use axum::{
    extract::FromRef,
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod guard;
pub mod openid;
pub mod routes;

use auth::TokenVerifier;
use config::Settings;
use openid::{JwksVerifier, OpenIDError};

#[derive(Clone)]
pub struct AppState {
    verifier: Arc<dyn TokenVerifier>,
}

impl FromRef<AppState> for Arc<dyn TokenVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Loads the provider's signing keys, then builds the service. Nothing is
/// served if the keys cannot be loaded.
pub async fn app(settings: &Settings) -> Result<Router, OpenIDError> {
    let verifier = JwksVerifier::init(settings).await?;
    Ok(router(settings, verifier))
}

pub fn router(settings: &Settings, verifier: Arc<dyn TokenVerifier>) -> Router {
    Router::new()
        .merge(routes::protected(routes::PROTECTED_ROUTES))
        .route("/health", get(health))
        .layer(cors(&settings.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { verifier })
}

async fn health() -> &'static str {
    "OK"
}

fn cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Browsers refuse credentials on a wildcard origin.
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins = origins.iter().filter_map(|origin| {
        HeaderValue::from_str(origin)
            .map_err(|_| tracing::warn!("ignoring CORS origin {}", origin))
            .ok()
    });
    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
