//! Turnstile API - account, authentication and session server
//!
//! Users and admins sign up and log in over REST. Access tokens are short
//! lived JWTs; every protected request also needs a live session record, so
//! logging out revokes a token before it expires.
//!
//! Author: hephaex@gmail.com

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    Router,
};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Turnstile API",
        version = "0.1.0",
        description = "Account, authentication and session management"
    ),
    paths(
        handlers::user::sign_up,
        handlers::user::login,
        handlers::user::token,
        handlers::user::forgot_password,
        handlers::user::info,
        handlers::user::update,
        handlers::user::delete,
        handlers::user::logout,
        handlers::admin::login,
        handlers::admin::all_users,
        handlers::admin::delete_user,
        handlers::admin::user_sessions,
        handlers::admin::logout,
        handlers::health::health_check,
        handlers::health::readiness_check,
        handlers::health::hello,
        handlers::health::prometheus_metrics,
    ),
    components(schemas(
        auth::models::SignupRequest,
        auth::models::LoginRequest,
        auth::models::ForgotPasswordRequest,
        auth::models::UpdateUserRequest,
        auth::models::DeleteUserRequest,
        auth::models::UserProfile,
        auth::models::AdminProfile,
        auth::models::UserAuthResponse,
        auth::models::AdminAuthResponse,
        auth::models::TokenResponse,
        auth::models::UserPage,
        auth::models::SessionLogEntry,
        turnstile_core::AccountRole,
        handlers::health::HealthResponse,
        handlers::health::ReadinessResponse,
        handlers::health::ReadinessChecks,
        error::ApiError,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "user", description = "User accounts and sessions"),
        (name = "admin", description = "Admin accounts and user management"),
        (name = "health", description = "Probes and metrics")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Build the full application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .nest("/v1/user", routes::user_routes(&state))
        .nest("/v1/admin", routes::admin_routes(&state))
        .merge(routes::misc_routes())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .fallback(route_not_found)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::metrics_middleware,
        ))
        .layer(axum::middleware::from_fn(
            middleware::security_headers_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS from configured origins; an empty list or `*` allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .expose_headers([header::HeaderName::from_static(
            auth::refresh::REFRESHED_TOKEN_HEADER,
        )])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        base.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();
        // Credentials so browsers send the refresh cookie cross-origin
        base.allow_origin(origins).allow_credentials(true)
    }
}

async fn route_not_found() -> impl IntoResponse {
    error::ApiError::new(StatusCode::NOT_FOUND, "Route not found")
}

/// Configuration for tests: in-memory stores and cheap password hashing
#[cfg(any(test, feature = "test-utils"))]
pub fn test_config() -> turnstile_core::AppConfig {
    let mut config = turnstile_core::AppConfig::default();
    config.database.backend = turnstile_core::StorageBackend::Memory;
    config.auth.password_memory_kib = 4096;
    config.auth.password_iterations = 1;
    config.auth.password_parallelism = 1;
    config
}

/// Router and state over in-memory backends
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_app() -> (Router, Arc<AppState>) {
    let state = Arc::new(
        AppState::in_memory(test_config()).expect("in-memory state builds"),
    );
    (create_router(state.clone()), state)
}

/// Create a router for testing
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> Router {
    create_test_app().0
}
