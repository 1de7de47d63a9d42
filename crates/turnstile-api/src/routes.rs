//! API route definitions
//!
//! Author: hephaex@gmail.com

use crate::auth::gate::require_session;
use crate::auth::refresh::silent_refresh;
use crate::handlers::{admin, health, user};
use crate::state::AppState;
use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;

/// `/v1/user` routes
///
/// Silent refresh wraps the whole router so it runs before the gate.
pub fn user_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let protected_routes = Router::new()
        .route("/info", get(user::info))
        .route("/update", patch(user::update))
        .route("/delete", delete(user::delete))
        .route("/logout", post(user::logout))
        .route_layer(middleware::from_fn_with_state(
            state.user_gate.clone(),
            require_session,
        ));

    Router::new()
        .route("/sign_up", post(user::sign_up))
        .route("/login", post(user::login))
        .route("/token", get(user::token))
        .route("/forgot_password", patch(user::forgot_password))
        .merge(protected_routes)
        .layer(middleware::from_fn_with_state(
            state.refresh.clone(),
            silent_refresh,
        ))
}

/// `/v1/admin` routes
pub fn admin_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let protected_routes = Router::new()
        .route("/all_users", get(admin::all_users))
        .route("/delete_user", delete(admin::delete_user))
        .route("/user_sessions", get(admin::user_sessions))
        .route("/logout", post(admin::logout))
        .route_layer(middleware::from_fn_with_state(
            state.admin_gate.clone(),
            require_session,
        ));

    Router::new()
        .route("/login", post(admin::login))
        .merge(protected_routes)
}

/// Probes, metrics and the greeting
pub fn misc_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::prometheus_metrics))
        .route("/v1/app_metrics", get(health::prometheus_metrics))
        .route("/v1/hello", get(health::hello))
}
