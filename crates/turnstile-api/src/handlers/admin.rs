//! Admin handlers, mounted under `/v1/admin`
//!
//! Author: hephaex@gmail.com

use crate::audit::ClientInfo;
use crate::auth::gate::Identity;
use crate::auth::models::{
    AdminAuthResponse, DeleteUserRequest, LoginRequest, PaginationQuery, SessionHistoryQuery,
};
use crate::auth::refresh::{clear_refresh_cookie, refresh_cookie};
use crate::error::{ApiResponse, AppError};
use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

#[utoipa::path(
    post,
    path = "/v1/admin/login",
    tag = "admin",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful.", body = AdminAuthResponse),
        (status = 400, description = "Admin not found or wrong password", body = crate::error::ApiError),
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let outcome = state
        .admins
        .login(request, &ClientInfo::from_headers(&headers))
        .await?;

    let cookie = refresh_cookie(
        &state.config.auth.refresh_cookie_name,
        &outcome.refresh_token,
        state.config.auth.refresh_token_ttl_secs(),
    );
    let body = AdminAuthResponse {
        admin: outcome.account,
        token: outcome.access_token,
    };

    Ok((
        [(header::SET_COOKIE, cookie)],
        ApiResponse::ok(body).with_message("Login successful."),
    ))
}

/// Page through all users
#[utoipa::path(
    get,
    path = "/v1/admin/all_users",
    tag = "admin",
    params(PaginationQuery),
    responses(
        (status = 200, description = "One page of users", body = crate::auth::models::UserPage),
        (status = 403, description = "Admin access routes only", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn all_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PaginationQuery>,
) -> Result<impl IntoResponse, AppError> {
    query.validate()?;
    let page = state.admins.list_users(&query).await?;
    Ok(ApiResponse::ok(page))
}

/// Delete a user and end their session
#[utoipa::path(
    delete,
    path = "/v1/admin/delete_user",
    tag = "admin",
    request_body = DeleteUserRequest,
    responses(
        (status = 200, description = "User deleted"),
        (status = 400, description = "User not found", body = crate::error::ApiError),
        (status = 403, description = "Admin access routes only", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<DeleteUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .admins
        .delete_user(request.user_id, identity.subject_id)
        .await?;
    Ok(ApiResponse::ok(()).with_message("User deleted successfully."))
}

/// Login history of one user
#[utoipa::path(
    get,
    path = "/v1/admin/user_sessions",
    tag = "admin",
    params(SessionHistoryQuery),
    responses(
        (status = 200, description = "Recorded sessions, newest first", body = [crate::auth::models::SessionLogEntry]),
        (status = 403, description = "Admin access routes only", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn user_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionHistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let history = state.admins.user_sessions(query.user_id).await?;
    Ok(ApiResponse::ok(history))
}

#[utoipa::path(
    post,
    path = "/v1/admin/logout",
    tag = "admin",
    responses(
        (status = 200, description = "Logged out"),
        (status = 403, description = "Admin access routes only", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    state.admins.logout(identity.subject_id).await?;

    let cookie = clear_refresh_cookie(&state.config.auth.refresh_cookie_name);
    Ok((
        [(header::SET_COOKIE, cookie)],
        ApiResponse::ok(()).with_message("Logout successful."),
    ))
}
