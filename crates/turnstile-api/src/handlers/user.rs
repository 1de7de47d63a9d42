//! User account handlers
//!
//! Mounted under `/v1/user`. Every route here sits behind the silent refresh
//! layer; `info`, `update`, `delete` and `logout` also sit behind the user
//! auth gate and read the caller from `Extension<Identity>`.
//!
//! Author: hephaex@gmail.com

use crate::audit::ClientInfo;
use crate::auth::gate::Identity;
use crate::auth::models::{
    ForgotPasswordRequest, LoginRequest, SignupRequest, TokenResponse, UpdateUserRequest,
    UserAuthResponse,
};
use crate::auth::refresh::{clear_refresh_cookie, refresh_cookie, RefreshError};
use crate::auth::service::AccountError;
use crate::error::{ApiResponse, AppError};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

/// Register a new user
///
/// Creates the account, starts a session and returns an access token.
#[utoipa::path(
    post,
    path = "/v1/user/sign_up",
    tag = "user",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Signup successful.", body = UserAuthResponse),
        (status = 400, description = "Invalid input, password mismatch or duplicate email", body = crate::error::ApiError),
    )
)]
pub async fn sign_up(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let response = state
        .users
        .signup(request, &ClientInfo::from_headers(&headers))
        .await?;
    Ok(ApiResponse::created(response).with_message("Signup successful."))
}

/// Log in with email and password
///
/// Returns an access token in the body and sets the refresh token cookie.
#[utoipa::path(
    post,
    path = "/v1/user/login",
    tag = "user",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful.", body = UserAuthResponse),
        (status = 400, description = "User not found or wrong password", body = crate::error::ApiError),
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let outcome = state
        .users
        .login(request, &ClientInfo::from_headers(&headers))
        .await?;

    let cookie = refresh_cookie(
        &state.config.auth.refresh_cookie_name,
        &outcome.refresh_token,
        state.config.auth.refresh_token_ttl_secs(),
    );
    let body = UserAuthResponse {
        user: outcome.account,
        token: outcome.access_token,
    };

    Ok((
        [(header::SET_COOKIE, cookie)],
        ApiResponse::ok(body).with_message("Login successful."),
    ))
}

/// Exchange the refresh cookie for a new access token
#[utoipa::path(
    get,
    path = "/v1/user/token",
    tag = "user",
    responses(
        (status = 200, description = "New access token", body = TokenResponse),
        (status = 400, description = "Refresh token missing, invalid or expired", body = crate::error::ApiError),
    )
)]
pub async fn token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = state
        .refresh
        .refresh_token(&headers)
        .ok_or(RefreshError::MissingCookie)?;
    let minted = state.refresh.exchange(refresh_token).await?;

    Ok(ApiResponse::ok(TokenResponse {
        token: minted.token,
    }))
}

/// Reset a password by email
///
/// The account is identified by email alone; no reset token is required.
#[utoipa::path(
    patch,
    path = "/v1/user/forgot_password",
    tag = "user",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Invalid input or unknown email", body = crate::error::ApiError),
    )
)]
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    state
        .users
        .forgot_password(request, &ClientInfo::from_headers(&headers))
        .await?;
    Ok(ApiResponse::ok(()).with_message("Password updated successfully."))
}

/// Current user's profile
#[utoipa::path(
    get,
    path = "/v1/user/info",
    tag = "user",
    responses(
        (status = 200, description = "User profile", body = crate::auth::models::UserProfile),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn info(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state
        .users
        .info(identity.subject_id)
        .await
        .map_err(|e| match e {
            AccountError::NotFound => AppError::NotFound(e.to_string()),
            other => other.into(),
        })?;
    Ok(ApiResponse::ok(profile))
}

/// Update the current user's name or phone number
#[utoipa::path(
    patch,
    path = "/v1/user/update",
    tag = "user",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated profile", body = crate::auth::models::UserProfile),
        (status = 400, description = "Invalid input", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let profile = state
        .users
        .update(identity.subject_id, request.into())
        .await?;
    Ok(ApiResponse::ok(profile).with_message("User updated successfully."))
}

/// Delete the current user's account
#[utoipa::path(
    delete,
    path = "/v1/user/delete",
    tag = "user",
    responses(
        (status = 200, description = "Account deleted"),
        (status = 400, description = "User not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    state
        .users
        .delete(identity.subject_id, identity.subject_id, identity.role)
        .await?;

    let cookie = clear_refresh_cookie(&state.config.auth.refresh_cookie_name);
    Ok((
        [(header::SET_COOKIE, cookie)],
        ApiResponse::ok(()).with_message("User deleted successfully."),
    ))
}

/// End the current user session
#[utoipa::path(
    post,
    path = "/v1/user/logout",
    tag = "user",
    responses(
        (status = 200, description = "Logged out"),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, AppError> {
    state.users.logout(identity.subject_id).await?;

    let cookie = clear_refresh_cookie(&state.config.auth.refresh_cookie_name);
    Ok((
        [(header::SET_COOKIE, cookie)],
        ApiResponse::ok(()).with_message("Logout successful."),
    ))
}
