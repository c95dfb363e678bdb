//! Login, logout and session endpoints

use axum::{extract::State, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::AppResult,
    models::user::{Borrower, UserClaims},
    AppState,
};

use super::{AuthenticatedUser, TOKEN_COOKIE};

/// Login request
#[derive(Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[serde(alias = "mot_de_passe")]
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub message: String,
    pub utilisateur: Borrower,
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub user: UserClaims,
}

#[derive(Serialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Log in; the session token is set as an HttpOnly cookie
#[utoipa::path(
    post,
    path = "/users/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Invalid input", body = crate::error::ErrorResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    request.validate()?;

    let (token, borrower) = state
        .services
        .auth
        .login(&request.email, &request.password)
        .await?;

    let cookie = Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.services.auth.cookie_secure());

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            message: "Logged in successfully".to_string(),
            utilisateur: borrower,
        }),
    ))
}

/// Clear the session cookie
#[utoipa::path(
    post,
    path = "/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse)
    )
)]
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<LogoutResponse>) {
    (
        jar.remove(Cookie::build(TOKEN_COOKIE).path("/")),
        Json(LogoutResponse {
            message: "Logged out".to_string(),
        }),
    )
}

/// Claims of the current session
#[utoipa::path(
    get,
    path = "/session",
    tag = "auth",
    security(("cookie_auth" = [])),
    responses(
        (status = 200, description = "Current session", body = SessionResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse)
    )
)]
pub async fn session(AuthenticatedUser(claims): AuthenticatedUser) -> Json<SessionResponse> {
    Json(SessionResponse { user: claims })
}
