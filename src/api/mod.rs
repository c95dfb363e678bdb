//! API handlers for the Bibliotheque REST endpoints

pub mod books;
pub mod health;
pub mod loans;
pub mod openapi;
pub mod session;
pub mod stats;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use tower_http::trace::TraceLayer;

use crate::{error::AppError, models::user::UserClaims, AppState};

/// Name of the cookie carrying the session JWT
pub const TOKEN_COOKIE: &str = "token";

/// Extractor for the authenticated user, read from the `token` cookie
pub struct AuthenticatedUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar
            .get(TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .ok_or_else(|| AppError::Authentication("Not authenticated".to_string()))?;

        let claims = state.services.auth.verify_token(&token)?;
        Ok(AuthenticatedUser(claims))
    }
}

/// Authenticated user holding the admin role
pub struct AdminUser(pub UserClaims);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(claims) = AuthenticatedUser::from_request_parts(parts, state).await?;
        claims.require_admin()?;
        Ok(AdminUser(claims))
    }
}

/// All routes, documentation and request tracing; CORS is left to the caller
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Session
        .route("/users/login", post(session::login))
        .route("/logout", post(session::logout))
        .route("/session", get(session::session))
        // Dashboard
        .route("/statistics", get(stats::get_stats))
        // Catalog
        .route("/books", get(books::list_books).post(books::create_book))
        .route(
            "/books/:id",
            get(books::get_book)
                .put(books::update_book)
                .delete(books::delete_book),
        )
        // Loans
        .route("/emprunts/emprunter/:livre_id", post(loans::borrow_book))
        .route("/emprunts/retourner/:emprunt_id", post(loans::return_book))
        .route("/emprunts/mes-emprunts", get(loans::my_loans))
        .route("/emprunts/tous", get(loans::all_loans))
        .route("/emprunts/all", get(loans::all_loans))
        .route("/emprunts/en-retard", get(loans::overdue_loans))
        .route("/emprunts/statistiques", get(loans::statistics))
        .route("/emprunts/envoyer-rappels", post(loans::send_reminders))
        .route("/emprunts/:emprunt_id/rappel", post(loans::send_manual_reminder))
        .route("/emprunts/rappel-envoye/:emprunt_id", post(loans::mark_reminder_sent))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .merge(openapi::create_openapi_router())
        .layer(TraceLayer::new_for_http())
}
