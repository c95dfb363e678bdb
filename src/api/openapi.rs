//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, health, loans, session, stats};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bibliotheque API",
        version = "1.0.0",
        description = "Library loan management REST API",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api", description = "API")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Session
        session::login,
        session::logout,
        session::session,
        // Dashboard
        stats::get_stats,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Loans
        loans::borrow_book,
        loans::return_book,
        loans::my_loans,
        loans::all_loans,
        loans::overdue_loans,
        loans::statistics,
        loans::send_reminders,
        loans::send_manual_reminder,
        loans::mark_reminder_sent,
    ),
    components(
        schemas(
            // Session
            session::LoginRequest,
            session::LoginResponse,
            session::LogoutResponse,
            session::SessionResponse,
            crate::models::user::Borrower,
            crate::models::user::Role,
            crate::models::user::UserClaims,
            // Books
            crate::models::book::Book,
            crate::models::book::BookStatus,
            crate::models::book::CreateBook,
            crate::models::book::CatalogCounts,
            crate::models::book::UpdateBook,
            // Loans
            loans::BorrowResponse,
            loans::ReturnResponse,
            loans::MessageResponse,
            loans::SweepStartedResponse,
            loans::ManualReminderResponse,
            crate::models::loan::LoanDetails,
            crate::models::loan::LoanStatus,
            crate::models::loan::AdminLoanDetails,
            crate::models::loan::LoanStatistics,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&CookieAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Session endpoints"),
        (name = "books", description = "Catalog management"),
        (name = "stats", description = "Dashboard statistics"),
        (name = "loans", description = "Loans and reminders")
    )
)]
pub struct ApiDoc;

/// Registers the `token` cookie as the security scheme
struct CookieAuth;

impl Modify for CookieAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "cookie_auth",
                SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new("token"))),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
