//! Loan (emprunt) endpoints

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::AppResult,
    models::loan::{AdminLoanDetails, LoanDetails, LoanStatistics},
    AppState,
};

use super::{AdminUser, AuthenticatedUser};

/// Borrow response
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BorrowResponse {
    pub message: String,
    pub emprunt_id: i32,
    /// Due date (ISO 8601)
    pub date_retour_prevue: DateTime<Utc>,
    pub duree_jours: i64,
}

/// Return response
#[derive(Serialize, ToSchema)]
pub struct ReturnResponse {
    pub message: String,
    /// Title of the returned book
    pub livre: String,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Acknowledgement of a sweep started in the background
#[derive(Serialize, ToSchema)]
pub struct SweepStartedResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManualReminderResponse {
    pub message: String,
    pub email: String,
    pub rappels_envoyes: i32,
}

/// Borrow a book for 30 days
#[utoipa::path(
    post,
    path = "/emprunts/emprunter/{livre_id}",
    tag = "loans",
    security(("cookie_auth" = [])),
    params(("livre_id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Book borrowed", body = BorrowResponse),
        (status = 400, description = "Book unavailable or already borrowed", body = crate::error::ErrorResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse)
    )
)]
pub async fn borrow_book(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(livre_id): Path<i32>,
) -> AppResult<Json<BorrowResponse>> {
    let receipt = state
        .services
        .loans
        .borrow(livre_id, claims.id, Utc::now())
        .await?;

    Ok(Json(BorrowResponse {
        message: "Book borrowed successfully".to_string(),
        emprunt_id: receipt.loan_id,
        date_retour_prevue: receipt.due_at,
        duree_jours: receipt.duration_days,
    }))
}

/// Return one of the caller's loans
#[utoipa::path(
    post,
    path = "/emprunts/retourner/{emprunt_id}",
    tag = "loans",
    security(("cookie_auth" = [])),
    params(("emprunt_id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Book returned", body = ReturnResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse),
        (status = 404, description = "Loan not found or already returned", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_book(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(emprunt_id): Path<i32>,
) -> AppResult<Json<ReturnResponse>> {
    let receipt = state
        .services
        .loans
        .return_loan(emprunt_id, claims.id, Utc::now())
        .await?;

    Ok(Json(ReturnResponse {
        message: "Book returned successfully".to_string(),
        livre: receipt.book_title,
    }))
}

/// Loan history of the caller
#[utoipa::path(
    get,
    path = "/emprunts/mes-emprunts",
    tag = "loans",
    security(("cookie_auth" = [])),
    responses(
        (status = 200, description = "Caller's loans, outstanding first", body = Vec<LoanDetails>),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse)
    )
)]
pub async fn my_loans(
    State(state): State<AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanDetails>>> {
    let loans = state
        .services
        .loans
        .list_for_borrower(claims.id, Utc::now())
        .await?;
    Ok(Json(loans))
}

/// Every loan, with borrower details
#[utoipa::path(
    get,
    path = "/emprunts/tous",
    tag = "loans",
    security(("cookie_auth" = [])),
    responses(
        (status = 200, description = "All loans: overdue, active, returned", body = Vec<AdminLoanDetails>),
        (status = 403, description = "Administrator privileges required", body = crate::error::ErrorResponse)
    )
)]
pub async fn all_loans(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
) -> AppResult<Json<Vec<AdminLoanDetails>>> {
    let loans = state.services.loans.list_all(Utc::now()).await?;
    Ok(Json(loans))
}

/// Outstanding loans past their due date
#[utoipa::path(
    get,
    path = "/emprunts/en-retard",
    tag = "loans",
    security(("cookie_auth" = [])),
    responses(
        (status = 200, description = "Overdue loans, most late first", body = Vec<AdminLoanDetails>),
        (status = 403, description = "Administrator privileges required", body = crate::error::ErrorResponse)
    )
)]
pub async fn overdue_loans(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
) -> AppResult<Json<Vec<AdminLoanDetails>>> {
    let loans = state.services.loans.list_overdue(Utc::now()).await?;
    Ok(Json(loans))
}

/// Loan counters
#[utoipa::path(
    get,
    path = "/emprunts/statistiques",
    tag = "loans",
    security(("cookie_auth" = [])),
    responses(
        (status = 200, description = "Loan counters", body = LoanStatistics),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorResponse)
    )
)]
pub async fn statistics(
    State(state): State<AppState>,
    AuthenticatedUser(_claims): AuthenticatedUser,
) -> AppResult<Json<LoanStatistics>> {
    let stats = state.services.loans.statistics(Utc::now()).await?;
    Ok(Json(stats))
}

/// Start a reminder sweep in the background
#[utoipa::path(
    post,
    path = "/emprunts/envoyer-rappels",
    tag = "loans",
    security(("cookie_auth" = [])),
    responses(
        (status = 200, description = "Sweep started", body = SweepStartedResponse),
        (status = 403, description = "Administrator privileges required", body = crate::error::ErrorResponse)
    )
)]
pub async fn send_reminders(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
) -> Json<SweepStartedResponse> {
    let reminders = state.services.reminders.clone();
    tracing::info!("Reminder sweep triggered by admin {}", claims.id);

    tokio::spawn(async move {
        if let Err(e) = reminders.sweep(Utc::now()).await {
            tracing::error!("Manual reminder sweep failed: {}", e);
        }
    });

    Json(SweepStartedResponse {
        message: "Reminders are being sent. See the server logs for details.".to_string(),
        timestamp: Utc::now(),
    })
}

/// Send a reminder for one overdue loan now
#[utoipa::path(
    post,
    path = "/emprunts/{emprunt_id}/rappel",
    tag = "loans",
    security(("cookie_auth" = [])),
    params(("emprunt_id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Reminder sent", body = ManualReminderResponse),
        (status = 400, description = "Loan is not overdue", body = crate::error::ErrorResponse),
        (status = 403, description = "Administrator privileges required", body = crate::error::ErrorResponse),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse),
        (status = 500, description = "Email could not be sent", body = crate::error::ErrorResponse)
    )
)]
pub async fn send_manual_reminder(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
    Path(emprunt_id): Path<i32>,
) -> AppResult<Json<ManualReminderResponse>> {
    let receipt = state
        .services
        .reminders
        .send_manual_reminder(emprunt_id, Utc::now())
        .await?;

    Ok(Json(ManualReminderResponse {
        message: "Reminder sent successfully".to_string(),
        email: receipt.email,
        rappels_envoyes: receipt.reminder_count,
    }))
}

/// Flag a loan as reminded without sending an email
#[utoipa::path(
    post,
    path = "/emprunts/rappel-envoye/{emprunt_id}",
    tag = "loans",
    security(("cookie_auth" = [])),
    params(("emprunt_id" = i32, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Reminder flag set", body = MessageResponse),
        (status = 403, description = "Administrator privileges required", body = crate::error::ErrorResponse),
        (status = 404, description = "Loan not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn mark_reminder_sent(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
    Path(emprunt_id): Path<i32>,
) -> AppResult<Json<MessageResponse>> {
    state.services.loans.mark_reminder_sent(emprunt_id, Utc::now()).await?;
    Ok(Json(MessageResponse {
        message: "Reminder marked as sent".to_string(),
    }))
}
