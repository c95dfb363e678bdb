//! Loan queries for PostgreSQL

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::{
    error::{AppError, AppResult, LoanError},
    models::loan::{Loan, LoanRecord, LoanStatistics, LoanStatus},
};

macro_rules! loan_columns {
    () => {
        "id, book_id, borrower_id, borrowed_at, due_at, returned_at, status, \
         reminder_sent, reminder_count, last_reminder_at"
    };
}

/// Loan joined with its book and borrower; callers append WHERE / ORDER BY
macro_rules! loan_record_select {
    () => {
        r#"
        SELECT l.id, l.book_id, l.borrower_id, l.borrowed_at, l.due_at, l.returned_at,
               l.status, l.reminder_sent, l.reminder_count, l.last_reminder_at,
               b.title AS book_title, b.author AS book_author, b.cover_url AS book_cover_url,
               u.firstname AS borrower_firstname, u.lastname AS borrower_lastname,
               u.email AS borrower_email
        FROM loans l
        JOIN books b ON b.id = l.book_id
        JOIN users u ON u.id = l.borrower_id
        "#
    };
}

/// Outstanding loan for a (book, borrower) pair
pub async fn find_outstanding<'e, E: PgExecutor<'e>>(
    executor: E,
    book_id: i32,
    borrower_id: i32,
) -> AppResult<Option<Loan>> {
    let loan = sqlx::query_as::<_, Loan>(concat!(
        "SELECT ",
        loan_columns!(),
        " FROM loans WHERE book_id = $1 AND borrower_id = $2 AND status IN ('active', 'overdue')"
    ))
    .bind(book_id)
    .bind(borrower_id)
    .fetch_optional(executor)
    .await?;
    Ok(loan)
}

/// Create a new active loan
pub async fn insert<'e, E: PgExecutor<'e>>(
    executor: E,
    book_id: i32,
    borrower_id: i32,
    borrowed_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
) -> AppResult<Loan> {
    sqlx::query_as::<_, Loan>(concat!(
        r#"
        INSERT INTO loans (book_id, borrower_id, borrowed_at, due_at, status,
                           reminder_sent, reminder_count)
        VALUES ($1, $2, $3, $4, $5, FALSE, 0)
        RETURNING "#,
        loan_columns!()
    ))
    .bind(book_id)
    .bind(borrower_id)
    .bind(borrowed_at)
    .bind(due_at)
    .bind(LoanStatus::Active)
    .fetch_one(executor)
    .await
    .map_err(|e| match e {
        // loans_one_outstanding_per_book
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            LoanError::BookUnavailable.into()
        }
        e => AppError::Database(e),
    })
}

/// Outstanding loan owned by `borrower_id`, locked for update
pub async fn lock_owned_outstanding<'e, E: PgExecutor<'e>>(
    executor: E,
    loan_id: i32,
    borrower_id: i32,
) -> AppResult<Loan> {
    sqlx::query_as::<_, Loan>(concat!(
        "SELECT ",
        loan_columns!(),
        " FROM loans WHERE id = $1 AND borrower_id = $2 AND status IN ('active', 'overdue') \
         FOR UPDATE"
    ))
    .bind(loan_id)
    .bind(borrower_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| LoanError::LoanNotFound.into())
}

/// Mark an outstanding loan returned; a terminal loan is a conflict
pub async fn complete_return<'e, E: PgExecutor<'e>>(
    executor: E,
    loan_id: i32,
    returned_at: DateTime<Utc>,
) -> AppResult<Loan> {
    sqlx::query_as::<_, Loan>(concat!(
        r#"
        UPDATE loans SET status = $2, returned_at = $3
        WHERE id = $1 AND status IN ('active', 'overdue')
        RETURNING "#,
        loan_columns!()
    ))
    .bind(loan_id)
    .bind(LoanStatus::Returned)
    .bind(returned_at)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| LoanError::AlreadyReturned.into())
}

pub async fn list_for_borrower<'e, E: PgExecutor<'e>>(
    executor: E,
    borrower_id: i32,
) -> AppResult<Vec<LoanRecord>> {
    let records = sqlx::query_as::<_, LoanRecord>(concat!(
        loan_record_select!(),
        "WHERE l.borrower_id = $1 ORDER BY l.borrowed_at DESC"
    ))
    .bind(borrower_id)
    .fetch_all(executor)
    .await?;
    Ok(records)
}

pub async fn list_all<'e, E: PgExecutor<'e>>(executor: E) -> AppResult<Vec<LoanRecord>> {
    let records = sqlx::query_as::<_, LoanRecord>(concat!(
        loan_record_select!(),
        "ORDER BY l.borrowed_at DESC"
    ))
    .fetch_all(executor)
    .await?;
    Ok(records)
}

pub async fn list_overdue<'e, E: PgExecutor<'e>>(
    executor: E,
    now: DateTime<Utc>,
) -> AppResult<Vec<LoanRecord>> {
    let records = sqlx::query_as::<_, LoanRecord>(concat!(
        loan_record_select!(),
        "WHERE l.status IN ('active', 'overdue') AND l.due_at < $1 ORDER BY l.due_at ASC"
    ))
    .bind(now)
    .fetch_all(executor)
    .await?;
    Ok(records)
}

/// Overdue loans whose reminder gate is open at `now`
pub async fn list_overdue_missing_reminder<'e, E: PgExecutor<'e>>(
    executor: E,
    now: DateTime<Utc>,
    min_gap: chrono::Duration,
) -> AppResult<Vec<LoanRecord>> {
    let records = sqlx::query_as::<_, LoanRecord>(concat!(
        loan_record_select!(),
        r#"
        WHERE l.status IN ('active', 'overdue')
          AND l.due_at < $1
          AND (l.reminder_sent = FALSE OR l.last_reminder_at <= $2)
        ORDER BY l.due_at ASC
        "#
    ))
    .bind(now)
    .bind(now - min_gap)
    .fetch_all(executor)
    .await?;
    Ok(records)
}

pub async fn find_record<'e, E: PgExecutor<'e>>(executor: E, loan_id: i32) -> AppResult<LoanRecord> {
    sqlx::query_as::<_, LoanRecord>(concat!(loan_record_select!(), "WHERE l.id = $1"))
        .bind(loan_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| LoanError::LoanNotFound.into())
}

/// Flip active loans past due to overdue
pub async fn refresh_overdue<'e, E: PgExecutor<'e>>(
    executor: E,
    now: DateTime<Utc>,
    borrower_id: Option<i32>,
) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE loans SET status = 'overdue'
        WHERE status = 'active'
          AND due_at < $1
          AND ($2::INTEGER IS NULL OR borrower_id = $2)
        "#,
    )
    .bind(now)
    .bind(borrower_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn record_reminder<'e, E: PgExecutor<'e>>(
    executor: E,
    loan_id: i32,
    now: DateTime<Utc>,
) -> AppResult<Loan> {
    sqlx::query_as::<_, Loan>(concat!(
        r#"
        UPDATE loans SET
            reminder_count = reminder_count + 1,
            last_reminder_at = $2,
            reminder_sent = TRUE,
            status = 'overdue'
        WHERE id = $1 AND status IN ('active', 'overdue')
        RETURNING "#,
        loan_columns!()
    ))
    .bind(loan_id)
    .bind(now)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| LoanError::LoanNotFound.into())
}

pub async fn mark_reminder_sent<'e, E: PgExecutor<'e>>(
    executor: E,
    loan_id: i32,
    now: DateTime<Utc>,
) -> AppResult<()> {
    let result =
        sqlx::query("UPDATE loans SET reminder_sent = TRUE, last_reminder_at = $2 WHERE id = $1")
            .bind(loan_id)
            .bind(now)
            .execute(executor)
            .await?;

    if result.rows_affected() == 0 {
        return Err(LoanError::LoanNotFound.into());
    }
    Ok(())
}

/// Loan counters; outstanding loans are split by `now` against their due date
pub async fn statistics<'e, E: PgExecutor<'e>>(
    executor: E,
    now: DateTime<Utc>,
) -> AppResult<LoanStatistics> {
    let stats = sqlx::query_as::<_, LoanStatistics>(
        r#"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE status <> 'returned' AND due_at >= $1) AS active,
            COUNT(*) FILTER (WHERE status <> 'returned' AND due_at < $1) AS overdue,
            COUNT(*) FILTER (WHERE status = 'returned') AS returned
        FROM loans
        "#,
    )
    .bind(now)
    .fetch_one(executor)
    .await?;
    Ok(stats)
}
