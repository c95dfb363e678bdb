//! PostgreSQL storage client

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    Pool, Postgres, Transaction,
};

use super::{books, loans, LoanStore, UnitOfWork};
use crate::{
    config::DatabaseConfig,
    error::{AppError, AppResult},
    models::{
        book::{Book, BookStatus, CatalogCounts, CreateBook, UpdateBook},
        loan::{Loan, LoanRecord, LoanStatistics},
        user::Borrower,
    },
};

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Open the connection pool with bounded acquire and statement timeouts
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let options = PgConnectOptions::from_str(&config.url)?.options([(
            "statement_timeout",
            format!("{}s", config.statement_timeout_secs),
        )]);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to run migrations: {}", e)))
    }
}

/// A PostgreSQL transaction; dropping it without `commit` rolls back
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_available_book(&mut self, book_id: i32) -> AppResult<Book> {
        books::lock_available(&mut *self.tx, book_id).await
    }

    async fn find_book(&mut self, book_id: i32) -> AppResult<Book> {
        books::find_by_id(&mut *self.tx, book_id).await
    }

    async fn find_active_loan(&mut self, book_id: i32, borrower_id: i32) -> AppResult<Option<Loan>> {
        loans::find_outstanding(&mut *self.tx, book_id, borrower_id).await
    }

    async fn create_loan(
        &mut self,
        book_id: i32,
        borrower_id: i32,
        borrowed_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<Loan> {
        loans::insert(&mut *self.tx, book_id, borrower_id, borrowed_at, due_at).await
    }

    async fn mark_book_borrowed(&mut self, book_id: i32) -> AppResult<()> {
        books::set_status(&mut *self.tx, book_id, BookStatus::Borrowed).await
    }

    async fn mark_book_available(&mut self, book_id: i32) -> AppResult<()> {
        books::set_status(&mut *self.tx, book_id, BookStatus::Available).await
    }

    async fn find_loan_owned_by(&mut self, loan_id: i32, borrower_id: i32) -> AppResult<Loan> {
        loans::lock_owned_outstanding(&mut *self.tx, loan_id, borrower_id).await
    }

    async fn complete_return(&mut self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Loan> {
        loans::complete_return(&mut *self.tx, loan_id, returned_at).await
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LoanStore for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn list_loans_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<LoanRecord>> {
        loans::list_for_borrower(&self.pool, borrower_id).await
    }

    async fn list_all_loans(&self) -> AppResult<Vec<LoanRecord>> {
        loans::list_all(&self.pool).await
    }

    async fn list_overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>> {
        loans::list_overdue(&self.pool, now).await
    }

    async fn list_overdue_loans_missing_reminder(
        &self,
        now: DateTime<Utc>,
        min_gap: chrono::Duration,
    ) -> AppResult<Vec<LoanRecord>> {
        loans::list_overdue_missing_reminder(&self.pool, now, min_gap).await
    }

    async fn find_loan(&self, loan_id: i32) -> AppResult<LoanRecord> {
        loans::find_record(&self.pool, loan_id).await
    }

    async fn refresh_overdue(&self, now: DateTime<Utc>, borrower_id: Option<i32>) -> AppResult<u64> {
        loans::refresh_overdue(&self.pool, now, borrower_id).await
    }

    async fn record_reminder(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<Loan> {
        loans::record_reminder(&self.pool, loan_id, now).await
    }

    async fn mark_reminder_sent(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<()> {
        loans::mark_reminder_sent(&self.pool, loan_id, now).await
    }

    async fn loan_statistics(&self, now: DateTime<Utc>) -> AppResult<LoanStatistics> {
        loans::statistics(&self.pool, now).await
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        books::list(&self.pool).await
    }

    async fn get_book(&self, book_id: i32) -> AppResult<Book> {
        books::find_by_id(&self.pool, book_id).await
    }

    async fn create_book(&self, book: &CreateBook) -> AppResult<Book> {
        books::create(&self.pool, book).await
    }

    async fn update_book(&self, book_id: i32, update: &UpdateBook) -> AppResult<Book> {
        books::update(&self.pool, book_id, update).await
    }

    async fn delete_book(&self, book_id: i32) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        books::find_by_id(&mut *tx, book_id).await?;
        if !books::delete_if_not_borrowed(&mut *tx, book_id).await? {
            return Err(AppError::Conflict(format!(
                "Book with id {} is currently borrowed",
                book_id
            )));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn catalog_counts(&self) -> AppResult<CatalogCounts> {
        books::counts(&self.pool).await
    }

    async fn find_borrower_by_email(&self, email: &str) -> AppResult<Option<Borrower>> {
        let borrower = sqlx::query_as::<_, Borrower>(
            "SELECT id, firstname, lastname, email, password_hash, role FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(borrower)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
