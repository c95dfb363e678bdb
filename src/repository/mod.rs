//! Repository layer: storage boundary for books, loans and borrowers.
//!
//! Multi-row state changes (borrow, return) go through a [`UnitOfWork`]: every
//! read and write issued on it belongs to one atomic transaction that either
//! commits or is rolled back when dropped.

pub mod books;
pub mod loans;
pub mod memory;
pub mod postgres;

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{Book, CatalogCounts, CreateBook, UpdateBook},
        loan::{Loan, LoanRecord, LoanStatistics},
        user::Borrower,
    },
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// One atomic transaction over books and loans
#[async_trait]
pub trait UnitOfWork: Send {
    /// Book by id, only if it is currently available
    async fn find_available_book(&mut self, book_id: i32) -> AppResult<Book>;

    async fn find_book(&mut self, book_id: i32) -> AppResult<Book>;

    /// Outstanding loan of `book_id` held by `borrower_id`, if any
    async fn find_active_loan(&mut self, book_id: i32, borrower_id: i32) -> AppResult<Option<Loan>>;

    /// Insert an active loan. Leaves the book untouched.
    async fn create_loan(
        &mut self,
        book_id: i32,
        borrower_id: i32,
        borrowed_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<Loan>;

    async fn mark_book_borrowed(&mut self, book_id: i32) -> AppResult<()>;

    async fn mark_book_available(&mut self, book_id: i32) -> AppResult<()>;

    /// Outstanding loan with this id owned by `borrower_id`
    async fn find_loan_owned_by(&mut self, loan_id: i32, borrower_id: i32) -> AppResult<Loan>;

    /// Move an outstanding loan to returned
    async fn complete_return(&mut self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Loan>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Storage client shared by the services
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>>;

    // Loans

    async fn list_loans_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<LoanRecord>>;

    async fn list_all_loans(&self) -> AppResult<Vec<LoanRecord>>;

    /// Outstanding loans strictly past due at `now`
    async fn list_overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>>;

    /// Overdue loans that were never reminded, or last reminded at least `min_gap` ago
    async fn list_overdue_loans_missing_reminder(
        &self,
        now: DateTime<Utc>,
        min_gap: chrono::Duration,
    ) -> AppResult<Vec<LoanRecord>>;

    async fn find_loan(&self, loan_id: i32) -> AppResult<LoanRecord>;

    /// Flip every active loan past due at `now` to overdue, optionally for one
    /// borrower only. Returns the number of loans flipped.
    async fn refresh_overdue(&self, now: DateTime<Utc>, borrower_id: Option<i32>) -> AppResult<u64>;

    /// Count a delivered reminder on an outstanding loan and force it overdue
    async fn record_reminder(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<Loan>;

    /// Set the reminder flag without counting a delivery. Stamps `now` as the
    /// last reminder so the sweep holds off for the resend gap.
    async fn mark_reminder_sent(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<()>;

    async fn loan_statistics(&self, now: DateTime<Utc>) -> AppResult<LoanStatistics>;

    // Catalog

    async fn list_books(&self) -> AppResult<Vec<Book>>;

    async fn get_book(&self, book_id: i32) -> AppResult<Book>;

    async fn create_book(&self, book: &CreateBook) -> AppResult<Book>;

    async fn update_book(&self, book_id: i32, update: &UpdateBook) -> AppResult<Book>;

    /// Delete a book that is not out on loan
    async fn delete_book(&self, book_id: i32) -> AppResult<()>;

    /// Number of books and registered users
    async fn catalog_counts(&self) -> AppResult<CatalogCounts>;

    // Borrowers

    async fn find_borrower_by_email(&self, email: &str) -> AppResult<Option<Borrower>>;

    /// Connectivity check
    async fn ping(&self) -> AppResult<()>;

    async fn close(&self);
}

/// Main repository handle: a storage client plus the bound applied to every call
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn LoanStore>,
    operation_timeout: Duration,
}

impl Repository {
    pub fn new(store: Arc<dyn LoanStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            operation_timeout,
        }
    }

    pub fn store(&self) -> &dyn LoanStore {
        self.store.as_ref()
    }

    /// Run a storage operation, failing with `AppError::Storage` once the
    /// operation timeout elapses. A unit of work cut short is rolled back.
    pub async fn bounded<T, F>(&self, operation: &str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Storage operation '{}' timed out after {:?}",
                    operation,
                    self.operation_timeout
                );
                Err(AppError::Storage(format!("{} timed out", operation)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository(timeout: Duration) -> Repository {
        Repository::new(Arc::new(InMemoryStore::new()), timeout)
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let repo = repository(Duration::from_secs(1));
        let value = repo.bounded("ping", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_bounded_times_out_as_storage_error() {
        let repo = repository(Duration::from_millis(10));
        let err = repo
            .bounded("stuck", std::future::pending::<AppResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
