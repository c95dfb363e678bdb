//! In-memory storage client.
//!
//! Holds all rows behind one async mutex. A unit of work owns the lock for its
//! whole lifetime and edits a private copy of the state, which replaces the shared
//! state on commit; dropping it discards the copy. Units of work are therefore
//! serialized, which gives the same guarantees as the PostgreSQL row locks.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LoanStore, UnitOfWork};
use crate::{
    error::{AppError, AppResult, LoanError},
    models::{
        book::{Book, BookStatus, CatalogCounts, CreateBook, UpdateBook},
        loan::{Loan, LoanRecord, LoanStatistics, LoanStatus},
        user::{Borrower, Role},
    },
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    books: BTreeMap<i32, Book>,
    loans: BTreeMap<i32, Loan>,
    borrowers: BTreeMap<i32, Borrower>,
    last_book_id: i32,
    last_loan_id: i32,
    last_borrower_id: i32,
}

impl MemoryState {
    fn book(&self, book_id: i32) -> AppResult<&Book> {
        self.books
            .get(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))
    }

    fn set_book_status(&mut self, book_id: i32, status: BookStatus) -> AppResult<()> {
        let book = self
            .books
            .get_mut(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        book.status = status;
        book.updated_at = Utc::now();
        Ok(())
    }

    fn record(&self, loan: &Loan) -> AppResult<LoanRecord> {
        let book = self.book(loan.book_id)?;
        let borrower = self.borrowers.get(&loan.borrower_id).ok_or_else(|| {
            AppError::NotFound(format!("Borrower with id {} not found", loan.borrower_id))
        })?;

        Ok(LoanRecord {
            loan: loan.clone(),
            book_title: book.title.clone(),
            book_author: book.author.clone(),
            book_cover_url: book.cover_url.clone(),
            borrower_firstname: borrower.firstname.clone(),
            borrower_lastname: borrower.lastname.clone(),
            borrower_email: borrower.email.clone(),
        })
    }

    fn records<'a>(&self, loans: impl Iterator<Item = &'a Loan>) -> AppResult<Vec<LoanRecord>> {
        let mut records = loans
            .map(|loan| self.record(loan))
            .collect::<AppResult<Vec<_>>>()?;
        records.sort_by(|a, b| b.loan.borrowed_at.cmp(&a.loan.borrowed_at));
        Ok(records)
    }

    fn outstanding_loan_mut(&mut self, loan_id: i32) -> AppResult<&mut Loan> {
        self.loans
            .get_mut(&loan_id)
            .filter(|loan| loan.status.is_outstanding())
            .ok_or_else(|| LoanError::LoanNotFound.into())
    }
}

/// Storage client keeping every row in process memory
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a borrower (identity is managed outside the loan engine)
    pub async fn insert_borrower(
        &self,
        firstname: &str,
        lastname: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Borrower {
        let mut state = self.state.lock().await;
        state.last_borrower_id += 1;
        let borrower = Borrower {
            id: state.last_borrower_id,
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role,
        };
        state.borrowers.insert(borrower.id, borrower.clone());
        borrower
    }

    /// Every loan currently stored, in id order
    pub async fn loans(&self) -> Vec<Loan> {
        self.state.lock().await.loans.values().cloned().collect()
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_available_book(&mut self, book_id: i32) -> AppResult<Book> {
        self.working
            .books
            .get(&book_id)
            .filter(|book| book.status == BookStatus::Available)
            .cloned()
            .ok_or_else(|| LoanError::BookUnavailable.into())
    }

    async fn find_book(&mut self, book_id: i32) -> AppResult<Book> {
        self.working.book(book_id).cloned()
    }

    async fn find_active_loan(&mut self, book_id: i32, borrower_id: i32) -> AppResult<Option<Loan>> {
        Ok(self
            .working
            .loans
            .values()
            .find(|loan| {
                loan.book_id == book_id
                    && loan.borrower_id == borrower_id
                    && loan.status.is_outstanding()
            })
            .cloned())
    }

    async fn create_loan(
        &mut self,
        book_id: i32,
        borrower_id: i32,
        borrowed_at: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> AppResult<Loan> {
        let state = &mut self.working;
        state.book(book_id)?;
        if !state.borrowers.contains_key(&borrower_id) {
            return Err(AppError::NotFound(format!(
                "Borrower with id {} not found",
                borrower_id
            )));
        }
        // Mirrors the partial unique index on outstanding loans
        if state
            .loans
            .values()
            .any(|loan| loan.book_id == book_id && loan.status.is_outstanding())
        {
            return Err(LoanError::BookUnavailable.into());
        }

        state.last_loan_id += 1;
        let loan = Loan {
            id: state.last_loan_id,
            book_id,
            borrower_id,
            borrowed_at,
            due_at,
            returned_at: None,
            status: LoanStatus::Active,
            reminder_sent: false,
            reminder_count: 0,
            last_reminder_at: None,
        };
        state.loans.insert(loan.id, loan.clone());
        Ok(loan)
    }

    async fn mark_book_borrowed(&mut self, book_id: i32) -> AppResult<()> {
        self.working.set_book_status(book_id, BookStatus::Borrowed)
    }

    async fn mark_book_available(&mut self, book_id: i32) -> AppResult<()> {
        self.working.set_book_status(book_id, BookStatus::Available)
    }

    async fn find_loan_owned_by(&mut self, loan_id: i32, borrower_id: i32) -> AppResult<Loan> {
        self.working
            .loans
            .get(&loan_id)
            .filter(|loan| loan.borrower_id == borrower_id && loan.status.is_outstanding())
            .cloned()
            .ok_or_else(|| LoanError::LoanNotFound.into())
    }

    async fn complete_return(&mut self, loan_id: i32, returned_at: DateTime<Utc>) -> AppResult<Loan> {
        let loan = self
            .working
            .loans
            .get_mut(&loan_id)
            .ok_or(AppError::Loan(LoanError::LoanNotFound))?;
        if !loan.status.is_outstanding() {
            return Err(LoanError::AlreadyReturned.into());
        }
        loan.status = LoanStatus::Returned;
        loan.returned_at = Some(returned_at);
        Ok(loan.clone())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl LoanStore for InMemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn list_loans_for_borrower(&self, borrower_id: i32) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.lock().await;
        state.records(state.loans.values().filter(|loan| loan.borrower_id == borrower_id))
    }

    async fn list_all_loans(&self) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.lock().await;
        state.records(state.loans.values())
    }

    async fn list_overdue_loans(&self, now: DateTime<Utc>) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.lock().await;
        state.records(state.loans.values().filter(|loan| loan.is_overdue(now)))
    }

    async fn list_overdue_loans_missing_reminder(
        &self,
        now: DateTime<Utc>,
        min_gap: chrono::Duration,
    ) -> AppResult<Vec<LoanRecord>> {
        let state = self.state.lock().await;
        state.records(
            state
                .loans
                .values()
                .filter(|loan| loan.is_overdue(now) && loan.awaits_reminder(now, min_gap)),
        )
    }

    async fn find_loan(&self, loan_id: i32) -> AppResult<LoanRecord> {
        let state = self.state.lock().await;
        let loan = state.loans.get(&loan_id).ok_or(AppError::Loan(LoanError::LoanNotFound))?;
        state.record(loan)
    }

    async fn refresh_overdue(&self, now: DateTime<Utc>, borrower_id: Option<i32>) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let mut flipped = 0;
        for loan in state.loans.values_mut() {
            let in_scope = borrower_id.map_or(true, |id| loan.borrower_id == id);
            if in_scope && loan.status == LoanStatus::Active && loan.is_overdue(now) {
                loan.status = LoanStatus::Overdue;
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn record_reminder(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<Loan> {
        let mut state = self.state.lock().await;
        let loan = state.outstanding_loan_mut(loan_id)?;
        loan.reminder_count += 1;
        loan.last_reminder_at = Some(now);
        loan.reminder_sent = true;
        loan.status = LoanStatus::Overdue;
        Ok(loan.clone())
    }

    async fn mark_reminder_sent(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let loan = state
            .loans
            .get_mut(&loan_id)
            .ok_or(AppError::Loan(LoanError::LoanNotFound))?;
        loan.reminder_sent = true;
        loan.last_reminder_at = Some(now);
        Ok(())
    }

    async fn loan_statistics(&self, now: DateTime<Utc>) -> AppResult<LoanStatistics> {
        let state = self.state.lock().await;
        let mut stats = LoanStatistics::default();
        for loan in state.loans.values() {
            stats.total += 1;
            if !loan.status.is_outstanding() {
                stats.returned += 1;
            } else if loan.is_overdue(now) {
                stats.overdue += 1;
            } else {
                stats.active += 1;
            }
        }
        Ok(stats)
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        let state = self.state.lock().await;
        let mut books: Vec<Book> = state.books.values().cloned().collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn get_book(&self, book_id: i32) -> AppResult<Book> {
        self.state.lock().await.book(book_id).cloned()
    }

    async fn create_book(&self, book: &CreateBook) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        state.last_book_id += 1;
        let now = Utc::now();
        let created = Book {
            id: state.last_book_id,
            title: book.title.clone(),
            author: book.author.clone(),
            isbn: book.isbn.clone(),
            description: book.description.clone(),
            publication_date: book.publication_date,
            cover_url: book.cover_url.clone(),
            status: BookStatus::Available,
            created_at: now,
            updated_at: now,
        };
        state.books.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_book(&self, book_id: i32, update: &UpdateBook) -> AppResult<Book> {
        let mut state = self.state.lock().await;
        let book = state
            .books
            .get_mut(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        update.apply_to(book);
        book.updated_at = Utc::now();
        Ok(book.clone())
    }

    async fn delete_book(&self, book_id: i32) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.book(book_id)?;
        if state
            .loans
            .values()
            .any(|loan| loan.book_id == book_id && loan.status.is_outstanding())
        {
            return Err(AppError::Conflict(format!(
                "Book with id {} is currently borrowed",
                book_id
            )));
        }
        state.books.remove(&book_id);
        state.loans.retain(|_, loan| loan.book_id != book_id);
        Ok(())
    }

    async fn catalog_counts(&self) -> AppResult<CatalogCounts> {
        let state = self.state.lock().await;
        Ok(CatalogCounts {
            total_books: state.books.len() as i64,
            total_users: state.borrowers.len() as i64,
        })
    }

    async fn find_borrower_by_email(&self, email: &str) -> AppResult<Option<Borrower>> {
        let state = self.state.lock().await;
        Ok(state
            .borrowers
            .values()
            .find(|b| b.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn close(&self) {}
}
