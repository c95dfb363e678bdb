//! Loan lifecycle service.
//!
//! A loan starts active, becomes overdue once `now` passes its due date, and ends
//! returned. Borrow and return each run as a single unit of work on a detached task,
//! so a client that disconnects mid-request cannot leave a half-applied change.

use std::{cmp::Reverse, future::Future};

use chrono::{DateTime, Utc};

use crate::{
    dates,
    error::{AppError, AppResult, LoanError},
    models::loan::{
        AdminLoanDetails, BorrowReceipt, LoanDetails, LoanStatistics, LoanStatus, ReturnReceipt,
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
}

impl LoansService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Borrow a book for the fixed loan period
    pub async fn borrow(
        &self,
        book_id: i32,
        borrower_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<BorrowReceipt> {
        let repository = self.repository.clone();
        let receipt = run_detached(async move {
            repository
                .bounded("borrow", async {
                    let mut uow = repository.store().begin().await?;

                    uow.find_available_book(book_id).await?;
                    if uow.find_active_loan(book_id, borrower_id).await?.is_some() {
                        return Err(AppError::Loan(LoanError::AlreadyBorrowed));
                    }

                    let due_at = dates::due_date(now);
                    let loan = uow.create_loan(book_id, borrower_id, now, due_at).await?;
                    uow.mark_book_borrowed(book_id).await?;
                    uow.commit().await?;

                    Ok::<_, AppError>(BorrowReceipt {
                        loan_id: loan.id,
                        due_at: loan.due_at,
                        duration_days: dates::LOAN_DURATION_DAYS,
                    })
                })
                .await
        })
        .await?;

        tracing::info!(
            "Book {} borrowed by user {} (loan {}, due {})",
            book_id,
            borrower_id,
            receipt.loan_id,
            receipt.due_at
        );
        Ok(receipt)
    }

    /// Return a loan held by `borrower_id`
    pub async fn return_loan(
        &self,
        loan_id: i32,
        borrower_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<ReturnReceipt> {
        let repository = self.repository.clone();
        let receipt = run_detached(async move {
            repository
                .bounded("return", async {
                    let mut uow = repository.store().begin().await?;

                    let loan = uow.find_loan_owned_by(loan_id, borrower_id).await?;
                    let book = uow.find_book(loan.book_id).await?;
                    uow.complete_return(loan.id, now).await?;
                    uow.mark_book_available(loan.book_id).await?;
                    uow.commit().await?;

                    Ok::<_, AppError>(ReturnReceipt {
                        loan_id: loan.id,
                        book_id: book.id,
                        book_title: book.title,
                    })
                })
                .await
        })
        .await?;

        tracing::info!("Loan {} returned by user {}", loan_id, borrower_id);
        Ok(receipt)
    }

    /// Loans of one borrower: outstanding first, then newest borrow first
    pub async fn list_for_borrower(
        &self,
        borrower_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<LoanDetails>> {
        self.refresh_best_effort(now, Some(borrower_id)).await;

        let records = self
            .repository
            .bounded(
                "list_loans_for_borrower",
                self.repository.store().list_loans_for_borrower(borrower_id),
            )
            .await?;

        let mut loans: Vec<LoanDetails> = records
            .into_iter()
            .map(|record| LoanDetails::project(record, now))
            .collect();
        loans.sort_by_key(|loan| (!loan.status.is_outstanding(), Reverse(loan.borrowed_at)));
        Ok(loans)
    }

    /// Every loan with borrower details: overdue, active, returned, then newest first
    pub async fn list_all(&self, now: DateTime<Utc>) -> AppResult<Vec<AdminLoanDetails>> {
        self.refresh_best_effort(now, None).await;

        let records = self
            .repository
            .bounded("list_all_loans", self.repository.store().list_all_loans())
            .await?;

        let mut loans: Vec<AdminLoanDetails> = records
            .into_iter()
            .map(|record| AdminLoanDetails::project(record, now))
            .collect();
        loans.sort_by_key(|loan| (admin_rank(loan.status), Reverse(loan.borrowed_at)));
        Ok(loans)
    }

    /// Outstanding loans past due, most days overdue first
    pub async fn list_overdue(&self, now: DateTime<Utc>) -> AppResult<Vec<AdminLoanDetails>> {
        self.refresh_best_effort(now, None).await;

        let records = self
            .repository
            .bounded("list_overdue_loans", self.repository.store().list_overdue_loans(now))
            .await?;

        let mut loans: Vec<AdminLoanDetails> = records
            .into_iter()
            .map(|record| AdminLoanDetails::project(record, now))
            .collect();
        loans.sort_by_key(|loan| Reverse(loan.days_overdue));
        Ok(loans)
    }

    /// Flag a loan as reminded without sending anything. The sweep skips it
    /// until the resend gap has passed.
    pub async fn mark_reminder_sent(&self, loan_id: i32, now: DateTime<Utc>) -> AppResult<()> {
        self.repository
            .bounded(
                "mark_reminder_sent",
                self.repository.store().mark_reminder_sent(loan_id, now),
            )
            .await
    }

    pub async fn statistics(&self, now: DateTime<Utc>) -> AppResult<LoanStatistics> {
        self.repository
            .bounded("loan_statistics", self.repository.store().loan_statistics(now))
            .await
    }

    /// Flip active loans past due to overdue. Reads project the effective status
    /// anyway, so a failure here only delays the stored flip.
    async fn refresh_best_effort(&self, now: DateTime<Utc>, borrower_id: Option<i32>) {
        let refreshed = self
            .repository
            .bounded(
                "refresh_overdue",
                self.repository.store().refresh_overdue(now, borrower_id),
            )
            .await;

        match refreshed {
            Ok(0) => {}
            Ok(count) => tracing::debug!("{} loan(s) marked overdue", count),
            Err(e) => tracing::warn!("Failed to refresh overdue loans: {}", e),
        }
    }
}

fn admin_rank(status: LoanStatus) -> u8 {
    match status {
        LoanStatus::Overdue => 0,
        LoanStatus::Active => 1,
        LoanStatus::Returned => 2,
    }
}

/// Run a state change on its own task so dropping the caller cannot cancel it
async fn run_detached<T, F>(fut: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|e| AppError::Internal(format!("Loan task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{book::BookStatus, book::CreateBook, user::Role},
        repository::{InMemoryStore, LoanStore},
    };
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    struct Fixture {
        store: InMemoryStore,
        service: LoansService,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let repository = Repository::new(Arc::new(store.clone()), std::time::Duration::from_secs(5));
        Fixture {
            store,
            service: LoansService::new(repository),
        }
    }

    async fn add_book(store: &InMemoryStore, title: &str) -> i32 {
        store
            .create_book(&CreateBook {
                title: title.to_string(),
                author: "Jules Verne".to_string(),
                isbn: None,
                description: None,
                publication_date: None,
                cover_url: None,
            })
            .await
            .unwrap()
            .id
    }

    async fn add_member(store: &InMemoryStore, email: &str) -> i32 {
        store
            .insert_borrower("Marc", "Lord", email, "", Role::Member)
            .await
            .id
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
    }

    /// BORROWED iff exactly one outstanding loan references the book
    async fn assert_book_consistent(store: &InMemoryStore, book_id: i32) {
        let outstanding = store
            .loans()
            .await
            .into_iter()
            .filter(|loan| loan.book_id == book_id && loan.status.is_outstanding())
            .count();
        let status = store.get_book(book_id).await.unwrap().status;
        assert!(outstanding <= 1);
        assert_eq!(status == BookStatus::Borrowed, outstanding == 1);
    }

    #[tokio::test]
    async fn test_borrow_sets_thirty_day_due_date() {
        let f = fixture();
        let book = add_book(&f.store, "Vingt mille lieues sous les mers").await;
        let member = add_member(&f.store, "marc@lord.com").await;

        let receipt = f.service.borrow(book, member, t0()).await.unwrap();
        assert_eq!(receipt.duration_days, 30);
        assert_eq!(receipt.due_at - t0(), Duration::days(30));
        assert_book_consistent(&f.store, book).await;
        assert_eq!(f.store.get_book(book).await.unwrap().status, BookStatus::Borrowed);
    }

    #[tokio::test]
    async fn test_borrow_unavailable_or_missing_book() {
        let f = fixture();
        let book = add_book(&f.store, "Le Tour du monde en quatre-vingts jours").await;
        let first = add_member(&f.store, "marc@lord.com").await;
        let second = add_member(&f.store, "john@smith.com").await;

        f.service.borrow(book, first, t0()).await.unwrap();
        let err = f.service.borrow(book, second, t0()).await.unwrap_err();
        assert!(matches!(err, AppError::Loan(LoanError::BookUnavailable)));

        let err = f.service.borrow(999, second, t0()).await.unwrap_err();
        assert!(matches!(err, AppError::Loan(LoanError::BookUnavailable)));
        assert_eq!(f.store.loans().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_borrows_create_one_loan() {
        let f = fixture();
        let book = add_book(&f.store, "Michel Strogoff").await;
        let mut members = Vec::new();
        for i in 0..8 {
            members.push(add_member(&f.store, &format!("member{}@example.com", i)).await);
        }

        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                let service = f.service.clone();
                tokio::spawn(async move { service.borrow(book, member, t0()).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert!(matches!(e, AppError::Loan(LoanError::BookUnavailable))),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(f.store.loans().await.len(), 1);
        assert_book_consistent(&f.store, book).await;
    }

    #[tokio::test]
    async fn test_return_twice_is_not_found() {
        let f = fixture();
        let book = add_book(&f.store, "L'Île mystérieuse").await;
        let member = add_member(&f.store, "marc@lord.com").await;
        let receipt = f.service.borrow(book, member, t0()).await.unwrap();

        let returned = f
            .service
            .return_loan(receipt.loan_id, member, t0() + Duration::days(2))
            .await
            .unwrap();
        assert_eq!(returned.book_title, "L'Île mystérieuse");
        assert_book_consistent(&f.store, book).await;

        let err = f
            .service
            .return_loan(receipt.loan_id, member, t0() + Duration::days(3))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Loan(LoanError::LoanNotFound)));
    }

    #[tokio::test]
    async fn test_return_by_someone_else_is_not_found() {
        let f = fixture();
        let book = add_book(&f.store, "Cinq semaines en ballon").await;
        let owner = add_member(&f.store, "marc@lord.com").await;
        let other = add_member(&f.store, "john@smith.com").await;
        let receipt = f.service.borrow(book, owner, t0()).await.unwrap();

        let err = f.service.return_loan(receipt.loan_id, other, t0()).await.unwrap_err();
        assert!(matches!(err, AppError::Loan(LoanError::LoanNotFound)));
        assert_eq!(f.store.get_book(book).await.unwrap().status, BookStatus::Borrowed);
    }

    #[tokio::test]
    async fn test_overdue_lifecycle_scenario() {
        let f = fixture();
        let book = add_book(&f.store, "De la Terre à la Lune").await;
        let member = add_member(&f.store, "marc@lord.com").await;
        let receipt = f.service.borrow(book, member, t0()).await.unwrap();

        let loans = f
            .service
            .list_for_borrower(member, t0() + Duration::days(31))
            .await
            .unwrap();
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].status, LoanStatus::Overdue);
        assert_eq!(loans[0].days_remaining, -1);
        assert_eq!(loans[0].days_overdue, 1);
        // the listing persisted the flip
        assert_eq!(f.store.loans().await[0].status, LoanStatus::Overdue);

        f.service
            .return_loan(receipt.loan_id, member, t0() + Duration::days(32))
            .await
            .unwrap();
        assert_eq!(f.store.get_book(book).await.unwrap().status, BookStatus::Available);

        let loans = f
            .service
            .list_for_borrower(member, t0() + Duration::days(32))
            .await
            .unwrap();
        assert_eq!(loans[0].status, LoanStatus::Returned);
        assert_eq!(loans[0].returned_at, Some(t0() + Duration::days(32)));

        let err = f
            .service
            .return_loan(receipt.loan_id, member, t0() + Duration::days(33))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Loan(LoanError::LoanNotFound)));
    }

    #[tokio::test]
    async fn test_due_today_is_not_overdue() {
        let f = fixture();
        let book = add_book(&f.store, "Le Château des Carpathes").await;
        let member = add_member(&f.store, "marc@lord.com").await;
        let receipt = f.service.borrow(book, member, t0()).await.unwrap();

        let loans = f.service.list_for_borrower(member, receipt.due_at).await.unwrap();
        assert_eq!(loans[0].status, LoanStatus::Active);
        assert_eq!(loans[0].days_remaining, 0);

        let later = receipt.due_at + Duration::seconds(1);
        let loans = f.service.list_for_borrower(member, later).await.unwrap();
        assert_eq!(loans[0].status, LoanStatus::Overdue);
    }

    #[tokio::test]
    async fn test_listing_orders() {
        let f = fixture();
        let member = add_member(&f.store, "marc@lord.com").await;
        let old = add_book(&f.store, "Old").await;
        let returned = add_book(&f.store, "Returned").await;
        let recent = add_book(&f.store, "Recent").await;

        f.service.borrow(old, member, t0()).await.unwrap();
        let r = f
            .service
            .borrow(returned, member, t0() + Duration::days(20))
            .await
            .unwrap();
        f.service
            .return_loan(r.loan_id, member, t0() + Duration::days(21))
            .await
            .unwrap();
        f.service
            .borrow(recent, member, t0() + Duration::days(25))
            .await
            .unwrap();

        let now = t0() + Duration::days(35);
        let mine = f.service.list_for_borrower(member, now).await.unwrap();
        let titles: Vec<_> = mine.iter().map(|l| l.book_title.as_str()).collect();
        assert_eq!(titles, vec!["Recent", "Old", "Returned"]);

        let all = f.service.list_all(now).await.unwrap();
        let titles: Vec<_> = all.iter().map(|l| l.book_title.as_str()).collect();
        assert_eq!(titles, vec!["Old", "Recent", "Returned"]);
        assert!(all.iter().all(|l| l.borrower_email == "marc@lord.com"));

        let overdue = f.service.list_overdue(now).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].book_title, "Old");
    }

    #[tokio::test]
    async fn test_statistics_classify_by_now() {
        let f = fixture();
        let member = add_member(&f.store, "marc@lord.com").await;
        let a = add_book(&f.store, "A").await;
        let b = add_book(&f.store, "B").await;
        let c = add_book(&f.store, "C").await;

        f.service.borrow(a, member, t0()).await.unwrap();
        f.service.borrow(b, member, t0() + Duration::days(10)).await.unwrap();
        let r = f.service.borrow(c, member, t0()).await.unwrap();
        f.service.return_loan(r.loan_id, member, t0()).await.unwrap();

        let stats = f.service.statistics(t0() + Duration::days(31)).await.unwrap();
        assert_eq!(
            stats,
            LoanStatistics {
                total: 3,
                active: 1,
                overdue: 1,
                returned: 1
            }
        );
        // no mutation
        assert!(f
            .store
            .loans()
            .await
            .iter()
            .all(|loan| loan.status != LoanStatus::Overdue));
    }

    #[tokio::test]
    async fn test_mark_reminder_sent() {
        let f = fixture();
        let book = add_book(&f.store, "A").await;
        let member = add_member(&f.store, "marc@lord.com").await;
        let receipt = f.service.borrow(book, member, t0()).await.unwrap();

        let marked_at = t0() + Duration::days(31);
        f.service.mark_reminder_sent(receipt.loan_id, marked_at).await.unwrap();
        let loan = f.store.loans().await.remove(0);
        assert!(loan.reminder_sent);
        assert_eq!(loan.reminder_count, 0);
        assert_eq!(loan.last_reminder_at, Some(marked_at));

        let err = f.service.mark_reminder_sent(404, marked_at).await.unwrap_err();
        assert!(matches!(err, AppError::Loan(LoanError::LoanNotFound)));
    }
}
