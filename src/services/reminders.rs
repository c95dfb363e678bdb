//! Overdue reminders: the periodic sweep and the manual admin reminder

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{AppError, AppResult, LoanError},
    services::email::{reminder_email, NotificationSender, ReminderPayload},
    repository::Repository,
};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Outcome of a manual reminder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderReceipt {
    pub loan_id: i32,
    pub email: String,
    pub reminder_count: i32,
}

#[derive(Clone)]
pub struct RemindersService {
    repository: Repository,
    sender: Arc<dyn NotificationSender>,
    client_url: String,
    resend_after: chrono::Duration,
}

impl RemindersService {
    pub fn new(
        repository: Repository,
        sender: Arc<dyn NotificationSender>,
        client_url: String,
        resend_after_days: i64,
    ) -> Self {
        Self {
            repository,
            sender,
            client_url,
            resend_after: chrono::Duration::days(resend_after_days),
        }
    }

    /// Remind every overdue loan whose reminder gate is open.
    ///
    /// A loan is only updated after its email was accepted; a failed delivery leaves
    /// it untouched so the next sweep picks it up again.
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        tracing::info!("Checking overdue loans at {}", now);

        let candidates = self
            .repository
            .bounded(
                "list_overdue_loans_missing_reminder",
                self.repository
                    .store()
                    .list_overdue_loans_missing_reminder(now, self.resend_after),
            )
            .await?;

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        if candidates.is_empty() {
            tracing::info!("No overdue loan awaiting a reminder");
            return Ok(report);
        }

        tracing::info!("{} reminder(s) to send", candidates.len());

        for record in candidates {
            let payload = ReminderPayload::from_record(&record, now);
            let (subject, html) = reminder_email(&payload, &self.client_url, false);

            let receipt = match self.sender.send(&payload.email, &subject, &html).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    tracing::warn!(
                        "Reminder for loan {} to {} failed, will retry next sweep: {}",
                        payload.loan_id,
                        payload.email,
                        e
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let recorded = self
                .repository
                .bounded(
                    "record_reminder",
                    self.repository.store().record_reminder(payload.loan_id, now),
                )
                .await;

            match recorded {
                Ok(_) => {
                    tracing::info!(
                        "Reminder {} sent to {} for \"{}\"",
                        receipt.message_id,
                        payload.email,
                        payload.book_title
                    );
                    report.sent += 1;
                }
                Err(e) => {
                    // Delivered but not recorded: the borrower may get it again
                    tracing::error!(
                        "Reminder {} for loan {} was sent but not recorded: {}",
                        receipt.message_id,
                        payload.loan_id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Reminder sweep done: {} sent, {} failed",
            report.sent,
            report.failed
        );
        Ok(report)
    }

    /// Send a reminder for one overdue loan right away, ignoring the resend gap
    pub async fn send_manual_reminder(
        &self,
        loan_id: i32,
        now: DateTime<Utc>,
    ) -> AppResult<ReminderReceipt> {
        let record = self
            .repository
            .bounded("find_loan", self.repository.store().find_loan(loan_id))
            .await?;

        if !record.loan.is_overdue(now) {
            return Err(LoanError::NotOverdue.into());
        }

        let payload = ReminderPayload::from_record(&record, now);
        let (subject, html) = reminder_email(&payload, &self.client_url, true);

        self.sender
            .send(&payload.email, &subject, &html)
            .await
            .map_err(|e| match e {
                AppError::Notification(_) => e,
                other => AppError::Notification(other.to_string()),
            })?;

        let loan = self
            .repository
            .bounded(
                "record_reminder",
                self.repository.store().record_reminder(loan_id, now),
            )
            .await?;

        tracing::info!(
            "Manual reminder #{} sent to {} for loan {}",
            loan.reminder_count,
            payload.email,
            loan_id
        );

        Ok(ReminderReceipt {
            loan_id,
            email: payload.email,
            reminder_count: loan.reminder_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{book::CreateBook, loan::LoanStatus, user::Role},
        repository::{InMemoryStore, LoanStore},
        services::{
            email::{DeliveryReceipt, MockNotificationSender},
            loans::LoansService,
        },
    };
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn delivered() -> AppResult<DeliveryReceipt> {
        Ok(DeliveryReceipt {
            message_id: "<1@test>".to_string(),
        })
    }

    struct Fixture {
        store: InMemoryStore,
        loans: LoansService,
        repository: Repository,
    }

    impl Fixture {
        fn reminders(&self, sender: MockNotificationSender) -> RemindersService {
            RemindersService::new(
                self.repository.clone(),
                Arc::new(sender),
                "http://localhost:5173".to_string(),
                7,
            )
        }
    }

    /// One member holding one book borrowed at t0, plus a second member holding
    /// a book borrowed 20 days later
    async fn fixture() -> (Fixture, i32, i32) {
        let store = InMemoryStore::new();
        let repository = Repository::new(Arc::new(store.clone()), std::time::Duration::from_secs(5));
        let loans = LoansService::new(repository.clone());

        let mut book_ids = Vec::new();
        for title in ["Germinal", "Nana"] {
            let book = store
                .create_book(&CreateBook {
                    title: title.to_string(),
                    author: "Émile Zola".to_string(),
                    isbn: None,
                    description: None,
                    publication_date: None,
                    cover_url: None,
                })
                .await
                .unwrap();
            book_ids.push(book.id);
        }
        let late = store
            .insert_borrower("Marc", "Lord", "marc@lord.com", "", Role::Member)
            .await;
        let on_time = store
            .insert_borrower("John", "Smith", "john@smith.com", "", Role::Member)
            .await;

        let overdue = loans.borrow(book_ids[0], late.id, t0()).await.unwrap();
        let current = loans
            .borrow(book_ids[1], on_time.id, t0() + Duration::days(20))
            .await
            .unwrap();

        (
            Fixture {
                store,
                loans,
                repository,
            },
            overdue.loan_id,
            current.loan_id,
        )
    }

    async fn loan(store: &InMemoryStore, loan_id: i32) -> crate::models::loan::Loan {
        store
            .loans()
            .await
            .into_iter()
            .find(|loan| loan.id == loan_id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_reminds_overdue_loans_once() {
        let (f, overdue_id, current_id) = fixture().await;
        let mut sender = MockNotificationSender::new();
        sender
            .expect_send()
            .withf(|to, _, html| to.contains("marc@lord.com") && html.contains("Germinal"))
            .times(1)
            .returning(|_, _, _| delivered());
        let reminders = f.reminders(sender);

        let now = t0() + Duration::days(32);
        let report = reminders.sweep(now).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                candidates: 1,
                sent: 1,
                failed: 0
            }
        );

        let reminded = loan(&f.store, overdue_id).await;
        assert!(reminded.reminder_sent);
        assert_eq!(reminded.reminder_count, 1);
        assert_eq!(reminded.last_reminder_at, Some(now));
        assert_eq!(reminded.status, LoanStatus::Overdue);
        assert_eq!(loan(&f.store, current_id).await.reminder_count, 0);

        // immediately again: gate closed
        let report = reminders.sweep(now + Duration::minutes(1)).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(report.sent, 0);
    }

    #[tokio::test]
    async fn test_sweep_resends_after_gap() {
        let (f, overdue_id, _) = fixture().await;
        let mut sender = MockNotificationSender::new();
        sender
            .expect_send()
            .withf(|to, _, _| to.contains("marc@lord.com"))
            .times(2)
            .returning(|_, _, _| delivered());
        let reminders = f.reminders(sender);

        let first = t0() + Duration::days(31);
        reminders.sweep(first).await.unwrap();
        assert_eq!(reminders.sweep(first + Duration::days(6)).await.unwrap().sent, 0);
        assert_eq!(reminders.sweep(first + Duration::days(7)).await.unwrap().sent, 1);
        assert_eq!(loan(&f.store, overdue_id).await.reminder_count, 2);
    }

    #[tokio::test]
    async fn test_sweep_skips_loan_flagged_as_reminded() {
        let (f, overdue_id, _) = fixture().await;
        let flagged_at = t0() + Duration::days(31);
        f.loans.mark_reminder_sent(overdue_id, flagged_at).await.unwrap();

        let mut sender = MockNotificationSender::new();
        sender
            .expect_send()
            .withf(|to, _, _| to.contains("marc@lord.com"))
            .times(1)
            .returning(|_, _, _| delivered());
        let reminders = f.reminders(sender);

        let report = reminders.sweep(flagged_at + Duration::hours(1)).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(loan(&f.store, overdue_id).await.reminder_count, 0);

        // the flag holds for the resend gap only
        let report = reminders.sweep(flagged_at + Duration::days(7)).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(loan(&f.store, overdue_id).await.reminder_count, 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_leaves_loan_untouched() {
        let (f, overdue_id, _) = fixture().await;
        let mut sender = MockNotificationSender::new();
        sender
            .expect_send()
            .times(1)
            .returning(|_, _, _| Err(AppError::Notification("connection refused".to_string())));
        let reminders = f.reminders(sender);

        let report = reminders.sweep(t0() + Duration::days(31)).await.unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(report.failed, 1);

        let untouched = loan(&f.store, overdue_id).await;
        assert!(!untouched.reminder_sent);
        assert_eq!(untouched.reminder_count, 0);
        assert_eq!(untouched.last_reminder_at, None);
        assert_eq!(untouched.status, LoanStatus::Active);
    }

    #[tokio::test]
    async fn test_sweep_skips_returned_loans() {
        let (f, overdue_id, _) = fixture().await;
        let borrower = loan(&f.store, overdue_id).await.borrower_id;
        f.loans
            .return_loan(overdue_id, borrower, t0() + Duration::days(31))
            .await
            .unwrap();

        let mut sender = MockNotificationSender::new();
        sender.expect_send().never();
        let report = f.reminders(sender).sweep(t0() + Duration::days(40)).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_manual_reminder_bypasses_gate() {
        let (f, overdue_id, _) = fixture().await;
        let mut sender = MockNotificationSender::new();
        sender
            .expect_send()
            .withf(|_, subject, _| subject.contains("Germinal"))
            .times(2)
            .returning(|_, _, _| delivered());
        let reminders = f.reminders(sender);

        let now = t0() + Duration::days(35);
        let first = reminders.send_manual_reminder(overdue_id, now).await.unwrap();
        assert_eq!(first.email, "marc@lord.com");
        assert_eq!(first.reminder_count, 1);

        let second = reminders
            .send_manual_reminder(overdue_id, now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(second.reminder_count, 2);
    }

    #[tokio::test]
    async fn test_manual_reminder_rejects_unknown_and_current_loans() {
        let (f, _, current_id) = fixture().await;
        let mut sender = MockNotificationSender::new();
        sender.expect_send().never();
        let reminders = f.reminders(sender);

        let now = t0() + Duration::days(35);
        let err = reminders.send_manual_reminder(current_id, now).await.unwrap_err();
        assert!(matches!(err, AppError::Loan(LoanError::NotOverdue)));

        let err = reminders.send_manual_reminder(999, now).await.unwrap_err();
        assert!(matches!(err, AppError::Loan(LoanError::LoanNotFound)));
    }

    #[tokio::test]
    async fn test_manual_reminder_surfaces_delivery_failure() {
        let (f, overdue_id, _) = fixture().await;
        let mut sender = MockNotificationSender::new();
        sender
            .expect_send()
            .returning(|_, _, _| Err(AppError::Internal("bad mailbox".to_string())));
        let reminders = f.reminders(sender);

        let err = reminders
            .send_manual_reminder(overdue_id, t0() + Duration::days(35))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Notification(_)));
        assert_eq!(loan(&f.store, overdue_id).await.reminder_count, 0);
    }
}
