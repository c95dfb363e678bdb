//! Loan (emprunt) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use super::impl_text_column;
use crate::dates;

/// Loan lifecycle state. `Returned` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum LoanStatus {
    #[serde(rename = "en_cours")]
    Active,
    #[serde(rename = "en_retard")]
    Overdue,
    #[serde(rename = "retourne")]
    Returned,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Overdue => "overdue",
            LoanStatus::Returned => "returned",
        }
    }

    /// Active or overdue: the book is still out
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, LoanStatus::Returned)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LoanStatus::Active),
            "overdue" => Ok(LoanStatus::Overdue),
            "returned" => Ok(LoanStatus::Returned),
            _ => Err(format!("Invalid loan status: {}", s)),
        }
    }
}

impl_text_column!(LoanStatus);

/// Loan model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: i32,
    pub book_id: i32,
    pub borrower_id: i32,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
    pub status: LoanStatus,
    pub reminder_sent: bool,
    pub reminder_count: i32,
    pub last_reminder_at: Option<DateTime<Utc>>,
}

impl Loan {
    /// Status as of `now`: an active loan past its due date reads as overdue
    /// even before the stored status has been refreshed.
    pub fn effective_status(&self, now: DateTime<Utc>) -> LoanStatus {
        match self.status {
            LoanStatus::Active if dates::is_past_due(self.due_at, now) => LoanStatus::Overdue,
            status => status,
        }
    }

    /// Outstanding and strictly past due
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_outstanding() && dates::is_past_due(self.due_at, now)
    }

    /// Whether the reminder gate lets this loan through at `now`.
    ///
    /// A loan that was never reminded always passes; a reminded loan passes again
    /// once `resend_after` has elapsed since its last reminder. A flag with no
    /// timestamp keeps the gate closed.
    pub fn awaits_reminder(&self, now: DateTime<Utc>, resend_after: chrono::Duration) -> bool {
        if !self.reminder_sent {
            return true;
        }
        match self.last_reminder_at {
            Some(last) => now - last >= resend_after,
            None => false,
        }
    }
}

/// Loan joined with its book and borrower
#[derive(Debug, Clone, FromRow)]
pub struct LoanRecord {
    #[sqlx(flatten)]
    pub loan: Loan,
    pub book_title: String,
    pub book_author: String,
    pub book_cover_url: Option<String>,
    pub borrower_firstname: String,
    pub borrower_lastname: String,
    pub borrower_email: String,
}

/// Loan projection returned to the borrower
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoanDetails {
    pub id: i32,
    #[serde(rename = "date_emprunt")]
    pub borrowed_at: DateTime<Utc>,
    #[serde(rename = "date_retour_prevue")]
    pub due_at: DateTime<Utc>,
    #[serde(rename = "date_retour_effective")]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(rename = "statut")]
    pub status: LoanStatus,
    #[serde(rename = "statut_libelle")]
    pub status_label: String,
    #[serde(rename = "jours_restants")]
    pub days_remaining: i64,
    #[serde(rename = "jours_retard")]
    pub days_overdue: i64,
    #[serde(rename = "rappel_envoye")]
    pub reminder_sent: bool,
    #[serde(rename = "rappels_envoyes")]
    pub reminder_count: i32,
    #[serde(rename = "derniere_date_rappel")]
    pub last_reminder_at: Option<DateTime<Utc>>,
    #[serde(rename = "livre_id")]
    pub book_id: i32,
    #[serde(rename = "titre")]
    pub book_title: String,
    #[serde(rename = "auteur")]
    pub book_author: String,
    #[serde(rename = "photo_url")]
    pub book_cover_url: Option<String>,
}

impl LoanDetails {
    /// Project a record as of `now`
    pub fn project(record: LoanRecord, now: DateTime<Utc>) -> Self {
        let LoanRecord {
            loan,
            book_title,
            book_author,
            book_cover_url,
            ..
        } = record;

        let status = loan.effective_status(now);
        let days_remaining = dates::days_remaining(loan.due_at, now);

        Self {
            id: loan.id,
            borrowed_at: loan.borrowed_at,
            due_at: loan.due_at,
            returned_at: loan.returned_at,
            status,
            status_label: status_label(status, days_remaining).to_string(),
            days_remaining,
            days_overdue: if status.is_outstanding() {
                dates::days_overdue(loan.due_at, now)
            } else {
                0
            },
            reminder_sent: loan.reminder_sent,
            reminder_count: loan.reminder_count,
            last_reminder_at: loan.last_reminder_at,
            book_id: loan.book_id,
            book_title,
            book_author,
            book_cover_url,
        }
    }
}

/// Flat loan row for the admin listings, book and borrower columns prefixed
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminLoanDetails {
    pub id: i32,
    #[serde(rename = "date_emprunt")]
    pub borrowed_at: DateTime<Utc>,
    #[serde(rename = "date_retour_prevue")]
    pub due_at: DateTime<Utc>,
    #[serde(rename = "date_retour_effective")]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(rename = "statut")]
    pub status: LoanStatus,
    #[serde(rename = "statut_libelle")]
    pub status_label: String,
    #[serde(rename = "jours_restants")]
    pub days_remaining: i64,
    #[serde(rename = "jours_retard")]
    pub days_overdue: i64,
    #[serde(rename = "rappel_envoye")]
    pub reminder_sent: bool,
    #[serde(rename = "rappels_envoyes")]
    pub reminder_count: i32,
    #[serde(rename = "derniere_date_rappel")]
    pub last_reminder_at: Option<DateTime<Utc>>,
    #[serde(rename = "livre_id")]
    pub book_id: i32,
    #[serde(rename = "livre_titre")]
    pub book_title: String,
    #[serde(rename = "livre_auteur")]
    pub book_author: String,
    #[serde(rename = "utilisateur_id")]
    pub borrower_id: i32,
    #[serde(rename = "utilisateur_nom")]
    pub borrower_lastname: String,
    #[serde(rename = "utilisateur_prenom")]
    pub borrower_firstname: String,
    #[serde(rename = "utilisateur_email")]
    pub borrower_email: String,
}

impl AdminLoanDetails {
    pub fn project(mut record: LoanRecord, now: DateTime<Utc>) -> Self {
        let borrower_id = record.loan.borrower_id;
        let borrower_lastname = std::mem::take(&mut record.borrower_lastname);
        let borrower_firstname = std::mem::take(&mut record.borrower_firstname);
        let borrower_email = std::mem::take(&mut record.borrower_email);
        let details = LoanDetails::project(record, now);

        Self {
            id: details.id,
            borrowed_at: details.borrowed_at,
            due_at: details.due_at,
            returned_at: details.returned_at,
            status: details.status,
            status_label: details.status_label,
            days_remaining: details.days_remaining,
            days_overdue: details.days_overdue,
            reminder_sent: details.reminder_sent,
            reminder_count: details.reminder_count,
            last_reminder_at: details.last_reminder_at,
            book_id: details.book_id,
            book_title: details.book_title,
            book_author: details.book_author,
            borrower_id,
            borrower_lastname,
            borrower_firstname,
            borrower_email,
        }
    }
}

/// Human-readable status shown next to a loan
pub fn status_label(status: LoanStatus, days_remaining: i64) -> &'static str {
    match status {
        LoanStatus::Returned => "Retourné",
        LoanStatus::Overdue => "En retard",
        LoanStatus::Active if days_remaining <= dates::DUE_SOON_DAYS => "À rendre bientôt",
        LoanStatus::Active => "En cours",
    }
}

/// Loan counters as of a given instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LoanStatistics {
    #[serde(rename = "total_emprunts")]
    pub total: i64,
    #[serde(rename = "emprunts_en_cours")]
    pub active: i64,
    #[serde(rename = "emprunts_en_retard")]
    pub overdue: i64,
    #[serde(rename = "emprunts_retournes")]
    pub returned: i64,
}

/// Outcome of a successful borrow
#[derive(Debug, Clone, PartialEq)]
pub struct BorrowReceipt {
    pub loan_id: i32,
    pub due_at: DateTime<Utc>,
    pub duration_days: i64,
}

/// Outcome of a successful return
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnReceipt {
    pub loan_id: i32,
    pub book_id: i32,
    pub book_title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn loan(now: DateTime<Utc>) -> Loan {
        Loan {
            id: 1,
            book_id: 1,
            borrower_id: 2,
            borrowed_at: now,
            due_at: dates::due_date(now),
            returned_at: None,
            status: LoanStatus::Active,
            reminder_sent: false,
            reminder_count: 0,
            last_reminder_at: None,
        }
    }

    fn record(loan: Loan) -> LoanRecord {
        LoanRecord {
            loan,
            book_title: "Les Misérables".to_string(),
            book_author: "Victor Hugo".to_string(),
            book_cover_url: None,
            borrower_firstname: "Marc".to_string(),
            borrower_lastname: "Lord".to_string(),
            borrower_email: "marc@lord.com".to_string(),
        }
    }

    #[test]
    fn test_effective_status_flips_only_after_due() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let loan = loan(t0);
        assert_eq!(loan.effective_status(loan.due_at), LoanStatus::Active);
        assert_eq!(
            loan.effective_status(loan.due_at + Duration::seconds(1)),
            LoanStatus::Overdue
        );

        let returned = Loan {
            status: LoanStatus::Returned,
            returned_at: Some(t0 + Duration::days(40)),
            ..loan
        };
        assert_eq!(returned.effective_status(t0 + Duration::days(50)), LoanStatus::Returned);
        assert!(!returned.is_overdue(t0 + Duration::days(50)));
    }

    #[test]
    fn test_reminder_gate() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let gap = Duration::days(7);
        let mut loan = loan(t0);
        assert!(loan.awaits_reminder(t0, gap));

        loan.reminder_sent = true;
        loan.last_reminder_at = Some(t0);
        assert!(!loan.awaits_reminder(t0 + Duration::days(6), gap));
        assert!(loan.awaits_reminder(t0 + Duration::days(7), gap));

        loan.last_reminder_at = None;
        assert!(!loan.awaits_reminder(t0 + Duration::days(30), gap));
    }

    #[test]
    fn test_projection_of_overdue_loan() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let details = LoanDetails::project(record(loan(t0)), t0 + Duration::days(31));
        assert_eq!(details.status, LoanStatus::Overdue);
        assert_eq!(details.days_remaining, -1);
        assert_eq!(details.days_overdue, 1);
        assert_eq!(details.status_label, "En retard");

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["statut"], "en_retard");
        assert_eq!(json["jours_restants"], -1);
        assert_eq!(json["titre"], "Les Misérables");
        assert!(json.get("utilisateur").is_none());
    }

    #[test]
    fn test_projection_labels_due_soon() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let details = LoanDetails::project(record(loan(t0)), t0 + Duration::days(28));
        assert_eq!(details.status, LoanStatus::Active);
        assert_eq!(details.days_remaining, 2);
        assert_eq!(details.status_label, "À rendre bientôt");

        let fresh = LoanDetails::project(record(loan(t0)), t0);
        assert_eq!(fresh.status_label, "En cours");
        assert_eq!(fresh.days_overdue, 0);
    }

    #[test]
    fn test_admin_projection_uses_flat_prefixed_keys() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let details = AdminLoanDetails::project(record(loan(t0)), t0 + Duration::days(33));
        assert_eq!(details.status, LoanStatus::Overdue);
        assert_eq!(details.days_overdue, 3);

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["livre_titre"], "Les Misérables");
        assert_eq!(json["livre_auteur"], "Victor Hugo");
        assert_eq!(json["utilisateur_id"], 2);
        assert_eq!(json["utilisateur_nom"], "Lord");
        assert_eq!(json["utilisateur_prenom"], "Marc");
        assert_eq!(json["utilisateur_email"], "marc@lord.com");
        assert_eq!(json["jours_retard"], 3);
        assert!(json.get("titre").is_none());
        assert!(json.get("utilisateur").is_none());
    }

    #[test]
    fn test_statistics_wire_names() {
        let stats = LoanStatistics { total: 4, active: 1, overdue: 1, returned: 2 };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["total_emprunts"], 4);
        assert_eq!(json["emprunts_en_cours"], 1);
        assert_eq!(json["emprunts_en_retard"], 1);
        assert_eq!(json["emprunts_retournes"], 2);
    }
}
