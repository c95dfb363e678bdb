//! Date arithmetic for the loan lifecycle.
//!
//! Every function takes `now` explicitly so that callers (and tests) control time.
//! Day counts use floor division of the timestamp delta: a loan due in 12 hours has
//! 0 days remaining, a loan one second past due has -1.

use chrono::{DateTime, Duration, Utc};

/// Fixed loan period in calendar days
pub const LOAN_DURATION_DAYS: i64 = 30;

/// Loans due within this many days are flagged as "due soon"
pub const DUE_SOON_DAYS: i64 = 3;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Due date of a loan started at `borrowed_at`
pub fn due_date(borrowed_at: DateTime<Utc>) -> DateTime<Utc> {
    borrowed_at + Duration::days(LOAN_DURATION_DAYS)
}

/// Whole days left before `due_at`, floored (negative once past due)
pub fn days_remaining(due_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (due_at - now).num_milliseconds().div_euclid(MILLIS_PER_DAY)
}

/// Days a loan is late, 0 when not yet due
pub fn days_overdue(due_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (-days_remaining(due_at, now)).max(0)
}

/// Strictly past due
pub fn is_past_due(due_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > due_at
}

/// Format a timestamp the way French readers expect it (dd/mm/yyyy)
pub fn format_fr(date: DateTime<Utc>) -> String {
    date.format("%d/%m/%Y").to_string()
}
