//! Daily timer driving the reminder sweep

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    error::{AppError, AppResult},
    services::reminders::RemindersService,
};

/// Wall-clock time of day (UTC) at which the sweep runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32) -> AppResult<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(|at| Self { at })
            .ok_or_else(|| {
                AppError::Validation(format!("Invalid reminder time {:02}:{:02}", hour, minute))
            })
    }

    /// First run strictly after `now`
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            today + Duration::days(1)
        }
    }
}

impl std::fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.at.format("%H:%M"))
    }
}

/// Run the sweep every day at `schedule` until `shutdown` flips (or its sender is dropped)
pub fn spawn_daily_sweep(
    reminders: RemindersService,
    schedule: DailySchedule,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Daily reminder sweep scheduled at {} UTC", schedule);

        loop {
            let now = Utc::now();
            let next = schedule.next_run_after(now);
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    tracing::info!("Reminder scheduler stopped");
                    break;
                }
            }

            match reminders.sweep(Utc::now()).await {
                Ok(report) => tracing::info!(
                    "Scheduled reminder sweep: {} candidate(s), {} sent, {} failed",
                    report.candidates,
                    report.sent,
                    report.failed
                ),
                Err(e) if e.is_transient() => {
                    tracing::warn!("Scheduled reminder sweep failed, retrying at next run: {}", e)
                }
                Err(e) => tracing::error!("Scheduled reminder sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        repository::{InMemoryStore, Repository},
        services::email::MockNotificationSender,
    };
    use chrono::{TimeZone, Timelike};
    use std::sync::Arc;

    #[test]
    fn test_next_run_later_today() {
        let schedule = DailySchedule::new(9, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap();
        assert_eq!(
            schedule.next_run_after(now),
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_run_tomorrow_once_passed() {
        let schedule = DailySchedule::new(9, 0).unwrap();
        let at_nine = Utc.with_ymd_and_hms(2025, 6, 30, 9, 0, 0).unwrap();
        assert_eq!(
            schedule.next_run_after(at_nine),
            Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap()
        );
        let evening = Utc.with_ymd_and_hms(2025, 12, 31, 18, 0, 0).unwrap();
        assert_eq!(
            schedule.next_run_after(evening),
            Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_time_rejected() {
        assert!(DailySchedule::new(24, 0).is_err());
        assert!(DailySchedule::new(9, 60).is_err());
        assert_eq!(DailySchedule::new(7, 5).unwrap().to_string(), "07:05");
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let repository = Repository::new(
            Arc::new(InMemoryStore::new()),
            std::time::Duration::from_secs(5),
        );
        let mut sender = MockNotificationSender::new();
        sender.expect_send().never();
        let reminders = RemindersService::new(
            repository,
            Arc::new(sender),
            "http://localhost:5173".to_string(),
            7,
        );

        let (tx, rx) = watch::channel(false);
        let now = Utc::now();
        // furthest possible slot from now
        let schedule = DailySchedule::new((now.hour() + 12) % 24, 0).unwrap();
        let handle = spawn_daily_sweep(reminders, schedule, rx);

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
