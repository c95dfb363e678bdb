//! Bibliotheque library-loan management server
//!
//! A REST JSON API for a book catalog, loans with 30-day due dates, and
//! overdue email reminders.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod dates;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
    pub repository: repository::Repository,
}
