//! Business logic services

pub mod auth;
pub mod catalog;
pub mod email;
pub mod loans;
pub mod reminders;
pub mod scheduler;

use std::sync::Arc;

use crate::{config::AppConfig, repository::Repository};

use email::NotificationSender;

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub auth: auth::AuthService,
    pub catalog: catalog::CatalogService,
    pub loans: loans::LoansService,
    pub reminders: reminders::RemindersService,
}

impl Services {
    /// Create all services over one repository and notification sender
    pub fn new(
        repository: Repository,
        config: &AppConfig,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            auth: auth::AuthService::new(repository.clone(), config.auth.clone()),
            catalog: catalog::CatalogService::new(repository.clone()),
            loans: loans::LoansService::new(repository.clone()),
            reminders: reminders::RemindersService::new(
                repository,
                sender,
                config.email.client_url.clone(),
                config.reminders.resend_after_days,
            ),
        }
    }
}
