//! Outgoing email: overdue reminders

use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use uuid::Uuid;

use crate::{
    config::{EmailConfig, EmailTransport},
    dates,
    error::{AppError, AppResult},
    models::loan::LoanRecord,
};

/// Accepted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

/// Delivers one HTML message to one recipient
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<DeliveryReceipt>;
}

/// Build the sender selected by `email.transport`
pub fn sender_from_config(config: &EmailConfig) -> AppResult<Arc<dyn NotificationSender>> {
    match config.transport {
        EmailTransport::Smtp => Ok(Arc::new(EmailService::new(config.clone())?)),
        EmailTransport::Log => Ok(Arc::new(LogSender)),
    }
}

/// SMTP sender
#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
    mailer: SmtpTransport,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> AppResult<Self> {
        let mailer_builder = if config.smtp_use_tls {
            SmtpTransport::starttls_relay(&config.smtp_host)
                .map_err(|e| AppError::Internal(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&config.smtp_host)
        }
        .port(config.smtp_port);

        let mailer_builder = if let (Some(username), Some(password)) =
            (&config.smtp_username, &config.smtp_password)
        {
            mailer_builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer_builder
        };

        Ok(Self {
            mailer: mailer_builder.build(),
            config,
        })
    }

    fn sender_domain(&self) -> &str {
        self.config
            .smtp_from
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("localhost")
    }
}

#[async_trait]
impl NotificationSender for EmailService {
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<DeliveryReceipt> {
        let from_name = self.config.smtp_from_name.as_deref().unwrap_or("Bibliotheque");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Internal(format!("Invalid from address: {}", e)))?;

        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| AppError::Notification(format!("Invalid recipient address {}: {}", to, e)))?;

        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.sender_domain());

        let email = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to build email: {}", e)))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::Internal(format!("Email task failed: {}", e)))?
            .map_err(|e| AppError::Notification(format!("Failed to send email: {}", e)))?;

        Ok(DeliveryReceipt { message_id })
    }
}

/// Development sender: logs the message instead of delivering it
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> AppResult<DeliveryReceipt> {
        let message_id = format!("<{}@localhost>", Uuid::new_v4());
        tracing::info!(
            to = to,
            subject = subject,
            message_id = %message_id,
            bytes = html.len(),
            "Email not delivered (log transport)"
        );
        Ok(DeliveryReceipt { message_id })
    }
}

/// Everything an overdue reminder tells the borrower
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderPayload {
    pub loan_id: i32,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    pub book_title: String,
    pub book_author: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub days_overdue: i64,
}

impl ReminderPayload {
    pub fn from_record(record: &LoanRecord, now: DateTime<Utc>) -> Self {
        Self {
            loan_id: record.loan.id,
            email: record.borrower_email.clone(),
            firstname: record.borrower_firstname.clone(),
            lastname: record.borrower_lastname.clone(),
            book_title: record.book_title.clone(),
            book_author: record.book_author.clone(),
            borrowed_at: record.loan.borrowed_at,
            due_at: record.loan.due_at,
            days_overdue: dates::days_overdue(record.loan.due_at, now),
        }
    }
}

/// Subject and HTML body of an overdue reminder
pub fn reminder_email(payload: &ReminderPayload, client_url: &str, manual: bool) -> (String, String) {
    let subject = if manual {
        format!("Rappel : livre en retard - {}", payload.book_title)
    } else {
        "Rappel : retour de livre en retard".to_string()
    };

    let intro = if manual {
        "Ce message est un <strong>rappel manuel</strong> concernant votre emprunt en retard."
    } else {
        "Nous vous rappelons que le livre suivant aurait dû être retourné :"
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
  <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #f44336; text-align: center;">Rappel de retour</h2>
    <p>Bonjour {firstname} {lastname},</p>
    <p>{intro}</p>
    <div style="background-color: #fff; padding: 15px; margin: 15px 0; border-left: 4px solid #f44336;">
      <h3>{title}</h3>
      <p><strong>Auteur :</strong> {author}</p>
      <p><strong>Date d'emprunt :</strong> {borrowed}</p>
      <p><strong>Date de retour prévue :</strong> {due}</p>
      <p style="color: #f44336; font-weight: bold;">Retard : {days} jour(s)</p>
    </div>
    <p>Merci de retourner ce livre dès que possible.</p>
    <p><a href="{client_url}/mes-emprunts">Voir mes emprunts</a></p>
    <p style="font-size: 12px; color: #999; text-align: center;">
      Bibliothèque - Système de gestion des emprunts<br>
      Cet email a été envoyé automatiquement, merci de ne pas y répondre.
    </p>
  </div>
</body>
</html>"#,
        firstname = escape_html(&payload.firstname),
        lastname = escape_html(&payload.lastname),
        intro = intro,
        title = escape_html(&payload.book_title),
        author = escape_html(&payload.book_author),
        borrowed = dates::format_fr(payload.borrowed_at),
        due = dates::format_fr(payload.due_at),
        days = payload.days_overdue,
        client_url = client_url.trim_end_matches('/'),
    );

    (subject, html)
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn payload() -> ReminderPayload {
        ReminderPayload {
            loan_id: 7,
            email: "marc@lord.com".to_string(),
            firstname: "Marc".to_string(),
            lastname: "Lord".to_string(),
            book_title: "Tintin <au Tibet>".to_string(),
            book_author: "Hergé".to_string(),
            borrowed_at: Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
            due_at: Utc.with_ymd_and_hms(2025, 1, 31, 10, 0, 0).unwrap(),
            days_overdue: 4,
        }
    }

    #[test]
    fn test_reminder_email_content() {
        let (subject, html) = reminder_email(&payload(), "http://localhost:5173/", false);
        assert_eq!(subject, "Rappel : retour de livre en retard");
        assert!(html.contains("Bonjour Marc Lord"));
        assert!(html.contains("Tintin &lt;au Tibet&gt;"));
        assert!(html.contains("01/01/2025"));
        assert!(html.contains("31/01/2025"));
        assert!(html.contains("Retard : 4 jour(s)"));
        assert!(html.contains("http://localhost:5173/mes-emprunts"));
    }

    #[test]
    fn test_manual_reminder_subject_names_the_book() {
        let (subject, html) = reminder_email(&payload(), "http://localhost:5173", true);
        assert_eq!(subject, "Rappel : livre en retard - Tintin <au Tibet>");
        assert!(html.contains("rappel manuel"));
    }

    #[tokio::test]
    async fn test_log_sender_accepts_everything() {
        let receipt = LogSender.send("marc@lord.com", "subject", "<p>hi</p>").await.unwrap();
        assert!(receipt.message_id.ends_with("@localhost>"));
    }
}
