//! Authentication service: password login and session tokens

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;

use crate::{
    config::AuthConfig,
    error::{AppError, AppResult},
    models::user::{Borrower, UserClaims},
    repository::Repository,
};

#[derive(Clone)]
pub struct AuthService {
    repository: Repository,
    config: AuthConfig,
}

impl AuthService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Check credentials and issue a JWT for the borrower
    pub async fn login(&self, email: &str, password: &str) -> AppResult<(String, Borrower)> {
        let borrower = self
            .repository
            .bounded(
                "find_borrower_by_email",
                self.repository.store().find_borrower_by_email(email),
            )
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid email or password".to_string()))?;

        if !verify_password(&borrower.password_hash, password)? {
            tracing::info!("Failed login attempt for {}", email);
            return Err(AppError::Authentication("Invalid email or password".to_string()));
        }

        let token = self.create_token(&borrower)?;
        tracing::info!("User {} logged in", borrower.id);
        Ok((token, borrower))
    }

    /// Create JWT token for a borrower
    pub fn create_token(&self, borrower: &Borrower) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let exp = now + (self.config.jwt_expiration_hours as i64 * 3600);

        let claims = UserClaims {
            id: borrower.id,
            email: borrower.email.clone(),
            role: borrower.role,
            exp,
            iat: now,
        };

        claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    /// Decode and validate a session token
    pub fn verify_token(&self, token: &str) -> AppResult<UserClaims> {
        UserClaims::from_token(token, &self.config.jwt_secret)
            .map_err(|e| AppError::Authentication(format!("Invalid token: {}", e)))
    }

    pub fn cookie_secure(&self) -> bool {
        self.config.cookie_secure
    }
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;
    Ok(hash.to_string())
}

fn verify_password(hash: &str, password: &str) -> AppResult<bool> {
    if hash.is_empty() {
        return Ok(false);
    }
    let parsed_hash =
        PasswordHash::new(hash).map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::user::Role,
        repository::{InMemoryStore, LoanStore},
    };
    use std::sync::Arc;

    async fn service() -> AuthService {
        let store = InMemoryStore::new();
        store
            .insert_borrower(
                "Marc",
                "Lord",
                "marc@lord.com",
                &hash_password("correct horse").unwrap(),
                Role::Admin,
            )
            .await;
        let repository = Repository::new(Arc::new(store), std::time::Duration::from_secs(5));
        AuthService::new(repository, AuthConfig::default())
    }

    #[tokio::test]
    async fn test_login_issues_verifiable_token() {
        let auth = service().await;
        let (token, borrower) = auth.login("MARC@lord.com", "correct horse").await.unwrap();
        assert_eq!(borrower.email, "marc@lord.com");

        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.id, borrower.id);
        assert_eq!(claims.role, Role::Admin);
        assert!(claims.exp > claims.iat);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let auth = service().await;
        let err = auth.login("marc@lord.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
        let err = auth.login("nobody@lord.com", "correct horse").await.unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_borrower_without_password_cannot_log_in() {
        let store = InMemoryStore::new();
        store
            .insert_borrower("John", "Smith", "john@smith.com", "", Role::Member)
            .await;
        assert!(store.find_borrower_by_email("john@smith.com").await.unwrap().is_some());
        let auth = AuthService::new(
            Repository::new(Arc::new(store), std::time::Duration::from_secs(5)),
            AuthConfig::default(),
        );
        assert!(auth.login("john@smith.com", "").await.is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let repository = Repository::new(
            Arc::new(InMemoryStore::new()),
            std::time::Duration::from_secs(5),
        );
        let auth = AuthService::new(repository, AuthConfig::default());
        assert!(matches!(
            auth.verify_token("not-a-jwt"),
            Err(AppError::Authentication(_))
        ));
    }
}
