//! Book (catalog entry) model and related types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use super::impl_text_column;

/// Availability of the single circulating copy a book row stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum BookStatus {
    #[serde(rename = "disponible")]
    Available,
    #[serde(rename = "emprunte")]
    Borrowed,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Available => "available",
            BookStatus::Borrowed => "borrowed",
        }
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(BookStatus::Available),
            "borrowed" => Ok(BookStatus::Borrowed),
            _ => Err(format!("Invalid book status: {}", s)),
        }
    }
}

impl_text_column!(BookStatus);

/// Book model from database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    #[serde(rename = "titre")]
    pub title: String,
    #[serde(rename = "auteur")]
    pub author: String,
    pub isbn: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "date_publication")]
    pub publication_date: Option<NaiveDate>,
    #[serde(rename = "photo_url")]
    pub cover_url: Option<String>,
    #[serde(rename = "statut")]
    pub status: BookStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create book request
/// Catalog and membership totals shown on the admin dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, FromRow, ToSchema)]
pub struct CatalogCounts {
    pub total_books: i64,
    pub total_users: i64,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[serde(rename = "titre")]
    #[validate(length(min = 1, max = 255, message = "Title is required"))]
    pub title: String,
    #[serde(rename = "auteur")]
    #[validate(length(min = 1, max = 255, message = "Author is required"))]
    pub author: String,
    #[validate(length(min = 10, max = 17, message = "ISBN must be 10 to 17 characters"))]
    pub isbn: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "date_publication")]
    pub publication_date: Option<NaiveDate>,
    #[serde(rename = "photo_url")]
    #[validate(url(message = "Invalid cover URL"))]
    pub cover_url: Option<String>,
}

/// Update book request; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[serde(rename = "titre")]
    #[validate(length(min = 1, max = 255, message = "Title cannot be empty"))]
    pub title: Option<String>,
    #[serde(rename = "auteur")]
    #[validate(length(min = 1, max = 255, message = "Author cannot be empty"))]
    pub author: Option<String>,
    #[validate(length(min = 10, max = 17, message = "ISBN must be 10 to 17 characters"))]
    pub isbn: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "date_publication")]
    pub publication_date: Option<NaiveDate>,
    #[serde(rename = "photo_url")]
    #[validate(url(message = "Invalid cover URL"))]
    pub cover_url: Option<String>,
}

impl UpdateBook {
    /// Apply the provided fields to `book`
    pub fn apply_to(&self, book: &mut Book) {
        if let Some(ref title) = self.title {
            book.title = title.clone();
        }
        if let Some(ref author) = self.author {
            book.author = author.clone();
        }
        if self.isbn.is_some() {
            book.isbn = self.isbn.clone();
        }
        if self.description.is_some() {
            book.description = self.description.clone();
        }
        if self.publication_date.is_some() {
            book.publication_date = self.publication_date;
        }
        if self.cover_url.is_some() {
            book.cover_url = self.cover_url.clone();
        }
    }
}
