//! Catalog management service

use validator::Validate;

use crate::{
    error::AppResult,
    models::book::{Book, CatalogCounts, CreateBook, UpdateBook},
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn list_books(&self) -> AppResult<Vec<Book>> {
        self.repository
            .bounded("list_books", self.repository.store().list_books())
            .await
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository
            .bounded("get_book", self.repository.store().get_book(id))
            .await
    }

    /// Add a book; it starts available
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        book.validate()?;
        let created = self
            .repository
            .bounded("create_book", self.repository.store().create_book(&book))
            .await?;
        tracing::info!("Book {} created: {}", created.id, created.title);
        Ok(created)
    }

    /// Edit bibliographic fields; availability belongs to the loan engine
    pub async fn update_book(&self, id: i32, update: UpdateBook) -> AppResult<Book> {
        update.validate()?;
        self.repository
            .bounded("update_book", self.repository.store().update_book(id, &update))
            .await
    }

    /// Delete a book that is not out on loan
    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        self.repository
            .bounded("delete_book", self.repository.store().delete_book(id))
            .await?;
        tracing::info!("Book {} deleted", id);
        Ok(())
    }

    pub async fn counts(&self) -> AppResult<CatalogCounts> {
        self.repository
            .bounded("catalog_counts", self.repository.store().catalog_counts())
            .await
    }
}
