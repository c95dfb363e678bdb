//! Book queries for PostgreSQL

use chrono::Utc;
use sqlx::PgExecutor;

use crate::{
    error::{AppError, AppResult, LoanError},
    models::book::{Book, BookStatus, CatalogCounts, CreateBook, UpdateBook},
};

macro_rules! book_columns {
    () => {
        "id, title, author, isbn, description, publication_date, cover_url, \
         status, created_at, updated_at"
    };
}

/// Get book by ID
pub async fn find_by_id<'e, E: PgExecutor<'e>>(executor: E, id: i32) -> AppResult<Book> {
    sqlx::query_as::<_, Book>(concat!("SELECT ", book_columns!(), " FROM books WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
}

/// Lock an available book row for the rest of the transaction
pub async fn lock_available<'e, E: PgExecutor<'e>>(executor: E, id: i32) -> AppResult<Book> {
    sqlx::query_as::<_, Book>(concat!(
        "SELECT ",
        book_columns!(),
        " FROM books WHERE id = $1 AND status = $2 FOR UPDATE"
    ))
    .bind(id)
    .bind(BookStatus::Available)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| LoanError::BookUnavailable.into())
}

/// Set availability; setting the current value again is not an error
pub async fn set_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
    status: BookStatus,
) -> AppResult<()> {
    let result = sqlx::query("UPDATE books SET status = $1, updated_at = NOW() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Book with id {} not found", id)));
    }
    Ok(())
}

pub async fn list<'e, E: PgExecutor<'e>>(executor: E) -> AppResult<Vec<Book>> {
    let books = sqlx::query_as::<_, Book>(concat!(
        "SELECT ",
        book_columns!(),
        " FROM books ORDER BY title, id"
    ))
    .fetch_all(executor)
    .await?;
    Ok(books)
}

pub async fn create<'e, E: PgExecutor<'e>>(executor: E, book: &CreateBook) -> AppResult<Book> {
    let now = Utc::now();
    let created = sqlx::query_as::<_, Book>(concat!(
        r#"
        INSERT INTO books (title, author, isbn, description, publication_date, cover_url,
                           status, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING "#,
        book_columns!()
    ))
    .bind(&book.title)
    .bind(&book.author)
    .bind(&book.isbn)
    .bind(&book.description)
    .bind(book.publication_date)
    .bind(&book.cover_url)
    .bind(BookStatus::Available)
    .bind(now)
    .fetch_one(executor)
    .await?;
    Ok(created)
}

/// Update bibliographic fields; availability is never touched here
pub async fn update<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i32,
    update: &UpdateBook,
) -> AppResult<Book> {
    sqlx::query_as::<_, Book>(concat!(
        r#"
        UPDATE books SET
            title = COALESCE($2, title),
            author = COALESCE($3, author),
            isbn = COALESCE($4, isbn),
            description = COALESCE($5, description),
            publication_date = COALESCE($6, publication_date),
            cover_url = COALESCE($7, cover_url),
            updated_at = NOW()
        WHERE id = $1
        RETURNING "#,
        book_columns!()
    ))
    .bind(id)
    .bind(&update.title)
    .bind(&update.author)
    .bind(&update.isbn)
    .bind(&update.description)
    .bind(update.publication_date)
    .bind(&update.cover_url)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
}

/// Delete a book unless it is out on loan; past loans go with it (cascade).
/// Returns false when an outstanding loan blocked the deletion.
pub async fn delete_if_not_borrowed<'e, E: PgExecutor<'e>>(executor: E, id: i32) -> AppResult<bool> {
    let deleted: Option<i32> = sqlx::query_scalar(
        r#"
        DELETE FROM books b
        WHERE b.id = $1
          AND NOT EXISTS (
              SELECT 1 FROM loans l
              WHERE l.book_id = b.id AND l.status IN ('active', 'overdue')
          )
        RETURNING b.id
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(deleted.is_some())
}

pub async fn counts<'e, E: PgExecutor<'e>>(executor: E) -> AppResult<CatalogCounts> {
    let counts = sqlx::query_as::<_, CatalogCounts>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM books) AS total_books,
            (SELECT COUNT(*) FROM users) AS total_users
        "#,
    )
    .fetch_one(executor)
    .await?;
    Ok(counts)
}
