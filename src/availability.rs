//! Book availability store.
//!
//! A book is `reserved` exactly while a pending or accepted exchange holds it.
//! Status is only ever written through the guarded statements in this module,
//! either standalone through [`BookRepository`] or inside the exchange ledger's
//! transaction through the `&mut SqliteConnection` forms.

use crate::{
    database::{book_from_row, genre_from_row, Database},
    error::{MarketError, Result},
    model::{search_key, Book, BookSearch, BookStatus, Genre, NewBook},
    repository::BookRepository,
    BookId, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::HashMap;

const BOOK_COLUMNS: &str = "b.id, b.title, b.author, b.description, b.ai_summary, b.status, \
                            b.owner_id, b.created_at, b.updated_at";

/// Flips an available book to reserved. Zero affected rows means somebody else holds it.
pub async fn reserve(conn: &mut SqliteConnection, book_id: BookId) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE books SET status = 'reserved', updated_at = ?
        WHERE id = ? AND status = 'available' AND deleted_at IS NULL
        "#,
    )
    .bind(Utc::now())
    .bind(book_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    match status(conn, book_id).await? {
        Some(_) => Err(MarketError::AlreadyReserved(book_id)),
        None => Err(MarketError::BookNotFound(book_id)),
    }
}

/// Like [`reserve`], but only while `owner` still holds the book. A book that
/// changed hands since the caller last looked fails with `not_owner`.
pub async fn reserve_owned(
    conn: &mut SqliteConnection,
    book_id: BookId,
    owner: UserId,
    not_owner: MarketError,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE books SET status = 'reserved', updated_at = ?
        WHERE id = ? AND owner_id = ? AND status = 'available' AND deleted_at IS NULL
        "#,
    )
    .bind(Utc::now())
    .bind(book_id)
    .bind(owner)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }

    let holder = sqlx::query("SELECT owner_id FROM books WHERE id = ? AND deleted_at IS NULL")
        .bind(book_id)
        .fetch_optional(&mut *conn)
        .await?;

    match holder {
        None => Err(MarketError::BookNotFound(book_id)),
        Some(row) if row.try_get::<UserId, _>("owner_id")? != owner => Err(not_owner),
        Some(_) => Err(MarketError::AlreadyReserved(book_id)),
    }
}

pub async fn release(conn: &mut SqliteConnection, book_id: BookId) -> Result<()> {
    let result = sqlx::query("UPDATE books SET status = 'available', updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(book_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(MarketError::BookNotFound(book_id));
    }
    Ok(())
}

pub async fn transfer_ownership(
    conn: &mut SqliteConnection,
    book_id: BookId,
    new_owner: UserId,
) -> Result<()> {
    let result = sqlx::query("UPDATE books SET owner_id = ?, updated_at = ? WHERE id = ?")
        .bind(new_owner)
        .bind(Utc::now())
        .bind(book_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(MarketError::BookNotFound(book_id));
    }
    Ok(())
}

/// Current status, `None` for unknown or deleted books.
pub async fn status(conn: &mut SqliteConnection, book_id: BookId) -> Result<Option<BookStatus>> {
    let row = sqlx::query("SELECT status FROM books WHERE id = ? AND deleted_at IS NULL")
        .bind(book_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| row.try_get::<String, _>("status")?.parse::<BookStatus>())
        .transpose()
}

/// `LIKE` operand matching `key` anywhere, with wildcards in `key` taken literally.
fn contains_pattern(key: &str) -> String {
    let mut pattern = String::with_capacity(key.len() + 2);
    pattern.push('%');
    for c in key.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, search: &BookSearch) {
    builder.push(" FROM books b JOIN users u ON u.id = b.owner_id WHERE b.deleted_at IS NULL");

    if let Some(title) = &search.title {
        builder
            .push(" AND b.title_key LIKE ")
            .push_bind(contains_pattern(title))
            .push(" ESCAPE '\\'");
    }
    if let Some(author) = &search.author {
        builder
            .push(" AND b.author_key LIKE ")
            .push_bind(contains_pattern(author))
            .push(" ESCAPE '\\'");
    }
    if let Some(status) = search.status {
        builder.push(" AND b.status = ").push_bind(status.as_str());
    }
    if let Some(city) = &search.city {
        builder
            .push(" AND u.city_key LIKE ")
            .push_bind(contains_pattern(city))
            .push(" ESCAPE '\\'");
    }
    if let Some(genre_id) = search.genre_id {
        builder
            .push(" AND EXISTS (SELECT 1 FROM book_genres bg WHERE bg.book_id = b.id AND bg.genre_id = ")
            .push_bind(genre_id)
            .push(")");
    }
}

impl Database {
    /// Fills `genres` on each book with one query.
    async fn attach_genres(&self, books: &mut [Book]) -> Result<()> {
        if books.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT bg.book_id, g.id, g.name, g.created_at \
             FROM book_genres bg JOIN genres g ON g.id = bg.genre_id WHERE bg.book_id IN (",
        );
        let mut ids = query.separated(", ");
        for book in books.iter() {
            ids.push_bind(book.id);
        }
        ids.push_unseparated(") ORDER BY g.name, g.id");

        let rows = query.build().fetch_all(self.pool()).await?;
        let mut by_book: HashMap<BookId, Vec<Genre>> = HashMap::new();
        for row in &rows {
            by_book
                .entry(row.try_get("book_id")?)
                .or_default()
                .push(genre_from_row(row)?);
        }

        for book in books.iter_mut() {
            book.genres = by_book.remove(&book.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn hydrate(&self, rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Book>> {
        let mut books = rows.iter().map(book_from_row).collect::<Result<Vec<_>>>()?;
        self.attach_genres(&mut books).await?;
        Ok(books)
    }
}

#[async_trait]
impl BookRepository for Database {
    async fn create_book(&self, book: NewBook) -> Result<Book> {
        let now = Utc::now();
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO books (title, author, title_key, author_key, description, ai_summary, status, owner_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'available', ?, ?, ?)
            "#,
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(search_key(&book.title))
        .bind(search_key(&book.author))
        .bind(&book.description)
        .bind(&book.ai_summary)
        .bind(book.owner_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        let mut genres = Vec::with_capacity(book.genre_ids.len());
        for genre_id in &book.genre_ids {
            let row = sqlx::query("SELECT id, name, created_at FROM genres WHERE id = ?")
                .bind(genre_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(MarketError::GenreNotFound(*genre_id))?;
            genres.push(genre_from_row(&row)?);

            sqlx::query("INSERT INTO book_genres (book_id, genre_id) VALUES (?, ?)")
                .bind(id)
                .bind(genre_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        genres.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        Ok(Book {
            id,
            title: book.title,
            author: book.author,
            description: book.description,
            ai_summary: book.ai_summary,
            status: BookStatus::Available,
            owner_id: book.owner_id,
            created_at: now,
            updated_at: now,
            genres,
        })
    }

    async fn get_book(&self, id: BookId) -> Result<Option<Book>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOK_COLUMNS} FROM books b WHERE b.id = ? AND b.deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(std::slice::from_ref(&row)).await?.pop()),
            None => Ok(None),
        }
    }

    async fn update_description(&self, id: BookId, description: String) -> Result<Book> {
        let result = sqlx::query(
            "UPDATE books SET description = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&description)
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::BookNotFound(id));
        }

        self.get_book(id).await?.ok_or(MarketError::BookNotFound(id))
    }

    async fn delete_book(&self, id: BookId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE books SET deleted_at = ?
            WHERE id = ? AND status = 'available' AND deleted_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_status(id).await {
            Ok(_) => Err(MarketError::BookReserved),
            Err(e) => Err(e),
        }
    }

    async fn search_books(&self, search: &BookSearch) -> Result<(Vec<Book>, i64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
        push_filters(&mut count, search);
        let total: i64 = count.build_query_scalar().fetch_one(self.pool()).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {BOOK_COLUMNS}"));
        push_filters(&mut select, search);
        let order = search.sort_order.keyword();
        select.push(format!(
            " ORDER BY {} {order}, b.id {order}",
            search.sort_by.column()
        ));
        select
            .push(" LIMIT ")
            .push_bind(i64::from(search.limit))
            .push(" OFFSET ")
            .push_bind(search.offset());

        let rows = select.build().fetch_all(self.pool()).await?;
        let books = self.hydrate(&rows).await?;

        Ok((books, total))
    }

    async fn books_by_owner(&self, owner: UserId, status: Option<BookStatus>) -> Result<Vec<Book>> {
        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {BOOK_COLUMNS} FROM books b"));
        select
            .push(" WHERE b.deleted_at IS NULL AND b.owner_id = ")
            .push_bind(owner);
        if let Some(status) = status {
            select.push(" AND b.status = ").push_bind(status.as_str());
        }
        select.push(" ORDER BY b.created_at DESC, b.id DESC");

        let rows = select.build().fetch_all(self.pool()).await?;
        self.hydrate(&rows).await
    }

    async fn available_books(&self, city: Option<String>) -> Result<Vec<Book>> {
        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {BOOK_COLUMNS} FROM books b JOIN users u ON u.id = b.owner_id"
        ));
        select.push(" WHERE b.deleted_at IS NULL AND b.status = 'available'");
        if let Some(city) = city.as_deref().map(search_key).filter(|c| !c.is_empty()) {
            select
                .push(" AND u.city_key LIKE ")
                .push_bind(contains_pattern(&city))
                .push(" ESCAPE '\\'");
        }
        select.push(" ORDER BY b.created_at DESC, b.id DESC");

        let rows = select.build().fetch_all(self.pool()).await?;
        self.hydrate(&rows).await
    }

    async fn reserve(&self, id: BookId) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        reserve(&mut conn, id).await
    }

    async fn release(&self, id: BookId) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        release(&mut conn, id).await
    }

    async fn transfer_ownership(&self, id: BookId, new_owner: UserId) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        transfer_ownership(&mut conn, id, new_owner).await
    }

    async fn get_status(&self, id: BookId) -> Result<BookStatus> {
        let mut conn = self.pool().acquire().await?;
        status(&mut conn, id)
            .await?
            .ok_or(MarketError::BookNotFound(id))
    }
}
