use crate::{
    config::DatabaseConfig,
    error::{MarketError, Result},
    model::*,
    repository::{GenreRepository, ReviewRepository, UserRepository},
    GenreId, ReviewId, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(&DatabaseConfig {
            url: database_url.to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout())
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.unwrap_or(10))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory database. A single connection, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                city TEXT NOT NULL DEFAULT '',
                city_key TEXT NOT NULL DEFAULT '',
                address TEXT NOT NULL DEFAULT '',
                created_at DATETIME NOT NULL,
                deleted_at DATETIME
            );

            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT NOT NULL,
                title_key TEXT NOT NULL DEFAULT '',
                author_key TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                ai_summary TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'available'
                    CHECK (status IN ('available', 'reserved')),
                owner_id INTEGER NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                deleted_at DATETIME,
                FOREIGN KEY (owner_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS genres (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS book_genres (
                book_id INTEGER NOT NULL,
                genre_id INTEGER NOT NULL,
                PRIMARY KEY (book_id, genre_id),
                FOREIGN KEY (book_id) REFERENCES books(id),
                FOREIGN KEY (genre_id) REFERENCES genres(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS exchanges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                initiator_id INTEGER NOT NULL,
                recipient_id INTEGER NOT NULL,
                initiator_book_id INTEGER NOT NULL,
                recipient_book_id INTEGER NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('pending', 'accepted', 'completed', 'cancelled')),
                completed_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL,
                CHECK (initiator_id <> recipient_id),
                FOREIGN KEY (initiator_id) REFERENCES users(id),
                FOREIGN KEY (recipient_id) REFERENCES users(id),
                FOREIGN KEY (initiator_book_id) REFERENCES books(id),
                FOREIGN KEY (recipient_book_id) REFERENCES books(id)
            );

            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id INTEGER NOT NULL,
                target_user_id INTEGER NOT NULL,
                target_book_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                created_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_books_owner ON books(owner_id);
            CREATE INDEX IF NOT EXISTS idx_books_status ON books(status);
            CREATE INDEX IF NOT EXISTS idx_book_genres_genre ON book_genres(genre_id);
            CREATE INDEX IF NOT EXISTS idx_exchanges_status ON exchanges(status);
            CREATE INDEX IF NOT EXISTS idx_exchanges_initiator ON exchanges(initiator_id);
            CREATE INDEX IF NOT EXISTS idx_exchanges_recipient ON exchanges(recipient_id);
            CREATE INDEX IF NOT EXISTS idx_reviews_target_user ON reviews(target_user_id);
            CREATE INDEX IF NOT EXISTS idx_reviews_target_book ON reviews(target_book_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        city: row.try_get("city")?,
        address: row.try_get("address")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn book_from_row(row: &SqliteRow) -> Result<Book> {
    Ok(Book {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        description: row.try_get("description")?,
        ai_summary: row.try_get("ai_summary")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        owner_id: row.try_get("owner_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        genres: Vec::new(),
    })
}

pub(crate) fn genre_from_row(row: &SqliteRow) -> Result<Genre> {
    Ok(Genre {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn exchange_from_row(row: &SqliteRow) -> Result<Exchange> {
    Ok(Exchange {
        id: row.try_get("id")?,
        initiator_id: row.try_get("initiator_id")?,
        recipient_id: row.try_get("recipient_id")?,
        initiator_book_id: row.try_get("initiator_book_id")?,
        recipient_book_id: row.try_get("recipient_book_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        completed_at: row.try_get("completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn review_from_row(row: &SqliteRow) -> Result<Review> {
    Ok(Review {
        id: row.try_get("id")?,
        author_id: row.try_get("author_id")?,
        target_user_id: row.try_get("target_user_id")?,
        target_book_id: row.try_get("target_book_id")?,
        text: row.try_get("text")?,
        rating: row.try_get("rating")?,
        created_at: row.try_get("created_at")?,
    })
}

const USER_COLUMNS: &str = "id, name, email, city, address, created_at";

const REVIEW_COLUMNS: &str =
    "id, author_id, target_user_id, target_book_id, text, rating, created_at";

#[async_trait]
impl UserRepository for Database {
    async fn create_user(&self, request: CreateUserRequest) -> Result<User> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, email, city, city_key, address, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.name.trim())
        .bind(request.email.trim())
        .bind(request.city.trim())
        .bind(search_key(&request.city))
        .bind(request.address.trim())
        .bind(created_at)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(result) => result,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(MarketError::EmailTaken)
            }
            Err(e) => return Err(e.into()),
        };

        Ok(User {
            id: result.last_insert_rowid(),
            name: request.name.trim().to_string(),
            email: request.email.trim().to_string(),
            city: request.city.trim().to_string(),
            address: request.address.trim().to_string(),
            created_at,
        })
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_user(&self, user: &User) -> Result<User> {
        let result = sqlx::query(
            r#"
            UPDATE users SET name = ?, email = ?, city = ?, city_key = ?, address = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.city)
        .bind(search_key(&user.city))
        .bind(&user.address)
        .bind(user.id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(result) if result.rows_affected() == 0 => Err(MarketError::UserNotFound(user.id)),
            Ok(_) => Ok(user.clone()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(MarketError::EmailTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_users(&self, after: UserId, limit: u32) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id > ? AND deleted_at IS NULL ORDER BY id LIMIT ?"
        ))
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn delete_user(&self, id: UserId) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // No pending or accepted exchange may name the user.
        let result = sqlx::query(
            r#"
            UPDATE users SET deleted_at = ?
            WHERE id = ? AND deleted_at IS NULL
              AND NOT EXISTS (
                SELECT 1 FROM exchanges
                WHERE (initiator_id = ? OR recipient_id = ?)
                  AND status IN ('pending', 'accepted')
              )
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let live = sqlx::query("SELECT id FROM users WHERE id = ? AND deleted_at IS NULL")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
            return match live {
                Some(_) => Err(MarketError::UserHasActiveExchanges),
                None => Err(MarketError::UserNotFound(id)),
            };
        }

        sqlx::query("UPDATE books SET deleted_at = ? WHERE owner_id = ? AND deleted_at IS NULL")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl GenreRepository for Database {
    async fn create_genre(&self, name: String) -> Result<Genre> {
        let created_at = Utc::now();
        let result = sqlx::query("INSERT INTO genres (name, created_at) VALUES (?, ?)")
            .bind(&name)
            .bind(created_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(result) => Ok(Genre {
                id: result.last_insert_rowid(),
                name,
                created_at,
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(MarketError::GenreTaken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_genre(&self, id: GenreId) -> Result<Option<Genre>> {
        let row = sqlx::query("SELECT id, name, created_at FROM genres WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(genre_from_row).transpose()
    }

    async fn list_genres(&self) -> Result<Vec<Genre>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM genres ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(genre_from_row).collect()
    }

    async fn delete_genre(&self, id: GenreId) -> Result<()> {
        let result = sqlx::query("DELETE FROM genres WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::GenreNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl ReviewRepository for Database {
    async fn create_review(&self, review: NewReview) -> Result<Review> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO reviews (author_id, target_user_id, target_book_id, text, rating, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(review.author_id)
        .bind(review.target_user_id)
        .bind(review.target_book_id)
        .bind(&review.text)
        .bind(review.rating)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(Review {
            id: result.last_insert_rowid(),
            author_id: review.author_id,
            target_user_id: review.target_user_id,
            target_book_id: review.target_book_id,
            text: review.text,
            rating: review.rating,
            created_at,
        })
    }

    async fn get_review(&self, id: ReviewId) -> Result<Option<Review>> {
        let row = sqlx::query(&format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(review_from_row).transpose()
    }

    async fn delete_review(&self, id: ReviewId) -> Result<()> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::ReviewNotFound(id));
        }
        Ok(())
    }

    async fn reviews_for_user(&self, target_user: UserId) -> Result<Vec<Review>> {
        let rows = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE target_user_id = ? ORDER BY id DESC"
        ))
        .bind(target_user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(review_from_row).collect()
    }

    async fn reviews_for_book(&self, target_book: crate::BookId) -> Result<Vec<Review>> {
        let rows = sqlx::query(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE target_book_id = ? ORDER BY id DESC"
        ))
        .bind(target_book)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(review_from_row).collect()
    }

    async fn rating_summary(&self, target_user: UserId) -> Result<RatingSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count, AVG(rating) AS average
            FROM reviews WHERE target_user_id = ?
            "#,
        )
        .bind(target_user)
        .fetch_one(&self.pool)
        .await?;

        Ok(RatingSummary {
            count: row.try_get("count")?,
            average: row.try_get("average")?,
        })
    }
}
