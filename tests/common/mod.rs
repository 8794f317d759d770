#![allow(dead_code)]

use bookswap::{
    model::{CreateBookRequest, CreateUserRequest},
    Book, BookService, Database, ExchangeService, GenreService, LocalSummarizer, ReviewService,
    User, UserService,
};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// A marketplace over a throwaway SQLite file. The file lives as long as this value.
pub struct TestMarket {
    _file: NamedTempFile,
    pub db: Arc<Database>,
    pub exchanges: ExchangeService,
    pub books: BookService,
    pub reviews: ReviewService,
    pub users: UserService,
    pub genres: GenreService,
}

pub async fn setup() -> TestMarket {
    let file = NamedTempFile::new().unwrap();
    let db_url = format!("sqlite://{}", file.path().to_string_lossy());
    let db = Arc::new(Database::new(&db_url).await.unwrap());

    TestMarket {
        _file: file,
        exchanges: ExchangeService::new(db.clone(), db.clone()),
        books: BookService::new(db.clone(), Arc::new(LocalSummarizer::default())),
        reviews: ReviewService::new(db.clone()),
        users: UserService::new(db.clone(), db.clone(), db.clone(), db.clone()),
        genres: GenreService::new(db.clone()),
        db,
    }
}

impl TestMarket {
    pub async fn user(&self, name: &str, city: &str) -> User {
        self.users
            .create_user(CreateUserRequest {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                city: city.to_string(),
                address: String::new(),
            })
            .await
            .unwrap()
    }

    pub async fn book(&self, owner: &User, title: &str) -> Book {
        self.book_in(owner, title, Vec::new()).await.unwrap()
    }

    pub async fn book_in(&self, owner: &User, title: &str, genre_ids: Vec<i64>) -> bookswap::Result<Book> {
        self.books
            .create_book(
                owner.id,
                CreateBookRequest {
                    title: title.to_string(),
                    author: "Some Author".to_string(),
                    description: format!("A worn paperback copy of {}", title),
                    ai_summary: None,
                    genre_ids,
                },
            )
            .await
    }
}
