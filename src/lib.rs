//! # Bookswap - book-exchange marketplace backend
//!
//! Users list books, browse listings, propose and settle peer-to-peer swaps
//! and review each other.
//!
//! ## Architecture
//!
//! - **Availability**: per-book `available|reserved` status and ownership, guarded writes
//! - **Ledger**: exchange rows, written in one SQLite transaction with the book rows they touch
//! - **Exchange workflow**: ownership, availability and authorization checks before every transition
//! - **Reviews**: post-exchange feedback, aggregates computed on read
//! - **Books / Users / Genres**: catalogue search, listing management, profiles
//! - **Summary**: pluggable text summarizer with a local fallback
//! - **HTTP**: axum adapter with bearer-token authentication

pub mod auth;
pub mod availability;
pub mod book;
pub mod config;
pub mod database;
pub mod error;
pub mod exchange;
pub mod genre;
pub mod http;
pub mod ledger;
pub mod model;
pub mod repository;
pub mod review;
pub mod summary;
pub mod user;

pub use auth::{Claims, TokenVerifier};
pub use book::BookService;
pub use config::AppConfig;
pub use database::Database;
pub use error::{ErrorKind, MarketError, Result};
pub use exchange::ExchangeService;
pub use genre::GenreService;
pub use model::{
    Book, BookStatus, CreateExchangeRequest, CreateReviewRequest, Exchange, ExchangeStatus, Review,
    User,
};
pub use review::ReviewService;
pub use summary::{HttpSummarizer, LocalSummarizer, Summarizer};
pub use user::UserService;

pub type UserId = i64;
pub type BookId = i64;
pub type ExchangeId = i64;
pub type ReviewId = i64;
pub type GenreId = i64;
