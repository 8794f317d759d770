//! Storage ports consumed by the services.
//!
//! The services only see these traits; `Database` implements all of them on
//! SQLite. Each method returns fully hydrated rows, nothing is loaded lazily.

use async_trait::async_trait;

use crate::{
    error::Result,
    model::{
        Book, BookSearch, BookStatus, CreateUserRequest, Exchange, ExchangeStatus, Genre,
        NewBook, NewExchange, NewReview, RatingSummary, Review, User,
    },
    BookId, ExchangeId, GenreId, ReviewId, UserId,
};

/// Book rows plus the availability contract.
///
/// `reserve`, `release` and `transfer_ownership` each apply as a single guarded
/// statement. The exchange ledger uses the transaction-scoped forms in
/// [`crate::availability`] instead, so its book writes commit with the exchange row.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookRepository: Send + Sync {
    /// Links `book.genre_ids` in the same transaction; `GenreNotFound` for an unknown id.
    async fn create_book(&self, book: NewBook) -> Result<Book>;

    /// Soft-deleted books are reported as missing.
    async fn get_book(&self, id: BookId) -> Result<Option<Book>>;

    async fn update_description(&self, id: BookId, description: String) -> Result<Book>;

    /// Fails with `BookReserved` while the book is held by an active exchange.
    async fn delete_book(&self, id: BookId) -> Result<()>;

    async fn search_books(&self, search: &BookSearch) -> Result<(Vec<Book>, i64)>;

    async fn books_by_owner(&self, owner: UserId, status: Option<BookStatus>) -> Result<Vec<Book>>;

    async fn available_books(&self, city: Option<String>) -> Result<Vec<Book>>;

    /// `AlreadyReserved` when the book is not available.
    async fn reserve(&self, id: BookId) -> Result<()>;

    async fn release(&self, id: BookId) -> Result<()>;

    async fn transfer_ownership(&self, id: BookId, new_owner: UserId) -> Result<()>;

    async fn get_status(&self, id: BookId) -> Result<BookStatus>;
}

/// Exchange rows. Every transition is guarded on the status it leaves, so a
/// transition that lost a race reports the status error instead of applying twice.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeRepository: Send + Sync {
    /// Inserts a pending exchange and reserves both books in one transaction.
    async fn create_exchange(&self, exchange: NewExchange) -> Result<Exchange>;

    async fn get_exchange(&self, id: ExchangeId) -> Result<Option<Exchange>>;

    async fn list_exchanges(&self) -> Result<Vec<Exchange>>;

    async fn exchanges_for_user(
        &self,
        user: UserId,
        status: Option<ExchangeStatus>,
    ) -> Result<Vec<Exchange>>;

    async fn count_completed_for_user(&self, user: UserId) -> Result<i64>;

    async fn accept_exchange(&self, exchange: &Exchange) -> Result<()>;

    /// Marks the exchange completed, swaps owners and frees both books.
    async fn complete_exchange(&self, exchange: &Exchange) -> Result<()>;

    /// Marks the exchange cancelled and frees both books.
    async fn cancel_exchange(&self, exchange: &Exchange) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn create_review(&self, review: NewReview) -> Result<Review>;

    async fn get_review(&self, id: ReviewId) -> Result<Option<Review>>;

    async fn delete_review(&self, id: ReviewId) -> Result<()>;

    async fn reviews_for_user(&self, target_user: UserId) -> Result<Vec<Review>>;

    async fn reviews_for_book(&self, target_book: BookId) -> Result<Vec<Review>>;

    async fn rating_summary(&self, target_user: UserId) -> Result<RatingSummary>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// `EmailTaken` when the address is already registered.
    async fn create_user(&self, request: CreateUserRequest) -> Result<User>;

    /// Deleted users are reported as missing.
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;

    /// Writes every profile field of `user`. `EmailTaken` on a clash.
    async fn update_user(&self, user: &User) -> Result<User>;

    /// Users with an id above `after`, in id order.
    async fn list_users(&self, after: UserId, limit: u32) -> Result<Vec<User>>;

    /// Soft-deletes the user and their listings. `UserHasActiveExchanges`
    /// while a pending or accepted exchange names them.
    async fn delete_user(&self, id: UserId) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenreRepository: Send + Sync {
    /// `GenreTaken` when the name exists.
    async fn create_genre(&self, name: String) -> Result<Genre>;

    async fn get_genre(&self, id: GenreId) -> Result<Option<Genre>>;

    async fn list_genres(&self) -> Result<Vec<Genre>>;

    /// Unlinks the genre from every book.
    async fn delete_genre(&self, id: GenreId) -> Result<()>;
}
