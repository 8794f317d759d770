use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::{BookId, ExchangeId, GenreId, ReviewId, UserId};

pub type Result<T> = std::result::Result<T, MarketError>;

/// Stable category of a failure. Transport adapters translate these, never the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidState,
    InvalidInput,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("Invalid id")]
    InvalidId,

    #[error("Book not found: {0}")]
    BookNotFound(BookId),

    #[error("Exchange not found: {0}")]
    ExchangeNotFound(ExchangeId),

    #[error("Review not found: {0}")]
    ReviewNotFound(ReviewId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Genre not found: {0}")]
    GenreNotFound(GenreId),

    #[error("Initiator and recipient must be different users")]
    SameParty,

    #[error("Initiator does not own the book")]
    InitiatorNotOwner,

    #[error("Recipient does not own the book")]
    RecipientNotOwner,

    #[error("Initiator book is unavailable")]
    InitiatorBookUnavailable,

    #[error("Recipient book is unavailable")]
    RecipientBookUnavailable,

    #[error("Book {0} is already reserved")]
    AlreadyReserved(BookId),

    #[error("Exchange is not pending")]
    NotPending,

    #[error("Exchange is not accepted")]
    NotAccepted,

    #[error("Forbidden")]
    Forbidden,

    #[error("Book is involved in an exchange")]
    BookReserved,

    #[error("Invalid book input: {0}")]
    InvalidBook(String),

    #[error("Review text must be between 10 and 150 characters")]
    TextLength,

    #[error("Rating must be between 1 and 5")]
    InvalidRating,

    #[error("Cannot leave a review to yourself")]
    SelfReviewForbidden,

    #[error("Email already in use")]
    EmailTaken,

    #[error("Invalid user input: {0}")]
    InvalidUser(String),

    #[error("User still takes part in an active exchange")]
    UserHasActiveExchanges,

    #[error("Invalid genre input: {0}")]
    InvalidGenre(String),

    #[error("Genre already exists")]
    GenreTaken,

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl MarketError {
    pub fn kind(&self) -> ErrorKind {
        use MarketError::*;

        match self {
            BookNotFound(_)
            | ExchangeNotFound(_)
            | ReviewNotFound(_)
            | UserNotFound(_)
            | GenreNotFound(_) => ErrorKind::NotFound,
            Forbidden | Auth(_) => ErrorKind::Forbidden,
            NotPending | NotAccepted | BookReserved | UserHasActiveExchanges => {
                ErrorKind::InvalidState
            }
            InvalidId
            | SameParty
            | InitiatorNotOwner
            | RecipientNotOwner
            | InitiatorBookUnavailable
            | RecipientBookUnavailable
            | InvalidBook(_)
            | TextLength
            | InvalidRating
            | SelfReviewForbidden
            | InvalidUser(_)
            | InvalidGenre(_)
            | InvalidFilter(_)
            | MalformedRequest(_) => ErrorKind::InvalidInput,
            AlreadyReserved(_) | EmailTaken | GenreTaken | Busy(_) => ErrorKind::Conflict,
            Config(_) | Database(_) | Corrupt(_) => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for MarketError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
            let busy = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| matches!(code & 0xff, 5 | 6))
                .unwrap_or(false);
            if busy {
                return MarketError::Busy(db_err.message().to_string());
            }
        }
        MarketError::Database(err)
    }
}
