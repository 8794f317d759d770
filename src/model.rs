use crate::{BookId, ExchangeId, GenreId, MarketError, Result, ReviewId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const REVIEW_TEXT_MIN: usize = 10;
pub const REVIEW_TEXT_MAX: usize = 150;
pub const RATING_MIN: i32 = 1;
pub const RATING_MAX: i32 = 5;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

pub const DEFAULT_USER_LIMIT: u32 = 50;
pub const MAX_USER_LIMIT: u32 = 1000;

/// Lowercased, trimmed form of a searchable field. Stored next to the
/// original so substring filters ignore case for any script.
pub fn search_key(value: &str) -> String {
    value.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub city: String,
    pub address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Available,
    Reserved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub description: String,
    pub ai_summary: String,
    pub status: BookStatus,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub genres: Vec<Genre>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Genre {
    pub id: GenreId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn is_available(&self) -> bool {
        self.status == BookStatus::Available
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Pending,
    Accepted,
    Completed,
    Cancelled,
}

impl ExchangeStatus {
    /// Statuses that hold a reservation on both books.
    pub fn is_active(self) -> bool {
        matches!(self, ExchangeStatus::Pending | ExchangeStatus::Accepted)
    }
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = MarketError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(MarketError::Corrupt(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(BookStatus {
    Available => "available",
    Reserved => "reserved",
});

text_enum!(ExchangeStatus {
    Pending => "pending",
    Accepted => "accepted",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exchange {
    pub id: ExchangeId,
    pub initiator_id: UserId,
    pub recipient_id: UserId,
    pub initiator_book_id: BookId,
    pub recipient_book_id: BookId,
    pub status: ExchangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Exchange {
    pub fn is_party(&self, user_id: UserId) -> bool {
        user_id == self.initiator_id || user_id == self.recipient_id
    }

    /// Only the recipient may accept, and only while pending.
    pub fn accept(&mut self, acting_user: UserId) -> Result<()> {
        if self.status != ExchangeStatus::Pending {
            return Err(MarketError::NotPending);
        }
        if acting_user != self.recipient_id {
            return Err(MarketError::Forbidden);
        }
        self.status = ExchangeStatus::Accepted;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Either party may complete an accepted exchange.
    pub fn complete(&mut self, acting_user: UserId) -> Result<()> {
        if self.status != ExchangeStatus::Accepted {
            return Err(MarketError::NotAccepted);
        }
        if !self.is_party(acting_user) {
            return Err(MarketError::Forbidden);
        }
        let now = Utc::now();
        self.completed_at.get_or_insert(now);
        self.status = ExchangeStatus::Completed;
        self.updated_at = now;
        Ok(())
    }

    /// Only the initiator may cancel, and only while pending.
    pub fn cancel(&mut self, acting_user: UserId) -> Result<()> {
        if self.status != ExchangeStatus::Pending {
            return Err(MarketError::NotPending);
        }
        if acting_user != self.initiator_id {
            return Err(MarketError::Forbidden);
        }
        self.status = ExchangeStatus::Cancelled;
        self.completed_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// An exchange about to be written, before the ledger assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExchange {
    pub initiator_id: UserId,
    pub recipient_id: UserId,
    pub initiator_book_id: BookId,
    pub recipient_book_id: BookId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub id: ReviewId,
    pub author_id: UserId,
    pub target_user_id: UserId,
    pub target_book_id: BookId,
    pub text: String,
    pub rating: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub author_id: UserId,
    pub target_user_id: UserId,
    pub target_book_id: BookId,
    pub text: String,
    pub rating: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct RatingSummary {
    pub count: i64,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub city: String,
    pub books_count: i64,
    pub successful_exchanges_count: i64,
    pub review_count: i64,
    pub average_rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExchangeRequest {
    pub recipient_id: UserId,
    pub initiator_book_id: BookId,
    pub recipient_book_id: BookId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReviewRequest {
    pub target_user_id: UserId,
    pub target_book_id: BookId,
    pub text: String,
    pub rating: i32,
}

impl CreateReviewRequest {
    /// Checks length, rating and self-review, returning the trimmed text.
    pub fn validate(&self, author_id: UserId) -> Result<String> {
        let text = self.text.trim();
        let length = text.chars().count();
        if !(REVIEW_TEXT_MIN..=REVIEW_TEXT_MAX).contains(&length) {
            return Err(MarketError::TextLength);
        }
        if !(RATING_MIN..=RATING_MAX).contains(&self.rating) {
            return Err(MarketError::InvalidRating);
        }
        if self.target_user_id == author_id {
            return Err(MarketError::SelfReviewForbidden);
        }
        Ok(text.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub genre_ids: Vec<GenreId>,
}

impl CreateBookRequest {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(MarketError::InvalidBook("title is required".to_string()));
        }
        if self.author.trim().is_empty() {
            return Err(MarketError::InvalidBook("author is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateBookRequest {
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub description: String,
    pub ai_summary: String,
    pub owner_id: UserId,
    /// Sorted and deduplicated.
    pub genre_ids: Vec<GenreId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGenreRequest {
    pub name: String,
}

impl CreateGenreRequest {
    /// Returns the trimmed name.
    pub fn validate(&self) -> Result<String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(MarketError::InvalidGenre("name is required".to_string()));
        }
        Ok(name.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub address: String,
}

fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MarketError::InvalidUser("name is required".to_string()));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(MarketError::InvalidUser("email is invalid".to_string()));
    }
    Ok(())
}

impl CreateUserRequest {
    pub fn validate(&self) -> Result<()> {
        check_name(&self.name)?;
        check_email(&self.email)
    }
}

/// Partial profile update; absent fields are left as they are.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        if let Some(email) = &self.email {
            check_email(email)?;
        }
        Ok(())
    }

    pub fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name.trim().to_string();
        }
        if let Some(email) = self.email {
            user.email = email.trim().to_string();
        }
        if let Some(city) = self.city {
            user.city = city.trim().to_string();
        }
        if let Some(address) = self.address {
            user.address = address.trim().to_string();
        }
    }
}

/// Keyset page request: users with an id greater than `last_id`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserListQuery {
    pub limit: Option<u32>,
    pub last_id: Option<UserId>,
}

impl UserListQuery {
    /// `(after, limit)`; a zero or oversized limit falls back to the default.
    pub fn normalize(&self) -> (UserId, u32) {
        let limit = self
            .limit
            .filter(|l| (1..=MAX_USER_LIMIT).contains(l))
            .unwrap_or(DEFAULT_USER_LIMIT);
        (self.last_id.unwrap_or(0).max(0), limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPageMeta {
    pub limit: u32,
    pub next_id: UserId,
    pub has_next: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPage {
    pub data: Vec<User>,
    pub meta: UserPageMeta,
}

impl UserPage {
    /// A full page may have a successor; `next_id` is the cursor for it.
    pub fn new(data: Vec<User>, limit: u32) -> Self {
        let next_id = data.last().map(|u| u.id).unwrap_or(0);
        let has_next = data.len() == limit as usize;
        Self {
            data,
            meta: UserPageMeta {
                limit,
                next_id,
                has_next,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Title,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortField {
    /// Unknown names fall back to `created_at`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "title" => SortField::Title,
            _ => SortField::CreatedAt,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            SortField::CreatedAt => "b.created_at",
            SortField::Title => "b.title",
        }
    }
}

impl SortOrder {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Raw search parameters as they arrive from a caller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BookQuery {
    pub title: Option<String>,
    pub author: Option<String>,
    pub status: Option<String>,
    pub city: Option<String>,
    pub genre_id: Option<GenreId>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Search parameters after defaults and bounds are applied. Text filters
/// hold [`search_key`] forms.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSearch {
    pub title: Option<String>,
    pub author: Option<String>,
    pub status: Option<BookStatus>,
    pub city: Option<String>,
    pub genre_id: Option<GenreId>,
    pub page: u32,
    pub limit: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(search_key)
        .filter(|v| !v.is_empty())
}

impl BookQuery {
    pub fn normalize(&self) -> Result<BookSearch> {
        let status = match non_blank(&self.status) {
            Some(raw) => Some(
                raw.parse::<BookStatus>()
                    .map_err(|_| MarketError::InvalidFilter(format!("unknown status '{}'", raw)))?,
            ),
            None => None,
        };

        let page = self.page.filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE);
        let limit = self
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT);

        Ok(BookSearch {
            title: non_blank(&self.title),
            author: non_blank(&self.author),
            status,
            city: non_blank(&self.city),
            genre_id: self.genre_id,
            page,
            limit,
            sort_by: self.sort_by.as_deref().map(SortField::parse_lenient).unwrap_or_default(),
            sort_order: self
                .sort_order
                .as_deref()
                .map(SortOrder::parse_lenient)
                .unwrap_or_default(),
        })
    }
}

impl BookSearch {
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookPage {
    pub data: Vec<Book>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl BookPage {
    pub fn new(data: Vec<Book>, search: &BookSearch, total: i64) -> Self {
        let limit = i64::from(search.limit);
        Self {
            data,
            page: search.page,
            limit: search.limit,
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}
