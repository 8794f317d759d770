//! HTTP adapter. Decodes requests, resolves the acting user from the bearer
//! token and maps error kinds onto status codes; all rules live in the services.

use crate::{
    auth::TokenVerifier,
    book::BookService,
    database::Database,
    error::{ErrorKind, MarketError},
    exchange::ExchangeService,
    genre::GenreService,
    model::{
        Book, BookPage, BookQuery, BookStatus, CreateBookRequest, CreateExchangeRequest,
        CreateGenreRequest, CreateReviewRequest, CreateUserRequest, Exchange, ExchangeStatus,
        Genre, Review, UpdateBookRequest, UpdateUserRequest, User, UserListQuery, UserPage,
        UserProfile,
    },
    review::ReviewService,
    summary::Summarizer,
    user::UserService,
    BookId, ExchangeId, GenreId, ReviewId, UserId,
};
use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, State,
    },
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub exchanges: ExchangeService,
    pub books: BookService,
    pub reviews: ReviewService,
    pub users: UserService,
    pub genres: GenreService,
    pub verifier: TokenVerifier,
}

impl AppState {
    pub fn new(database: Database, summarizer: Arc<dyn Summarizer>, verifier: TokenVerifier) -> Self {
        let db = Arc::new(database);

        Self {
            exchanges: ExchangeService::new(db.clone(), db.clone()),
            books: BookService::new(db.clone(), summarizer),
            reviews: ReviewService::new(db.clone()),
            users: UserService::new(db.clone(), db.clone(), db.clone(), db.clone()),
            genres: GenreService::new(db),
            verifier,
        }
    }
}

pub struct ApiError(pub MarketError);

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        if let MarketError::Auth(_) = err {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized", "message": err.to_string()})),
            )
                .into_response();
        }

        let kind = err.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidState | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if kind == ErrorKind::Internal {
            tracing::error!(error = %err, "request failed");
            "internal error".to_string()
        } else {
            err.to_string()
        };

        (status, Json(json!({"error": kind, "message": message}))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(MarketError::MalformedRequest(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(MarketError::MalformedRequest(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(MarketError::MalformedRequest(rejection.body_text()))
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// JSON body whose decode failures answer with the error envelope.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

/// The authenticated caller.
pub struct ActingUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for ActingUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        Ok(ActingUser(state.verifier.authenticate(header)?))
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CityFilter {
    pub city: Option<String>,
}

fn parse_filter<T: FromStr>(raw: Option<&str>) -> ApiResult<Option<T>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| MarketError::InvalidFilter(format!("unknown status '{}'", value)).into()),
        None => Ok(None),
    }
}

fn done(message: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": message }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(create_user).get(list_users))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/users/:id/profile", get(get_profile))
        .route("/users/:id/books", get(get_user_books))
        .route("/users/:id/exchanges", get(get_user_exchanges))
        .route("/users/:id/reviews", get(get_user_reviews))
        .route("/books", post(create_book).get(search_books))
        .route("/books/available", get(available_books))
        .route(
            "/books/:id",
            get(get_book).patch(update_book).delete(delete_book),
        )
        .route("/books/:id/reviews", get(get_book_reviews))
        .route("/exchanges", post(create_exchange).get(list_exchanges))
        .route("/exchanges/:id", get(get_exchange))
        .route("/exchanges/:id/accept", put(accept_exchange))
        .route("/exchanges/:id/complete", put(complete_exchange))
        .route("/exchanges/:id/cancel", put(cancel_exchange))
        .route("/genres", post(create_genre).get(list_genres))
        .route("/genres/:id", get(get_genre).delete(delete_genre))
        .route("/reviews", post(create_review))
        .route("/reviews/:id", axum::routing::delete(delete_review))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

async fn create_user(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.users.create_user(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn list_users(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UserListQuery>,
) -> ApiResult<Json<UserPage>> {
    Ok(Json(state.users.list_users(query).await?))
}

async fn get_user(State(state): State<AppState>, ApiPath(id): ApiPath<UserId>) -> ApiResult<Json<User>> {
    Ok(Json(state.users.get_user(id).await?))
}

async fn update_user(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiPath(id): ApiPath<UserId>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.update_user(id, user_id, request).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<StatusCode> {
    state.users.delete_user(id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_profile(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(state.users.profile(id).await?))
}

async fn get_user_books(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<UserId>,
    ApiQuery(filter): ApiQuery<StatusFilter>,
) -> ApiResult<Json<Vec<Book>>> {
    let status = parse_filter::<BookStatus>(filter.status.as_deref())?;
    Ok(Json(state.books.books_by_owner(id, status).await?))
}

async fn get_user_exchanges(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<UserId>,
    ApiQuery(filter): ApiQuery<StatusFilter>,
) -> ApiResult<Json<Vec<Exchange>>> {
    let status = parse_filter::<ExchangeStatus>(filter.status.as_deref())?;
    Ok(Json(state.exchanges.user_exchanges(id, status).await?))
}

async fn get_user_reviews(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<UserId>,
) -> ApiResult<Json<Vec<Review>>> {
    Ok(Json(state.reviews.reviews_for_user(id).await?))
}

async fn create_book(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiJson(request): ApiJson<CreateBookRequest>,
) -> ApiResult<(StatusCode, Json<Book>)> {
    let book = state.books.create_book(user_id, request).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn search_books(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<BookQuery>,
) -> ApiResult<Json<BookPage>> {
    Ok(Json(state.books.search_books(query).await?))
}

async fn available_books(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<CityFilter>,
) -> ApiResult<Json<Vec<Book>>> {
    Ok(Json(state.books.available_books(filter.city).await?))
}

async fn get_book(State(state): State<AppState>, ApiPath(id): ApiPath<BookId>) -> ApiResult<Json<Book>> {
    Ok(Json(state.books.get_book(id).await?))
}

async fn update_book(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiPath(id): ApiPath<BookId>,
    ApiJson(request): ApiJson<UpdateBookRequest>,
) -> ApiResult<Json<Book>> {
    Ok(Json(state.books.update_book(id, user_id, request).await?))
}

async fn delete_book(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiPath(id): ApiPath<BookId>,
) -> ApiResult<StatusCode> {
    state.books.delete_book(id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_book_reviews(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<BookId>,
) -> ApiResult<Json<Vec<Review>>> {
    Ok(Json(state.reviews.reviews_for_book(id).await?))
}

async fn create_exchange(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiJson(request): ApiJson<CreateExchangeRequest>,
) -> ApiResult<(StatusCode, Json<Exchange>)> {
    let exchange = state.exchanges.create_exchange(user_id, request).await?;
    Ok((StatusCode::CREATED, Json(exchange)))
}

async fn list_exchanges(State(state): State<AppState>) -> ApiResult<Json<Vec<Exchange>>> {
    Ok(Json(state.exchanges.list_exchanges().await?))
}

async fn get_exchange(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<ExchangeId>,
) -> ApiResult<Json<Exchange>> {
    Ok(Json(state.exchanges.get_exchange(id).await?))
}

async fn accept_exchange(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiPath(id): ApiPath<ExchangeId>,
) -> ApiResult<Json<serde_json::Value>> {
    state.exchanges.accept_exchange(id, user_id).await?;
    Ok(done("Exchange accepted successfully"))
}

async fn complete_exchange(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiPath(id): ApiPath<ExchangeId>,
) -> ApiResult<Json<serde_json::Value>> {
    state.exchanges.complete_exchange(id, user_id).await?;
    Ok(done("Exchange completed successfully"))
}

async fn cancel_exchange(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiPath(id): ApiPath<ExchangeId>,
) -> ApiResult<Json<serde_json::Value>> {
    state.exchanges.cancel_exchange(id, user_id).await?;
    Ok(done("Exchange cancelled successfully"))
}

async fn create_genre(
    State(state): State<AppState>,
    ActingUser(_): ActingUser,
    ApiJson(request): ApiJson<CreateGenreRequest>,
) -> ApiResult<(StatusCode, Json<Genre>)> {
    let genre = state.genres.create_genre(request).await?;
    Ok((StatusCode::CREATED, Json(genre)))
}

async fn list_genres(State(state): State<AppState>) -> ApiResult<Json<Vec<Genre>>> {
    Ok(Json(state.genres.list_genres().await?))
}

async fn get_genre(State(state): State<AppState>, ApiPath(id): ApiPath<GenreId>) -> ApiResult<Json<Genre>> {
    Ok(Json(state.genres.get_genre(id).await?))
}

async fn delete_genre(
    State(state): State<AppState>,
    ActingUser(_): ActingUser,
    ApiPath(id): ApiPath<GenreId>,
) -> ApiResult<StatusCode> {
    state.genres.delete_genre(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_review(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiJson(request): ApiJson<CreateReviewRequest>,
) -> ApiResult<(StatusCode, Json<Review>)> {
    let review = state.reviews.create_review(user_id, request).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

async fn delete_review(
    State(state): State<AppState>,
    ActingUser(user_id): ActingUser,
    ApiPath(id): ApiPath<ReviewId>,
) -> ApiResult<StatusCode> {
    state.reviews.delete_review(id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
