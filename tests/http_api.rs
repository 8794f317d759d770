use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use bookswap::{
    http::{router, AppState},
    Claims, Database, LocalSummarizer, TokenVerifier,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

struct TestApp {
    _file: NamedTempFile,
    router: Router,
}

async fn app() -> TestApp {
    let file = NamedTempFile::new().unwrap();
    let db_url = format!("sqlite://{}", file.path().to_string_lossy());
    let database = Database::new(&db_url).await.unwrap();
    let state = AppState::new(
        database,
        Arc::new(LocalSummarizer::default()),
        TokenVerifier::new(SECRET),
    );

    TestApp {
        _file: file,
        router: router(state),
    }
}

fn token(user_id: i64) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::hours(1)).timestamp() as usize,
        iat: now.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, user: Option<i64>, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token(user_id)));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn user(&self, name: &str) -> i64 {
        let (status, body) = self
            .call(
                Method::POST,
                "/users",
                None,
                Some(json!({"name": name, "email": format!("{}@example.com", name), "city": "Lisbon"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    async fn book(&self, owner: i64, title: &str) -> i64 {
        let (status, body) = self
            .call(
                Method::POST,
                "/books",
                Some(owner),
                Some(json!({"title": title, "author": "Someone", "description": "Paperback"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_exchange_over_http() {
    let app = app().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;
    let dune = app.book(alice, "Dune").await;
    let emma = app.book(bob, "Emma").await;

    let (status, exchange) = app
        .call(
            Method::POST,
            "/exchanges",
            Some(alice),
            Some(json!({"recipient_id": bob, "initiator_book_id": dune, "recipient_book_id": emma})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(exchange["status"], "pending");
    let id = exchange["id"].as_i64().unwrap();

    let (status, body) = app
        .call(Method::PUT, &format!("/exchanges/{id}/accept"), Some(alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = app
        .call(Method::PUT, &format!("/exchanges/{id}/accept"), Some(bob), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(Method::PUT, &format!("/exchanges/{id}/cancel"), Some(alice), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let (status, _) = app
        .call(Method::PUT, &format!("/exchanges/{id}/complete"), Some(alice), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, book) = app.call(Method::GET, &format!("/books/{dune}"), None, None).await;
    assert_eq!(book["owner_id"], bob);
    assert_eq!(book["status"], "available");

    let (status, completed) = app
        .call(Method::GET, &format!("/users/{alice}/exchanges?status=completed"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed.as_array().unwrap().len(), 1);

    let (_, profile) = app.call(Method::GET, &format!("/users/{bob}/profile"), None, None).await;
    assert_eq!(profile["successful_exchanges_count"], 1);
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app().await;
    let alice = app.user("alice").await;
    let dune = app.book(alice, "Dune").await;

    let (status, body) = app
        .call(Method::POST, "/books", None, Some(json!({"title": "x", "author": "y"})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, body) = app.call(Method::GET, "/exchanges/77", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = app
        .call(Method::GET, &format!("/users/{alice}/books?status=lost"), None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    let (status, _) = app
        .call(
            Method::POST,
            "/exchanges",
            Some(alice),
            Some(json!({"recipient_id": alice, "initiator_book_id": dune, "recipient_book_id": dune})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .call(
            Method::POST,
            "/users",
            None,
            Some(json!({"name": "Alice Again", "email": "alice@example.com"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn test_search_and_delete_over_http() {
    let app = app().await;
    let alice = app.user("alice").await;
    let dune = app.book(alice, "Dune").await;
    app.book(alice, "Emma").await;

    let (status, page) = app
        .call(Method::GET, "/books?title=du&page=1&limit=5", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["data"][0]["title"], "Dune");

    let (status, _) = app
        .call(Method::DELETE, &format!("/books/{dune}"), Some(alice), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.call(Method::GET, &format!("/books/{dune}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_requests_use_error_envelope() {
    let app = app().await;
    let alice = app.user("alice").await;

    let (status, body) = app.call(Method::GET, "/exchanges/abc", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
    assert!(body["message"].is_string());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/books")
        .header(header::AUTHORIZATION, format!("Bearer {}", token(alice)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"title\": \"Dune\""))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "invalid_input");

    let (status, body) = app
        .call(Method::POST, "/exchanges", Some(alice), Some(json!({"recipient_id": "bob"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");

    let (status, body) = app.call(Method::GET, "/users?limit=lots", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn test_genres_over_http() {
    let app = app().await;
    let alice = app.user("alice").await;

    let (status, _) = app
        .call(Method::POST, "/genres", None, Some(json!({"name": "Fantasy"})))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, genre) = app
        .call(Method::POST, "/genres", Some(alice), Some(json!({"name": "Fantasy"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let genre_id = genre["id"].as_i64().unwrap();

    let (status, book) = app
        .call(
            Method::POST,
            "/books",
            Some(alice),
            Some(json!({"title": "The Hobbit", "author": "Tolkien", "genre_ids": [genre_id]})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(book["genres"][0]["name"], "Fantasy");
    app.book(alice, "Emma").await;

    let (_, page) = app
        .call(Method::GET, &format!("/books?genre_id={genre_id}"), None, None)
        .await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["data"][0]["title"], "The Hobbit");

    let (status, list) = app.call(Method::GET, "/genres", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = app
        .call(Method::DELETE, &format!("/genres/{genre_id}"), Some(alice), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.call(Method::GET, &format!("/genres/{genre_id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_user_management_over_http() {
    let app = app().await;
    let alice = app.user("alice").await;
    let bob = app.user("bob").await;

    let (status, page) = app.call(Method::GET, "/users?limit=1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"][0]["id"], alice);
    assert_eq!(page["meta"]["has_next"], true);
    let next = page["meta"]["next_id"].as_i64().unwrap();

    let (_, page) = app
        .call(Method::GET, &format!("/users?limit=1&last_id={next}"), None, None)
        .await;
    assert_eq!(page["data"][0]["id"], bob);

    let (status, _) = app
        .call(Method::PATCH, &format!("/users/{bob}"), Some(alice), Some(json!({"name": "Mallory"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, user) = app
        .call(Method::PATCH, &format!("/users/{alice}"), Some(alice), Some(json!({"city": "Porto"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["city"], "Porto");
    assert_eq!(user["name"], "alice");

    let (status, _) = app
        .call(Method::DELETE, &format!("/users/{alice}"), Some(alice), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.call(Method::GET, &format!("/users/{alice}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
