mod common;

use bookswap::{model::CreateReviewRequest, CreateExchangeRequest, ErrorKind, MarketError};
use common::setup;

#[tokio::test]
async fn test_reviews_feed_profile_rating() {
    let market = setup().await;
    let alice = market.user("Alice", "Lisbon").await;
    let bob = market.user("Bob", "Porto").await;
    let carol = market.user("Carol", "Faro").await;
    let dune = market.book(&alice, "Dune").await;

    for (author, rating) in [(&bob, 5), (&carol, 4)] {
        market
            .reviews
            .create_review(
                author.id,
                CreateReviewRequest {
                    target_user_id: alice.id,
                    target_book_id: dune.id,
                    text: "Smooth swap, book as described".to_string(),
                    rating,
                },
            )
            .await
            .unwrap();
    }

    let summary = market.reviews.rating_summary(alice.id).await.unwrap();
    assert_eq!(summary.count, 2);
    assert_eq!(summary.average, Some(4.5));

    let profile = market.users.profile(alice.id).await.unwrap();
    assert_eq!(profile.review_count, 2);
    assert_eq!(profile.average_rating, Some(4.5));
    assert_eq!(profile.books_count, 1);

    let unrated = market.users.profile(bob.id).await.unwrap();
    assert_eq!(unrated.review_count, 0);
    assert_eq!(unrated.average_rating, None);

    assert_eq!(market.reviews.reviews_for_book(dune.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_review_rules() {
    let market = setup().await;
    let alice = market.user("Alice", "Lisbon").await;
    let bob = market.user("Bob", "Porto").await;
    let dune = market.book(&alice, "Dune").await;

    let request = |text: &str, rating: i32| CreateReviewRequest {
        target_user_id: alice.id,
        target_book_id: dune.id,
        text: text.to_string(),
        rating,
    };

    let err = market.reviews.create_review(bob.id, request("short", 4)).await.unwrap_err();
    assert!(matches!(err, MarketError::TextLength));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let err = market
        .reviews
        .create_review(bob.id, request("Great copy, quick meetup", 6))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidRating));

    let err = market
        .reviews
        .create_review(alice.id, request("Great copy, quick meetup", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::SelfReviewForbidden));

    // Exactly 150 characters once trimmed.
    let longest = format!("  {}  ", "a".repeat(150));
    let review = market.reviews.create_review(bob.id, request(&longest, 3)).await.unwrap();
    assert_eq!(review.text.chars().count(), 150);

    let err = market.reviews.delete_review(review.id, alice.id).await.unwrap_err();
    assert!(matches!(err, MarketError::Forbidden));
    market.reviews.delete_review(review.id, bob.id).await.unwrap();
    assert!(market.reviews.reviews_for_user(alice.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_counts_completed_exchanges() {
    let market = setup().await;
    let alice = market.user("Alice", "Lisbon").await;
    let bob = market.user("Bob", "Porto").await;
    let dune = market.book(&alice, "Dune").await;
    let emma = market.book(&bob, "Emma").await;

    let exchange = market
        .exchanges
        .create_exchange(
            alice.id,
            CreateExchangeRequest {
                recipient_id: bob.id,
                initiator_book_id: dune.id,
                recipient_book_id: emma.id,
            },
        )
        .await
        .unwrap();
    assert_eq!(market.users.profile(alice.id).await.unwrap().successful_exchanges_count, 0);

    market.exchanges.accept_exchange(exchange.id, bob.id).await.unwrap();
    market.exchanges.complete_exchange(exchange.id, bob.id).await.unwrap();

    let profile = market.users.profile(alice.id).await.unwrap();
    assert_eq!(profile.successful_exchanges_count, 1);
    assert_eq!(profile.books_count, 1);
    assert_eq!(market.users.profile(bob.id).await.unwrap().successful_exchanges_count, 1);
}

#[tokio::test]
async fn test_duplicate_email_is_a_conflict() {
    let market = setup().await;
    market.user("Alice", "Lisbon").await;

    let err = market
        .users
        .create_user(bookswap::model::CreateUserRequest {
            name: "Other Alice".to_string(),
            email: "alice@example.com".to_string(),
            city: String::new(),
            address: String::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::EmailTaken));
    assert_eq!(err.kind(), ErrorKind::Conflict);
}
