mod common;

use bookswap::{repository::BookRepository, BookStatus, ErrorKind, MarketError};
use common::setup;

#[tokio::test]
async fn test_reserve_is_exclusive_until_released() {
    let market = setup().await;
    let alice = market.user("Alice", "Lisbon").await;
    let dune = market.book(&alice, "Dune").await;

    market.db.reserve(dune.id).await.unwrap();
    assert_eq!(market.db.get_status(dune.id).await.unwrap(), BookStatus::Reserved);

    let err = market.db.reserve(dune.id).await.unwrap_err();
    assert!(matches!(err, MarketError::AlreadyReserved(id) if id == dune.id));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    market.db.release(dune.id).await.unwrap();
    assert_eq!(market.db.get_status(dune.id).await.unwrap(), BookStatus::Available);
    market.db.reserve(dune.id).await.unwrap();
}

#[tokio::test]
async fn test_transfer_moves_the_listing() {
    let market = setup().await;
    let alice = market.user("Alice", "Lisbon").await;
    let bob = market.user("Bob", "Porto").await;
    let dune = market.book(&alice, "Dune").await;

    market.db.transfer_ownership(dune.id, bob.id).await.unwrap();

    assert_eq!(market.books.get_book(dune.id).await.unwrap().owner_id, bob.id);
    assert!(market.books.books_by_owner(alice.id, None).await.unwrap().is_empty());
    assert_eq!(market.books.books_by_owner(bob.id, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_books() {
    let market = setup().await;
    let alice = market.user("Alice", "Lisbon").await;

    assert!(matches!(
        market.db.transfer_ownership(9999, alice.id).await,
        Err(MarketError::BookNotFound(9999))
    ));
    assert!(matches!(market.db.reserve(9999).await, Err(MarketError::BookNotFound(9999))));
    assert!(matches!(market.db.release(9999).await, Err(MarketError::BookNotFound(9999))));
    assert!(matches!(market.db.get_status(9999).await, Err(MarketError::BookNotFound(9999))));
}

#[tokio::test]
async fn test_deleted_book_cannot_be_reserved() {
    let market = setup().await;
    let alice = market.user("Alice", "Lisbon").await;
    let dune = market.book(&alice, "Dune").await;

    market.books.delete_book(dune.id, alice.id).await.unwrap();

    assert!(matches!(market.db.reserve(dune.id).await, Err(MarketError::BookNotFound(_))));
    assert!(matches!(market.db.get_status(dune.id).await, Err(MarketError::BookNotFound(_))));
}
