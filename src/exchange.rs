//! Exchange workflow engine.
//!
//! ```text
//! pending --accept(recipient)--> accepted --complete(either party)--> completed
//! pending --cancel(initiator)--> cancelled
//! ```
//!
//! Every check runs before the ledger is touched, so a rejected call leaves
//! exchanges and books exactly as they were.

use crate::{
    error::{MarketError, Result},
    model::{Book, CreateExchangeRequest, Exchange, ExchangeStatus, NewExchange},
    repository::{BookRepository, ExchangeRepository},
    BookId, ExchangeId, UserId,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct ExchangeService {
    exchanges: Arc<dyn ExchangeRepository>,
    books: Arc<dyn BookRepository>,
}

impl ExchangeService {
    pub fn new(exchanges: Arc<dyn ExchangeRepository>, books: Arc<dyn BookRepository>) -> Self {
        Self { exchanges, books }
    }

    pub async fn create_exchange(
        &self,
        initiator_id: UserId,
        request: CreateExchangeRequest,
    ) -> Result<Exchange> {
        if initiator_id == request.recipient_id {
            tracing::warn!(initiator_id, "rejected exchange with self");
            return Err(MarketError::SameParty);
        }

        let initiator_book = self.fetch_book(request.initiator_book_id).await?;
        let recipient_book = self.fetch_book(request.recipient_book_id).await?;

        if initiator_book.owner_id != initiator_id {
            return Err(self.reject("create", MarketError::InitiatorNotOwner));
        }
        if recipient_book.owner_id != request.recipient_id {
            return Err(self.reject("create", MarketError::RecipientNotOwner));
        }
        if !initiator_book.is_available() {
            return Err(self.reject("create", MarketError::InitiatorBookUnavailable));
        }
        if !recipient_book.is_available() {
            return Err(self.reject("create", MarketError::RecipientBookUnavailable));
        }

        let exchange = self
            .exchanges
            .create_exchange(NewExchange {
                initiator_id,
                recipient_id: request.recipient_id,
                initiator_book_id: initiator_book.id,
                recipient_book_id: recipient_book.id,
            })
            .await
            .map_err(|e| self.reject("create", e))?;

        tracing::info!(
            exchange_id = exchange.id,
            initiator_id,
            recipient_id = exchange.recipient_id,
            "exchange proposed"
        );
        Ok(exchange)
    }

    pub async fn accept_exchange(&self, exchange_id: ExchangeId, acting_user: UserId) -> Result<()> {
        let mut exchange = self.load(exchange_id).await?;
        exchange
            .accept(acting_user)
            .map_err(|e| self.reject("accept", e))?;

        self.exchanges
            .accept_exchange(&exchange)
            .await
            .map_err(|e| self.reject("accept", e))?;

        tracing::info!(exchange_id, acting_user, "exchange accepted");
        Ok(())
    }

    pub async fn complete_exchange(&self, exchange_id: ExchangeId, acting_user: UserId) -> Result<()> {
        let mut exchange = self.load(exchange_id).await?;
        exchange
            .complete(acting_user)
            .map_err(|e| self.reject("complete", e))?;

        self.exchanges
            .complete_exchange(&exchange)
            .await
            .map_err(|e| self.reject("complete", e))?;

        tracing::info!(exchange_id, acting_user, "exchange completed, owners swapped");
        Ok(())
    }

    pub async fn cancel_exchange(&self, exchange_id: ExchangeId, acting_user: UserId) -> Result<()> {
        let mut exchange = self.load(exchange_id).await?;
        exchange
            .cancel(acting_user)
            .map_err(|e| self.reject("cancel", e))?;

        self.exchanges
            .cancel_exchange(&exchange)
            .await
            .map_err(|e| self.reject("cancel", e))?;

        tracing::info!(exchange_id, acting_user, "exchange cancelled, books released");
        Ok(())
    }

    pub async fn get_exchange(&self, exchange_id: ExchangeId) -> Result<Exchange> {
        self.load(exchange_id).await
    }

    pub async fn list_exchanges(&self) -> Result<Vec<Exchange>> {
        self.exchanges.list_exchanges().await
    }

    pub async fn user_exchanges(
        &self,
        user_id: UserId,
        status: Option<ExchangeStatus>,
    ) -> Result<Vec<Exchange>> {
        self.exchanges.exchanges_for_user(user_id, status).await
    }

    async fn load(&self, exchange_id: ExchangeId) -> Result<Exchange> {
        if exchange_id <= 0 {
            return Err(MarketError::InvalidId);
        }

        self.exchanges
            .get_exchange(exchange_id)
            .await?
            .ok_or(MarketError::ExchangeNotFound(exchange_id))
    }

    async fn fetch_book(&self, book_id: BookId) -> Result<Book> {
        self.books
            .get_book(book_id)
            .await?
            .ok_or(MarketError::BookNotFound(book_id))
    }

    fn reject(&self, operation: &'static str, error: MarketError) -> MarketError {
        match error.kind() {
            crate::ErrorKind::Internal => {
                tracing::error!(operation, error = %error, "exchange storage failure")
            }
            kind => tracing::warn!(operation, %kind, error = %error, "exchange rejected"),
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookStatus;
    use crate::repository::{MockBookRepository, MockExchangeRepository};
    use chrono::Utc;
    use mockall::predicate::eq;

    fn book(id: BookId, owner_id: UserId, status: BookStatus) -> Book {
        Book {
            id,
            title: format!("Book {id}"),
            author: "Author".to_string(),
            description: String::new(),
            ai_summary: String::new(),
            status,
            owner_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            genres: Vec::new(),
        }
    }

    fn exchange(status: ExchangeStatus) -> Exchange {
        Exchange {
            id: 3,
            initiator_id: 1,
            recipient_id: 7,
            initiator_book_id: 10,
            recipient_book_id: 20,
            status,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn request() -> CreateExchangeRequest {
        CreateExchangeRequest {
            recipient_id: 7,
            initiator_book_id: 10,
            recipient_book_id: 20,
        }
    }

    fn service(exchanges: MockExchangeRepository, books: MockBookRepository) -> ExchangeService {
        ExchangeService::new(Arc::new(exchanges), Arc::new(books))
    }

    fn books_with(initiator: Book, recipient: Book) -> MockBookRepository {
        let mut books = MockBookRepository::new();
        books
            .expect_get_book()
            .with(eq(initiator.id))
            .returning(move |_| Ok(Some(initiator.clone())));
        books
            .expect_get_book()
            .with(eq(recipient.id))
            .returning(move |_| Ok(Some(recipient.clone())));
        books
    }

    fn with_exchange(current: Exchange) -> MockExchangeRepository {
        let mut exchanges = MockExchangeRepository::new();
        exchanges
            .expect_get_exchange()
            .with(eq(current.id))
            .returning(move |_| Ok(Some(current.clone())));
        exchanges
    }

    #[tokio::test]
    async fn test_same_party_fails_before_any_lookup() {
        let svc = service(MockExchangeRepository::new(), MockBookRepository::new());
        let mut req = request();
        req.recipient_id = 1;

        let err = svc.create_exchange(1, req).await.unwrap_err();
        assert!(matches!(err, MarketError::SameParty));
    }

    #[tokio::test]
    async fn test_missing_book_is_not_found() {
        let mut books = MockBookRepository::new();
        books.expect_get_book().returning(|_| Ok(None));
        let svc = service(MockExchangeRepository::new(), books);

        let err = svc.create_exchange(1, request()).await.unwrap_err();
        assert!(matches!(err, MarketError::BookNotFound(10)));
    }

    #[tokio::test]
    async fn test_ownership_checked_in_order() {
        let svc = service(
            MockExchangeRepository::new(),
            books_with(book(10, 2, BookStatus::Available), book(20, 7, BookStatus::Available)),
        );
        assert!(matches!(
            svc.create_exchange(1, request()).await,
            Err(MarketError::InitiatorNotOwner)
        ));

        let svc = service(
            MockExchangeRepository::new(),
            books_with(book(10, 1, BookStatus::Available), book(20, 8, BookStatus::Available)),
        );
        assert!(matches!(
            svc.create_exchange(1, request()).await,
            Err(MarketError::RecipientNotOwner)
        ));
    }

    #[tokio::test]
    async fn test_reserved_books_are_unavailable() {
        let svc = service(
            MockExchangeRepository::new(),
            books_with(book(10, 1, BookStatus::Reserved), book(20, 7, BookStatus::Available)),
        );
        assert!(matches!(
            svc.create_exchange(1, request()).await,
            Err(MarketError::InitiatorBookUnavailable)
        ));

        let svc = service(
            MockExchangeRepository::new(),
            books_with(book(10, 1, BookStatus::Available), book(20, 7, BookStatus::Reserved)),
        );
        assert!(matches!(
            svc.create_exchange(1, request()).await,
            Err(MarketError::RecipientBookUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_create_hands_validated_exchange_to_ledger() {
        let mut exchanges = MockExchangeRepository::new();
        exchanges
            .expect_create_exchange()
            .with(eq(NewExchange {
                initiator_id: 1,
                recipient_id: 7,
                initiator_book_id: 10,
                recipient_book_id: 20,
            }))
            .times(1)
            .returning(|_| Ok(exchange(ExchangeStatus::Pending)));
        let svc = service(
            exchanges,
            books_with(book(10, 1, BookStatus::Available), book(20, 7, BookStatus::Available)),
        );

        let created = svc.create_exchange(1, request()).await.unwrap();
        assert_eq!(created.id, 3);
        assert_eq!(created.status, ExchangeStatus::Pending);
    }

    #[tokio::test]
    async fn test_lost_reservation_race_surfaces_conflict() {
        let mut exchanges = MockExchangeRepository::new();
        exchanges
            .expect_create_exchange()
            .returning(|_| Err(MarketError::AlreadyReserved(20)));
        let svc = service(
            exchanges,
            books_with(book(10, 1, BookStatus::Available), book(20, 7, BookStatus::Available)),
        );

        let err = svc.create_exchange(1, request()).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_invalid_id_skips_storage() {
        let svc = service(MockExchangeRepository::new(), MockBookRepository::new());
        assert!(matches!(svc.accept_exchange(0, 7).await, Err(MarketError::InvalidId)));
        assert!(matches!(svc.complete_exchange(-1, 7).await, Err(MarketError::InvalidId)));
        assert!(matches!(svc.cancel_exchange(0, 1).await, Err(MarketError::InvalidId)));
    }

    #[tokio::test]
    async fn test_unknown_exchange_is_not_found() {
        let mut exchanges = MockExchangeRepository::new();
        exchanges.expect_get_exchange().returning(|_| Ok(None));
        let svc = service(exchanges, MockBookRepository::new());

        assert!(matches!(
            svc.get_exchange(42).await,
            Err(MarketError::ExchangeNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_accept_by_recipient_only() {
        let mut exchanges = with_exchange(exchange(ExchangeStatus::Pending));
        exchanges
            .expect_accept_exchange()
            .withf(|e: &Exchange| e.status == ExchangeStatus::Accepted)
            .times(1)
            .returning(|_| Ok(()));
        let svc = service(exchanges, MockBookRepository::new());

        assert!(matches!(svc.accept_exchange(3, 5).await, Err(MarketError::Forbidden)));
        svc.accept_exchange(3, 7).await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_requires_accepted() {
        let svc = service(
            with_exchange(exchange(ExchangeStatus::Pending)),
            MockBookRepository::new(),
        );
        assert!(matches!(svc.complete_exchange(3, 1).await, Err(MarketError::NotAccepted)));

        let svc = service(
            with_exchange(exchange(ExchangeStatus::Completed)),
            MockBookRepository::new(),
        );
        assert!(matches!(svc.complete_exchange(3, 1).await, Err(MarketError::NotAccepted)));
    }

    #[tokio::test]
    async fn test_complete_by_outsider_forbidden() {
        let svc = service(
            with_exchange(exchange(ExchangeStatus::Accepted)),
            MockBookRepository::new(),
        );
        assert!(matches!(svc.complete_exchange(3, 99).await, Err(MarketError::Forbidden)));
    }

    #[tokio::test]
    async fn test_complete_passes_timestamp_to_ledger() {
        let mut exchanges = with_exchange(exchange(ExchangeStatus::Accepted));
        exchanges
            .expect_complete_exchange()
            .withf(|e: &Exchange| e.status == ExchangeStatus::Completed && e.completed_at.is_some())
            .times(1)
            .returning(|_| Ok(()));
        let svc = service(exchanges, MockBookRepository::new());

        svc.complete_exchange(3, 7).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_rules() {
        let svc = service(
            with_exchange(exchange(ExchangeStatus::Accepted)),
            MockBookRepository::new(),
        );
        assert!(matches!(svc.cancel_exchange(3, 1).await, Err(MarketError::NotPending)));

        let mut exchanges = with_exchange(exchange(ExchangeStatus::Pending));
        exchanges
            .expect_cancel_exchange()
            .withf(|e: &Exchange| e.status == ExchangeStatus::Cancelled && e.completed_at.is_none())
            .times(1)
            .returning(|_| Ok(()));
        let svc = service(exchanges, MockBookRepository::new());

        assert!(matches!(svc.cancel_exchange(3, 7).await, Err(MarketError::Forbidden)));
        svc.cancel_exchange(3, 1).await.unwrap();
    }
}
