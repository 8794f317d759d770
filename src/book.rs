use crate::{
    error::{MarketError, Result},
    model::{Book, BookPage, BookQuery, BookStatus, CreateBookRequest, NewBook, UpdateBookRequest},
    repository::BookRepository,
    summary::Summarizer,
    BookId, UserId,
};
use std::sync::Arc;

/// Listing management and catalogue search. Never writes book status; that
/// belongs to the exchange workflow.
#[derive(Clone)]
pub struct BookService {
    books: Arc<dyn BookRepository>,
    summarizer: Arc<dyn Summarizer>,
}

impl BookService {
    pub fn new(books: Arc<dyn BookRepository>, summarizer: Arc<dyn Summarizer>) -> Self {
        Self { books, summarizer }
    }

    pub async fn create_book(&self, owner_id: UserId, request: CreateBookRequest) -> Result<Book> {
        request.validate()?;

        let ai_summary = match request
            .ai_summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(summary) => summary.to_string(),
            None => self.summarizer.summarize(&request.description).await,
        };

        let mut genre_ids = request.genre_ids.clone();
        genre_ids.sort_unstable();
        genre_ids.dedup();

        let book = self
            .books
            .create_book(NewBook {
                title: request.title.trim().to_string(),
                author: request.author.trim().to_string(),
                description: request.description.trim().to_string(),
                ai_summary,
                owner_id,
                genre_ids,
            })
            .await?;

        tracing::info!(book_id = book.id, owner_id, "book listed");
        Ok(book)
    }

    pub async fn get_book(&self, book_id: BookId) -> Result<Book> {
        self.books
            .get_book(book_id)
            .await?
            .ok_or(MarketError::BookNotFound(book_id))
    }

    pub async fn update_book(
        &self,
        book_id: BookId,
        acting_user: UserId,
        request: UpdateBookRequest,
    ) -> Result<Book> {
        let book = self.get_book(book_id).await?;
        if book.owner_id != acting_user {
            tracing::warn!(book_id, acting_user, "book update by non-owner rejected");
            return Err(MarketError::Forbidden);
        }

        match request.description {
            Some(description) => self.books.update_description(book_id, description).await,
            None => Ok(book),
        }
    }

    /// Owners may delete their listings, unless an exchange currently holds them.
    pub async fn delete_book(&self, book_id: BookId, acting_user: UserId) -> Result<()> {
        let book = self.get_book(book_id).await?;
        if book.owner_id != acting_user {
            tracing::warn!(book_id, acting_user, "book delete by non-owner rejected");
            return Err(MarketError::Forbidden);
        }
        if book.status == BookStatus::Reserved {
            return Err(MarketError::BookReserved);
        }

        // The store re-checks availability, a reservation may have landed since the read.
        self.books.delete_book(book_id).await?;
        tracing::info!(book_id, acting_user, "book deleted");
        Ok(())
    }

    pub async fn search_books(&self, query: BookQuery) -> Result<BookPage> {
        let search = query.normalize()?;
        let (books, total) = self.books.search_books(&search).await?;
        Ok(BookPage::new(books, &search, total))
    }

    pub async fn books_by_owner(&self, owner_id: UserId, status: Option<BookStatus>) -> Result<Vec<Book>> {
        self.books.books_by_owner(owner_id, status).await
    }

    pub async fn available_books(&self, city: Option<String>) -> Result<Vec<Book>> {
        self.books.available_books(city).await
    }
}
