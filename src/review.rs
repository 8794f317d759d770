use crate::{
    error::{MarketError, Result},
    model::{CreateReviewRequest, NewReview, RatingSummary, Review},
    repository::ReviewRepository,
    BookId, ReviewId, UserId,
};
use std::sync::Arc;

/// Post-exchange feedback. Aggregates are computed when read, never stored.
#[derive(Clone)]
pub struct ReviewService {
    reviews: Arc<dyn ReviewRepository>,
}

impl ReviewService {
    pub fn new(reviews: Arc<dyn ReviewRepository>) -> Self {
        Self { reviews }
    }

    pub async fn create_review(&self, author_id: UserId, request: CreateReviewRequest) -> Result<Review> {
        let text = request.validate(author_id).map_err(|e| {
            tracing::warn!(author_id, error = %e, "review rejected");
            e
        })?;

        let review = self
            .reviews
            .create_review(NewReview {
                author_id,
                target_user_id: request.target_user_id,
                target_book_id: request.target_book_id,
                text,
                rating: request.rating,
            })
            .await?;

        tracing::info!(review_id = review.id, author_id, "review created");
        Ok(review)
    }

    pub async fn delete_review(&self, review_id: ReviewId, acting_user: UserId) -> Result<()> {
        let review = self
            .reviews
            .get_review(review_id)
            .await?
            .ok_or(MarketError::ReviewNotFound(review_id))?;

        if review.author_id != acting_user {
            tracing::warn!(review_id, acting_user, "review delete by non-author rejected");
            return Err(MarketError::Forbidden);
        }

        self.reviews.delete_review(review_id).await?;
        tracing::info!(review_id, acting_user, "review deleted");
        Ok(())
    }

    pub async fn reviews_for_user(&self, user_id: UserId) -> Result<Vec<Review>> {
        self.reviews.reviews_for_user(user_id).await
    }

    pub async fn reviews_for_book(&self, book_id: BookId) -> Result<Vec<Review>> {
        self.reviews.reviews_for_book(book_id).await
    }

    pub async fn rating_summary(&self, user_id: UserId) -> Result<RatingSummary> {
        self.reviews.rating_summary(user_id).await
    }
}
