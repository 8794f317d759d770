use crate::{
    error::{MarketError, Result},
    model::{CreateUserRequest, UpdateUserRequest, User, UserListQuery, UserPage, UserProfile},
    repository::{BookRepository, ExchangeRepository, ReviewRepository, UserRepository},
    UserId,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserRepository>,
    books: Arc<dyn BookRepository>,
    exchanges: Arc<dyn ExchangeRepository>,
    reviews: Arc<dyn ReviewRepository>,
}

impl UserService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        books: Arc<dyn BookRepository>,
        exchanges: Arc<dyn ExchangeRepository>,
        reviews: Arc<dyn ReviewRepository>,
    ) -> Self {
        Self {
            users,
            books,
            exchanges,
            reviews,
        }
    }

    pub async fn create_user(&self, request: CreateUserRequest) -> Result<User> {
        request.validate()?;
        let user = self.users.create_user(request).await?;
        tracing::info!(user_id = user.id, "user registered");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<User> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or(MarketError::UserNotFound(user_id))
    }

    /// Users edit only their own account. Absent fields are left as they are.
    pub async fn update_user(
        &self,
        user_id: UserId,
        acting_user: UserId,
        request: UpdateUserRequest,
    ) -> Result<User> {
        if user_id != acting_user {
            tracing::warn!(user_id, acting_user, "user update by someone else rejected");
            return Err(MarketError::Forbidden);
        }
        request.validate()?;

        let mut user = self.get_user(user_id).await?;
        request.apply(&mut user);
        let user = self.users.update_user(&user).await?;
        tracing::info!(user_id, "user updated");
        Ok(user)
    }

    pub async fn list_users(&self, query: UserListQuery) -> Result<UserPage> {
        let (after, limit) = query.normalize();
        let users = self.users.list_users(after, limit).await?;
        Ok(UserPage::new(users, limit))
    }

    /// Closes the caller's own account and withdraws their listings. Refused
    /// while one of their exchanges is pending or accepted.
    pub async fn delete_user(&self, user_id: UserId, acting_user: UserId) -> Result<()> {
        if user_id != acting_user {
            tracing::warn!(user_id, acting_user, "user delete by someone else rejected");
            return Err(MarketError::Forbidden);
        }
        self.get_user(user_id).await?;

        let exchanges = self.exchanges.exchanges_for_user(user_id, None).await?;
        if exchanges.iter().any(|e| e.status.is_active()) {
            return Err(MarketError::UserHasActiveExchanges);
        }

        // The store repeats the exchange check under its write lock.
        self.users.delete_user(user_id).await?;
        tracing::info!(user_id, "user deleted");
        Ok(())
    }

    pub async fn profile(&self, user_id: UserId) -> Result<UserProfile> {
        let user = self.get_user(user_id).await?;
        let books = self.books.books_by_owner(user_id, None).await?;
        let successful = self.exchanges.count_completed_for_user(user_id).await?;
        let rating = self.reviews.rating_summary(user_id).await?;

        Ok(UserProfile {
            id: user.id,
            name: user.name,
            city: user.city,
            books_count: books.len() as i64,
            successful_exchanges_count: successful,
            review_count: rating.count,
            average_rating: rating.average,
        })
    }
}
