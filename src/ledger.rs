//! Exchange ledger.
//!
//! Create, complete and cancel run in one SQLite transaction together with the
//! book writes from [`crate::availability`]. Each transaction opens with a write
//! so SQLite hands out its write lock before anything is read; a transaction
//! that errors is rolled back when it is dropped.

use crate::{
    availability,
    database::{exchange_from_row, Database},
    error::{MarketError, Result},
    model::{Exchange, ExchangeStatus, NewExchange},
    repository::ExchangeRepository,
    ExchangeId, UserId,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite};

const EXCHANGE_COLUMNS: &str = "id, initiator_id, recipient_id, initiator_book_id, \
                                recipient_book_id, status, completed_at, created_at, updated_at";

#[async_trait]
impl ExchangeRepository for Database {
    async fn create_exchange(&self, exchange: NewExchange) -> Result<Exchange> {
        let mut tx = self.pool().begin().await?;

        availability::reserve_owned(
            &mut tx,
            exchange.initiator_book_id,
            exchange.initiator_id,
            MarketError::InitiatorNotOwner,
        )
        .await?;
        availability::reserve_owned(
            &mut tx,
            exchange.recipient_book_id,
            exchange.recipient_id,
            MarketError::RecipientNotOwner,
        )
        .await?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO exchanges (initiator_id, recipient_id, initiator_book_id, recipient_book_id, status, completed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', NULL, ?, ?)
            "#,
        )
        .bind(exchange.initiator_id)
        .bind(exchange.recipient_id)
        .bind(exchange.initiator_book_id)
        .bind(exchange.recipient_book_id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Exchange {
            id: result.last_insert_rowid(),
            initiator_id: exchange.initiator_id,
            recipient_id: exchange.recipient_id,
            initiator_book_id: exchange.initiator_book_id,
            recipient_book_id: exchange.recipient_book_id,
            status: ExchangeStatus::Pending,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_exchange(&self, id: ExchangeId) -> Result<Option<Exchange>> {
        let row = sqlx::query(&format!("SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(exchange_from_row).transpose()
    }

    async fn list_exchanges(&self) -> Result<Vec<Exchange>> {
        let rows = sqlx::query(&format!("SELECT {EXCHANGE_COLUMNS} FROM exchanges ORDER BY id"))
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(exchange_from_row).collect()
    }

    async fn exchanges_for_user(
        &self,
        user: UserId,
        status: Option<ExchangeStatus>,
    ) -> Result<Vec<Exchange>> {
        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE (initiator_id = "
        ));
        select
            .push_bind(user)
            .push(" OR recipient_id = ")
            .push_bind(user)
            .push(")");
        if let Some(status) = status {
            select.push(" AND status = ").push_bind(status.as_str());
        }
        select.push(" ORDER BY created_at DESC, id DESC");

        let rows = select.build().fetch_all(self.pool()).await?;
        rows.iter().map(exchange_from_row).collect()
    }

    async fn count_completed_for_user(&self, user: UserId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM exchanges
            WHERE status = 'completed' AND (initiator_id = ? OR recipient_id = ?)
            "#,
        )
        .bind(user)
        .bind(user)
        .fetch_one(self.pool())
        .await?;

        Ok(count)
    }

    async fn accept_exchange(&self, exchange: &Exchange) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE exchanges SET status = 'accepted', updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(Utc::now())
        .bind(exchange.id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::NotPending);
        }
        Ok(())
    }

    async fn complete_exchange(&self, exchange: &Exchange) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE exchanges
            SET status = 'completed', completed_at = COALESCE(completed_at, ?), updated_at = ?
            WHERE id = ? AND status = 'accepted'
            "#,
        )
        .bind(exchange.completed_at.unwrap_or(now))
        .bind(now)
        .bind(exchange.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::NotAccepted);
        }

        availability::transfer_ownership(&mut tx, exchange.initiator_book_id, exchange.recipient_id)
            .await?;
        availability::transfer_ownership(&mut tx, exchange.recipient_book_id, exchange.initiator_id)
            .await?;
        availability::release(&mut tx, exchange.initiator_book_id).await?;
        availability::release(&mut tx, exchange.recipient_book_id).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn cancel_exchange(&self, exchange: &Exchange) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE exchanges SET status = 'cancelled', completed_at = NULL, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(Utc::now())
        .bind(exchange.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MarketError::NotPending);
        }

        availability::release(&mut tx, exchange.initiator_book_id).await?;
        availability::release(&mut tx, exchange.recipient_book_id).await?;

        tx.commit().await?;
        Ok(())
    }
}
