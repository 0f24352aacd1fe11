//! Persistence port for transactions.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Transaction, TransactionState, TransactionUpdate};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transaction {0} not found")]
    NotFound(String),

    #[error("transaction {0} already exists")]
    Duplicate(String),

    /// The row moved away from the expected state before the update landed.
    #[error("transaction {id} is {actual}, expected {expected}")]
    Conflict {
        id: String,
        expected: TransactionState,
        actual: TransactionState,
    },

    #[error("{0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(format!("malformed provider fields: {}", err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable transaction storage.
///
/// Implementations must give read-your-writes per `transaction_id` and must
/// apply `TransactionUpdate::expected` atomically with the write.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction>;

    async fn get(&self, transaction_id: &str) -> StoreResult<Transaction>;

    /// Finds the transaction holding `value` under provider field `key`.
    async fn find_by_provider_field(&self, key: &str, value: &str) -> StoreResult<Transaction>;

    /// Coalescing update returning the authoritative post-update row.
    async fn update(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> StoreResult<Transaction>;
}
