use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{Transaction, TransactionUpdate, IDEMPOTENCY_KEY};
use crate::ports::{StoreError, StoreResult, TransactionStore};

/// A thread-safe in-memory transaction store.
///
/// Every update runs under the write lock, so the expected-state check and
/// the write are atomic. Used by tests and `STORE_BACKEND=memory` runs.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<String, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.transactions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.transactions.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.transaction_id) {
            return Err(StoreError::Duplicate(tx.transaction_id.clone()));
        }
        // Mirrors the unique index on the caller idempotency key.
        if let Some(key) = tx.provider_field(IDEMPOTENCY_KEY) {
            if transactions
                .values()
                .any(|other| other.provider_field(IDEMPOTENCY_KEY) == Some(key))
            {
                return Err(StoreError::Duplicate(tx.transaction_id.clone()));
            }
        }
        transactions.insert(tx.transaction_id.clone(), tx.clone());
        Ok(tx.clone())
    }

    async fn get(&self, transaction_id: &str) -> StoreResult<Transaction> {
        let transactions = self.transactions.read().await;
        transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))
    }

    async fn find_by_provider_field(&self, key: &str, value: &str) -> StoreResult<Transaction> {
        let transactions = self.transactions.read().await;
        transactions
            .values()
            .find(|tx| tx.provider_field(key) == Some(value))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{}={}", key, value)))
    }

    async fn update(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> StoreResult<Transaction> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(transaction_id)
            .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))?;

        if let Some(expected) = update.expected {
            if tx.state() != expected {
                return Err(StoreError::Conflict {
                    id: transaction_id.to_string(),
                    expected,
                    actual: tx.state(),
                });
            }
        }

        update.apply_to(tx);
        Ok(tx.clone())
    }
}
