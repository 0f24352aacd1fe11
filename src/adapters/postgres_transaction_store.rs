//! Postgres implementation of TransactionStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::domain::{ProviderFields, Transaction, TransactionUpdate};
use crate::ports::{StoreError, StoreResult, TransactionStore};

const COLUMNS: &str = "transaction_id, status, description, failure_reason, payment_provider, \
     amount, currency, type, additional_fields, created_at, updated_at";

/// Postgres-backed transaction store.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction> {
        let query = format!(
            r#"
            INSERT INTO transactions_history (
                transaction_id, status, description, failure_reason, payment_provider,
                amount, currency, type, additional_fields
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(&tx.transaction_id)
            .bind(tx.status.as_str())
            .bind(&tx.description)
            .bind(&tx.failure_reason)
            .bind(tx.provider.as_str())
            .bind(tx.amount)
            .bind(&tx.currency)
            .bind(tx.kind.as_str())
            .bind(Json(&tx.provider_fields))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Duplicate(tx.transaction_id.clone())
                }
                other => StoreError::from(other),
            })?;

        row.into_domain()
    }

    async fn get(&self, transaction_id: &str) -> StoreResult<Transaction> {
        let query = format!("SELECT {COLUMNS} FROM transactions_history WHERE transaction_id = $1");

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))?
            .into_domain()
    }

    async fn find_by_provider_field(&self, key: &str, value: &str) -> StoreResult<Transaction> {
        let query = format!(
            r#"
            SELECT {COLUMNS} FROM transactions_history
            WHERE additional_fields @> jsonb_build_object($1::text, $2::text)
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(key)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("{}={}", key, value)))?
            .into_domain()
    }

    async fn update(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> StoreResult<Transaction> {
        // The expected-state guard sits in the WHERE clause so the check and
        // the write happen in one statement.
        let query = format!(
            r#"
            UPDATE transactions_history
            SET
                status = COALESCE($1, status),
                type = COALESCE($2, type),
                failure_reason = CASE WHEN $8 THEN $3 ELSE COALESCE($3, failure_reason) END,
                additional_fields = additional_fields || $4,
                updated_at = NOW()
            WHERE transaction_id = $5
              AND ($6::text IS NULL OR (type = $6 AND status = $7))
            RETURNING {COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(update.status.map(|s| s.as_str()))
            .bind(update.kind.map(|k| k.as_str()))
            .bind(&update.failure_reason)
            .bind(Json(&update.provider_fields))
            .bind(transaction_id)
            .bind(update.expected.map(|s| s.kind.as_str()))
            .bind(update.expected.map(|s| s.status.as_str()))
            .bind(update.replace_failure_reason)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.into_domain(),
            None => {
                let current = self.get(transaction_id).await?;
                match update.expected {
                    Some(expected) => Err(StoreError::Conflict {
                        id: transaction_id.to_string(),
                        expected,
                        actual: current.state(),
                    }),
                    None => Err(StoreError::Backend(format!(
                        "update of {} matched no rows",
                        transaction_id
                    ))),
                }
            }
        }
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    transaction_id: String,
    status: String,
    description: String,
    failure_reason: Option<String>,
    payment_provider: String,
    amount: i64,
    currency: String,
    #[sqlx(rename = "type")]
    kind: String,
    additional_fields: Json<ProviderFields>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        let corrupt = |e: crate::domain::transaction::UnknownVariant| {
            StoreError::Backend(format!("corrupt row {}: {}", self.transaction_id, e))
        };

        Ok(Transaction {
            status: self.status.parse().map_err(corrupt)?,
            provider: self.payment_provider.parse().map_err(corrupt)?,
            kind: self.kind.parse().map_err(corrupt)?,
            transaction_id: self.transaction_id.clone(),
            description: self.description,
            failure_reason: self.failure_reason,
            amount: self.amount,
            currency: self.currency,
            provider_fields: self.additional_fields.0,
        })
    }
}
