use std::sync::Arc;

use crate::domain::{
    Transaction, TransactionState, TransactionStatus, TransactionType, TransactionUpdate,
    IDEMPOTENCY_KEY,
};
use crate::error::PaymentError;
use crate::gateway::{ChargeOutcome, ChargeParams, PaymentGateway, RefundOutcome, RefundParams};
use crate::ports::{StoreError, TransactionStore};
use crate::services::transitions::{apply_guarded, TransitionOutcome};
use crate::validation::ChargeRequest;

/// Orchestrates charge, query and refund against one gateway and the store.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(store: Arc<dyn TransactionStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub async fn charge(&self, request: ChargeRequest) -> Result<Transaction, PaymentError> {
        self.charge_with_key(request, None).await
    }

    /// Charges the payment method and records the outcome.
    ///
    /// With an idempotency key, a retry that finds an existing record for the
    /// key returns it without touching the gateway, and the key is forwarded
    /// to the gateway so a retry after a lost write is deduplicated there.
    pub async fn charge_with_key(
        &self,
        request: ChargeRequest,
        idempotency_key: Option<String>,
    ) -> Result<Transaction, PaymentError> {
        let charge = request.validate()?;
        let idempotency_key = idempotency_key.filter(|k| !k.trim().is_empty());

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                tracing::info!(
                    transaction_id = %existing.transaction_id,
                    "charge retry matched existing transaction"
                );
                return Ok(existing);
            }
        }

        let transaction_id = Transaction::new_id();
        let params = ChargeParams {
            amount: charge.amount,
            currency: charge.currency.clone(),
            payment_method: charge.payment_method,
            description: charge.description.clone(),
            idempotency_key: idempotency_key
                .clone()
                .unwrap_or_else(|| transaction_id.clone()),
            transaction_id: transaction_id.clone(),
        };

        let outcome = self.gateway.charge(&params).await?;

        let (status, failure_reason, mut provider_fields) = match outcome {
            ChargeOutcome::Accepted { handles } => (TransactionStatus::Pending, None, handles),
            ChargeOutcome::Declined { reason, handles } => {
                tracing::info!(%transaction_id, %reason, "charge declined");
                (TransactionStatus::Failure, Some(reason), handles)
            }
        };
        if let Some(key) = &idempotency_key {
            provider_fields.insert(
                IDEMPOTENCY_KEY.to_string(),
                serde_json::Value::String(key.clone()),
            );
        }

        let tx = Transaction {
            transaction_id: transaction_id.clone(),
            status,
            description: charge.description,
            failure_reason,
            provider: self.gateway.provider(),
            amount: charge.amount,
            currency: charge.currency,
            kind: TransactionType::Charge,
            provider_fields,
        };

        let error = match self.store.insert(&tx).await {
            Ok(stored) => {
                tracing::info!(
                    %transaction_id,
                    status = %stored.status,
                    amount = stored.amount,
                    currency = %stored.currency,
                    "charge recorded"
                );
                return Ok(stored);
            }
            Err(e) => e,
        };

        // A concurrent retry with the same key recorded first. The gateway saw
        // the same idempotency key, so both requests share one charge.
        if let (StoreError::Duplicate(_), Some(key)) = (&error, &idempotency_key) {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                tracing::info!(
                    transaction_id = %existing.transaction_id,
                    "concurrent charge retry matched existing transaction"
                );
                return Ok(existing);
            }
        }

        tracing::error!(
            %transaction_id,
            handles = ?tx.provider_fields,
            error = %error,
            "gateway accepted charge but recording it failed"
        );
        Err(error.into())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Transaction>, PaymentError> {
        match self.store.find_by_provider_field(IDEMPOTENCY_KEY, key).await {
            Ok(existing) => Ok(Some(existing)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn query(&self, transaction_id: &str) -> Result<Transaction, PaymentError> {
        if transaction_id.trim().is_empty() {
            return Err(PaymentError::MissingTransactionId);
        }

        Ok(self.store.get(transaction_id).await?)
    }

    /// Refunds the full amount of the charge behind `transaction_id`.
    ///
    /// After a failed refund, a new refund replaces it and the record returns
    /// to `refund/pending`.
    pub async fn refund(&self, transaction_id: &str) -> Result<Transaction, PaymentError> {
        if transaction_id.trim().is_empty() {
            return Err(PaymentError::MissingTransactionId);
        }

        let current = self.store.get(transaction_id).await?;
        let charge_id = current
            .charge_id()
            .ok_or(PaymentError::MissingChargeHandle)?
            .to_string();

        let params = RefundParams::new(&charge_id, transaction_id, current.refund_attempts() + 1);
        let handles = match self.gateway.refund(&params).await? {
            RefundOutcome::Refunded { handles } => handles,
            RefundOutcome::AlreadyRefunded => {
                tracing::warn!(transaction_id, %charge_id, "charge already refunded at provider");
                return Err(PaymentError::ChargeAlreadyRefunded);
            }
        };

        let update = TransactionUpdate::to_state(TransactionState::new(
            TransactionType::Refund,
            TransactionStatus::Pending,
        ))
        .with_provider_fields(handles);

        let outcome = apply_guarded(self.store.as_ref(), transaction_id, &update).await?;
        if let TransitionOutcome::Stale(tx) = &outcome {
            tracing::info!(
                transaction_id,
                state = %tx.state(),
                "refund accepted after a later state was recorded"
            );
        } else {
            tracing::info!(transaction_id, %charge_id, "refund requested");
        }

        Ok(outcome.into_transaction())
    }
}
