use std::sync::Arc;

use crate::domain::{TransactionUpdate, CHARGE_ID, PAYMENT_INTENT_ID};
use crate::error::PaymentError;
use crate::ports::{StoreError, TransactionStore};
use crate::services::transitions::{apply_guarded, TransitionOutcome};
use crate::webhook::EventEffect;

/// Applies verified provider events to local transactions.
#[derive(Clone)]
pub struct EventReconciler {
    store: Arc<dyn TransactionStore>,
}

impl EventReconciler {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(&self, effect: EventEffect) -> Result<TransitionOutcome, PaymentError> {
        let transaction_id = self.correlate(&effect).await?;

        let update = TransactionUpdate::to_state(effect.target)
            .with_failure_reason(effect.failure_reason)
            .with_provider_fields(effect.provider_fields);

        apply_guarded(self.store.as_ref(), &transaction_id, &update).await
    }

    /// Finds the local transaction an event refers to: first by the echoed
    /// transaction id, then by the charge handle, then by the payment intent.
    async fn correlate(&self, effect: &EventEffect) -> Result<String, PaymentError> {
        if let Some(id) = &effect.transaction_id {
            match self.store.get(id).await {
                Ok(tx) => return Ok(tx.transaction_id),
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!(transaction_id = %id, "event id unknown, trying provider handles");
                }
                Err(e) => return Err(e.into()),
            }
        }

        for key in [CHARGE_ID, PAYMENT_INTENT_ID] {
            let Some(value) = effect.provider_fields.get(key).and_then(|v| v.as_str()) else {
                continue;
            };
            match self.store.find_by_provider_field(key, value).await {
                Ok(tx) => return Ok(tx.transaction_id),
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match &effect.transaction_id {
            Some(id) => Err(PaymentError::TransactionNotFound(id.clone())),
            None => Err(PaymentError::MissingTransactionId),
        }
    }
}
