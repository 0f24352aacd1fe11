//! Precedence-guarded state writes shared by the refund flow and the
//! webhook reconciler.

use crate::domain::{Transaction, TransactionUpdate, Transition, REFUND_ID, REFUND_IDS};
use crate::error::PaymentError;
use crate::ports::{StoreError, TransactionStore};

pub const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The record moved to the target state.
    Applied(Transaction),
    /// The record already sat in the target state.
    Unchanged(Transaction),
    /// The record is ahead of the target; only new handles were merged.
    Stale(Transaction),
}

impl TransitionOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            TransitionOutcome::Applied(tx)
            | TransitionOutcome::Unchanged(tx)
            | TransitionOutcome::Stale(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            TransitionOutcome::Applied(tx)
            | TransitionOutcome::Unchanged(tx)
            | TransitionOutcome::Stale(tx) => tx,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

/// Provider handles in `update` that `current` does not hold yet.
fn missing_fields(current: &Transaction, update: &TransactionUpdate) -> TransactionUpdate {
    let mut merge = update.fields_only();
    merge
        .provider_fields
        .retain(|key, _| current.provider_field(key).is_none());
    merge
}

/// Moves a failed refund aside: its handle joins the superseded list and the
/// failure reason is cleared unless the update brings its own.
fn replacing_refund(current: &Transaction, update: &TransactionUpdate) -> TransactionUpdate {
    let mut write = update.clone().replacing_failure_reason();
    let mut superseded = current.superseded_refund_ids();
    if let Some(previous) = current.refund_id() {
        superseded.push(previous.to_string());
    }
    write
        .provider_fields
        .insert(REFUND_IDS.to_string(), serde_json::json!(superseded));
    write
}

/// Applies `update` to `transaction_id` only if its target state outranks
/// the stored one, or if it carries a new refund replacing a failed one.
///
/// Each attempt reads the row, decides, and writes with the read state as the
/// expectation. A concurrent writer makes the store report a conflict and the
/// decision is retried, up to `MAX_ATTEMPTS` times.
pub async fn apply_guarded(
    store: &dyn TransactionStore,
    transaction_id: &str,
    update: &TransactionUpdate,
) -> Result<TransitionOutcome, PaymentError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let current = store.get(transaction_id).await?;
        let refund_id = update.provider_fields.get(REFUND_ID).and_then(|v| v.as_str());
        let transition = match update.target_state() {
            Some(target) => current.transition_for(target, refund_id),
            None => Transition::Unchanged,
        };

        let replaces_handle = matches!(
            (refund_id, current.refund_id()),
            (Some(incoming), Some(stored)) if incoming != stored
        );

        let write = match transition {
            Transition::Apply if replaces_handle => {
                replacing_refund(&current, update).expecting(current.state())
            }
            Transition::Apply => update.clone().expecting(current.state()),
            Transition::Replace => {
                tracing::info!(
                    transaction_id,
                    previous = current.refund_id(),
                    refund_id,
                    "new refund replaces failed refund"
                );
                replacing_refund(&current, update).expecting(current.state())
            }
            Transition::Unchanged | Transition::Stale => {
                let merge = missing_fields(&current, update).expecting(current.state());
                if merge.is_empty() {
                    tracing::debug!(
                        transaction_id,
                        state = %current.state(),
                        ?transition,
                        "transition skipped"
                    );
                    return Ok(outcome(transition, current));
                }
                merge
            }
        };

        match store.update(transaction_id, &write).await {
            Ok(tx) => return Ok(outcome(transition, tx)),
            Err(StoreError::Conflict {
                expected, actual, ..
            }) => {
                tracing::warn!(
                    transaction_id,
                    attempt,
                    %expected,
                    %actual,
                    "concurrent update, re-reading"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(PaymentError::UpdateConflict(transaction_id.to_string()))
}

fn outcome(transition: Transition, tx: Transaction) -> TransitionOutcome {
    match transition {
        Transition::Apply | Transition::Replace => TransitionOutcome::Applied(tx),
        Transition::Unchanged => TransitionOutcome::Unchanged(tx),
        Transition::Stale => TransitionOutcome::Stale(tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTransactionStore;
    use crate::domain::{
        PaymentProvider, ProviderFields, TransactionState, TransactionStatus, TransactionType,
        CHARGE_ID,
    };
    use crate::ports::StoreResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn charge(status: TransactionStatus) -> Transaction {
        Transaction {
            transaction_id: "TXN_1".to_string(),
            status,
            description: "Transaction for payment amount of 500".to_string(),
            failure_reason: None,
            provider: PaymentProvider::Stripe,
            amount: 500,
            currency: "usd".to_string(),
            kind: TransactionType::Charge,
            provider_fields: ProviderFields::from([(CHARGE_ID.to_string(), json!("ch_1"))]),
        }
    }

    fn to(kind: TransactionType, status: TransactionStatus) -> TransactionUpdate {
        TransactionUpdate::to_state(TransactionState::new(kind, status))
    }

    #[tokio::test]
    async fn test_forward_transition_applies() {
        let store = InMemoryTransactionStore::new();
        store.insert(&charge(TransactionStatus::Pending)).await.unwrap();

        let outcome = apply_guarded(
            &store,
            "TXN_1",
            &to(TransactionType::Charge, TransactionStatus::Succeeded),
        )
        .await
        .unwrap();

        assert!(outcome.is_applied());
        assert_eq!(outcome.transaction().status, TransactionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_repeat_is_unchanged_without_write() {
        let store = InMemoryTransactionStore::new();
        let stored = store.insert(&charge(TransactionStatus::Succeeded)).await.unwrap();

        let outcome = apply_guarded(
            &store,
            "TXN_1",
            &to(TransactionType::Charge, TransactionStatus::Succeeded),
        )
        .await
        .unwrap();

        assert_eq!(outcome, TransitionOutcome::Unchanged(stored));
    }

    #[tokio::test]
    async fn test_late_charge_event_does_not_undo_refund() {
        let store = InMemoryTransactionStore::new();
        let mut refunded = charge(TransactionStatus::Succeeded);
        refunded.kind = TransactionType::Refund;
        store.insert(&refunded).await.unwrap();

        let outcome = apply_guarded(
            &store,
            "TXN_1",
            &to(TransactionType::Charge, TransactionStatus::Succeeded),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, TransitionOutcome::Stale(_)));
        let tx = store.get("TXN_1").await.unwrap();
        assert_eq!(tx.kind, TransactionType::Refund);
    }

    #[tokio::test]
    async fn test_stale_update_still_merges_new_handles() {
        let store = InMemoryTransactionStore::new();
        let mut refunded = charge(TransactionStatus::Succeeded);
        refunded.kind = TransactionType::Refund;
        store.insert(&refunded).await.unwrap();

        let update = to(TransactionType::Refund, TransactionStatus::Pending)
            .with_provider_fields(ProviderFields::from([
                (REFUND_ID.to_string(), json!("re_1")),
                (CHARGE_ID.to_string(), json!("ch_other")),
            ]));
        let outcome = apply_guarded(&store, "TXN_1", &update).await.unwrap();

        let tx = outcome.into_transaction();
        assert_eq!(tx.status, TransactionStatus::Succeeded);
        assert_eq!(tx.provider_field(REFUND_ID), Some("re_1"));
        assert_eq!(tx.charge_id(), Some("ch_1"));
    }

    #[tokio::test]
    async fn test_new_refund_after_failed_refund_restarts_lifecycle() {
        let store = InMemoryTransactionStore::new();
        let mut failed = charge(TransactionStatus::Failure);
        failed.kind = TransactionType::Refund;
        failed.failure_reason = Some("expired_or_canceled_card".to_string());
        failed.provider_fields.insert(REFUND_ID.to_string(), json!("re_1"));
        store.insert(&failed).await.unwrap();

        let retry = to(TransactionType::Refund, TransactionStatus::Pending)
            .with_provider_fields(ProviderFields::from([(REFUND_ID.to_string(), json!("re_2"))]));
        let outcome = apply_guarded(&store, "TXN_1", &retry).await.unwrap();

        assert!(outcome.is_applied());
        let tx = outcome.into_transaction();
        assert_eq!(tx.state(), TransactionState::new(TransactionType::Refund, TransactionStatus::Pending));
        assert_eq!(tx.refund_id(), Some("re_2"));
        assert_eq!(tx.superseded_refund_ids(), vec!["re_1".to_string()]);
        assert_eq!(tx.failure_reason, None);
        assert_eq!(tx.charge_id(), Some("ch_1"));

        let late_failure = to(TransactionType::Refund, TransactionStatus::Failure)
            .with_failure_reason(Some("expired_or_canceled_card".to_string()))
            .with_provider_fields(ProviderFields::from([(REFUND_ID.to_string(), json!("re_1"))]));
        let outcome = apply_guarded(&store, "TXN_1", &late_failure).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::Stale(_)));

        let settled = to(TransactionType::Refund, TransactionStatus::Succeeded)
            .with_provider_fields(ProviderFields::from([(REFUND_ID.to_string(), json!("re_2"))]));
        let tx = apply_guarded(&store, "TXN_1", &settled)
            .await
            .unwrap()
            .into_transaction();
        assert_eq!(tx.status, TransactionStatus::Succeeded);
        assert_eq!(tx.refund_id(), Some("re_2"));
        assert_eq!(tx.failure_reason, None);
    }

    /// Reports a conflict on every update to exercise the retry budget.
    struct AlwaysConflicting {
        inner: InMemoryTransactionStore,
        updates: AtomicUsize,
    }

    #[async_trait]
    impl TransactionStore for AlwaysConflicting {
        async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction> {
            self.inner.insert(tx).await
        }

        async fn get(&self, id: &str) -> StoreResult<Transaction> {
            self.inner.get(id).await
        }

        async fn find_by_provider_field(&self, key: &str, value: &str) -> StoreResult<Transaction> {
            self.inner.find_by_provider_field(key, value).await
        }

        async fn update(&self, id: &str, update: &TransactionUpdate) -> StoreResult<Transaction> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            let actual = self.inner.get(id).await?.state();
            Err(StoreError::Conflict {
                id: id.to_string(),
                expected: update.expected.unwrap_or(actual),
                actual,
            })
        }
    }

    #[tokio::test]
    async fn test_conflict_retries_then_fails() {
        let store = AlwaysConflicting {
            inner: InMemoryTransactionStore::new(),
            updates: AtomicUsize::new(0),
        };
        store.insert(&charge(TransactionStatus::Pending)).await.unwrap();

        let err = apply_guarded(
            &store,
            "TXN_1",
            &to(TransactionType::Charge, TransactionStatus::Succeeded),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PaymentError::UpdateConflict(_)));
        assert_eq!(store.updates.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_missing_transaction_is_not_found() {
        let store = InMemoryTransactionStore::new();
        let err = apply_guarded(
            &store,
            "TXN_404",
            &to(TransactionType::Charge, TransactionStatus::Succeeded),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PaymentError::TransactionNotFound(_)));
    }
}
