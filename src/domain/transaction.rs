//! Transaction domain entity.
//! One mutable record per logical payment, shared by the charge/refund flows
//! and the webhook reconciler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Provider-specific correlation handles keyed by name.
pub type ProviderFields = BTreeMap<String, serde_json::Value>;

/// Handle of the provider charge. Required before a refund can be issued.
pub const CHARGE_ID: &str = "charge_id";
/// Handle of the provider payment intent that produced the charge.
pub const PAYMENT_INTENT_ID: &str = "payment_intent_id";
/// Handle of the provider refund, added by the refund flow.
pub const REFUND_ID: &str = "refund_id";
/// Earlier refund handles replaced by a retry after a failed refund.
pub const REFUND_IDS: &str = "refund_ids";
/// Caller-supplied key that deduplicates charge retries.
pub const IDEMPOTENCY_KEY: &str = "idempotency_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failure,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Charge,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Charge => "charge",
            TransactionType::Refund => "refund",
        }
    }
}

/// Gateways this service can process payments through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Stripe,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
        }
    }
}

macro_rules! impl_text_enum {
    ($ty:ty { $($text:literal => $variant:expr),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }
    };
}

impl_text_enum!(TransactionStatus {
    "pending" => TransactionStatus::Pending,
    "succeeded" => TransactionStatus::Succeeded,
    "failure" => TransactionStatus::Failure,
});

impl_text_enum!(TransactionType {
    "charge" => TransactionType::Charge,
    "refund" => TransactionType::Refund,
});

impl_text_enum!(PaymentProvider {
    "stripe" => PaymentProvider::Stripe,
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// Durable local record of one charge or refund attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(rename = "payment_provider")]
    pub provider: PaymentProvider,
    pub amount: i64,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    #[serde(rename = "additional_fields", default)]
    pub provider_fields: ProviderFields,
}

impl Transaction {
    /// Generates a fresh, time-ordered transaction id.
    ///
    /// The id is assigned before the gateway is contacted so it can travel as
    /// gateway metadata and come back in webhooks.
    pub fn new_id() -> String {
        format!("TXN_{}", uuid::Uuid::now_v7().simple())
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::new(self.kind, self.status)
    }

    pub fn charge_id(&self) -> Option<&str> {
        self.provider_field(CHARGE_ID)
    }

    pub fn provider_field(&self, key: &str) -> Option<&str> {
        self.provider_fields
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn refund_id(&self) -> Option<&str> {
        self.provider_field(REFUND_ID)
    }

    /// Refund handles that a later refund attempt replaced, oldest first.
    pub fn superseded_refund_ids(&self) -> Vec<String> {
        self.provider_fields
            .get(REFUND_IDS)
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of refunds issued against the charge so far.
    pub fn refund_attempts(&self) -> usize {
        self.superseded_refund_ids().len() + usize::from(self.refund_id().is_some())
    }

    /// Decides what happens when an update targeting `target`, optionally
    /// about refund `refund_id`, meets this record.
    ///
    /// Refund updates are keyed on the refund handle: updates about a replaced
    /// refund are stale, and a new refund after a failed one starts over.
    pub fn transition_for(&self, target: TransactionState, refund_id: Option<&str>) -> Transition {
        if let (TransactionType::Refund, Some(incoming), Some(current)) =
            (target.kind, refund_id, self.refund_id())
        {
            if incoming != current {
                if self.superseded_refund_ids().iter().any(|id| id == incoming) {
                    return Transition::Stale;
                }
                if self.state() == TransactionState::REFUND_FAILED {
                    return Transition::Replace;
                }
            }
        }

        self.state().transition_to(target)
    }
}

/// The (type, status) pair a transaction currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionState {
    pub kind: TransactionType,
    pub status: TransactionStatus,
}

impl TransactionState {
    pub const REFUND_FAILED: TransactionState = TransactionState {
        kind: TransactionType::Refund,
        status: TransactionStatus::Failure,
    };

    pub fn new(kind: TransactionType, status: TransactionStatus) -> Self {
        Self { kind, status }
    }

    /// Position in the lifecycle. Refunds outrank charges and terminal
    /// statuses outrank pending within the same type.
    pub fn rank(&self) -> u8 {
        let base = match self.kind {
            TransactionType::Charge => 0,
            TransactionType::Refund => 2,
        };
        base + u8::from(self.status.is_terminal())
    }

    /// Decides what happens when an update targeting `target` meets `self`.
    pub fn transition_to(&self, target: TransactionState) -> Transition {
        if *self == target {
            Transition::Unchanged
        } else if target.rank() > self.rank() {
            Transition::Apply
        } else {
            Transition::Stale
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move forward to the target state.
    Apply,
    /// Already in the target state.
    Unchanged,
    /// Target is behind the current state; a late or reordered delivery.
    Stale,
    /// A new refund replaces a failed one and the refund lifecycle restarts.
    Replace,
}

/// Coalescing update: only supplied fields overwrite, provider fields merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionUpdate {
    pub status: Option<TransactionStatus>,
    pub kind: Option<TransactionType>,
    pub failure_reason: Option<String>,
    /// Overwrite `failure_reason` even when it is `None`, clearing it.
    pub replace_failure_reason: bool,
    pub provider_fields: ProviderFields,
    /// When set, the store applies the update only if the row is still in
    /// this state, and reports a conflict otherwise.
    pub expected: Option<TransactionState>,
}

impl TransactionUpdate {
    pub fn to_state(state: TransactionState) -> Self {
        Self {
            status: Some(state.status),
            kind: Some(state.kind),
            ..Default::default()
        }
    }

    pub fn with_provider_fields(mut self, fields: ProviderFields) -> Self {
        self.provider_fields = fields;
        self
    }

    pub fn with_failure_reason(mut self, reason: Option<String>) -> Self {
        self.failure_reason = reason;
        self
    }

    /// Sets `failure_reason` unconditionally, so `None` clears a stored one.
    pub fn replacing_failure_reason(mut self) -> Self {
        self.replace_failure_reason = true;
        self
    }

    pub fn expecting(mut self, state: TransactionState) -> Self {
        self.expected = Some(state);
        self
    }

    /// Drops status/type so only provider handles are merged.
    pub fn fields_only(&self) -> Self {
        Self {
            provider_fields: self.provider_fields.clone(),
            expected: self.expected,
            ..Default::default()
        }
    }

    pub fn target_state(&self) -> Option<TransactionState> {
        match (self.kind, self.status) {
            (Some(kind), Some(status)) => Some(TransactionState::new(kind, status)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.kind.is_none()
            && self.failure_reason.is_none()
            && !self.replace_failure_reason
            && self.provider_fields.is_empty()
    }

    /// Applies the update to an in-memory record with the same coalescing
    /// rules the SQL store uses.
    pub fn apply_to(&self, tx: &mut Transaction) {
        if let Some(status) = self.status {
            tx.status = status;
        }
        if let Some(kind) = self.kind {
            tx.kind = kind;
        }
        if self.replace_failure_reason || self.failure_reason.is_some() {
            tx.failure_reason = self.failure_reason.clone();
        }
        for (key, value) in &self.provider_fields {
            tx.provider_fields.insert(key.clone(), value.clone());
        }
    }
}
