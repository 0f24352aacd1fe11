//! Payment gateway seam. One implementation per provider.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{PaymentProvider, ProviderFields};

pub mod stripe;

pub use stripe::StripeGateway;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway rejected request ({status}): {code}")]
    Api { status: u16, code: String, message: String },

    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),
}

/// Outbound charge parameters. `idempotency_key` makes gateway-side retries
/// safe; callers pass the local transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeParams {
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
    pub description: String,
    pub idempotency_key: String,
    pub transaction_id: String,
}

/// Outbound refund parameters. `idempotency_key` is derived from the
/// transaction id and the refund attempt, so a retry after a lost response
/// reaches the same refund at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundParams {
    pub charge_id: String,
    pub transaction_id: String,
    pub idempotency_key: String,
}

impl RefundParams {
    pub fn new(charge_id: impl Into<String>, transaction_id: &str, attempt: usize) -> Self {
        Self {
            charge_id: charge_id.into(),
            transaction_id: transaction_id.to_string(),
            idempotency_key: format!("{}-refund-{}", transaction_id, attempt),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    /// Accepted, possibly still settling.
    Accepted { handles: ProviderFields },
    /// The gateway ran the charge and the instrument was declined.
    Declined { reason: String, handles: ProviderFields },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefundOutcome {
    Refunded { handles: ProviderFields },
    AlreadyRefunded,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn charge(&self, params: &ChargeParams) -> Result<ChargeOutcome, GatewayError>;

    async fn refund(&self, params: &RefundParams) -> Result<RefundOutcome, GatewayError>;
}
