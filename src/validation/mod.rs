//! Charge request normalization. Pure functions, no I/O.

use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

/// Raw charge input as received from the merchant backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub description: String,
}

/// A charge request that passed validation. Only constructed by
/// [`ChargeRequest::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidCharge {
    pub amount: i64,
    pub currency: String,
    pub payment_method: String,
    pub description: String,
}

pub fn default_description(amount: i64) -> String {
    format!("Transaction for payment amount of {}", amount)
}

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl ChargeRequest {
    pub fn new(
        amount: i64,
        currency: impl Into<String>,
        payment_method: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            amount,
            currency: currency.into(),
            payment_method: payment_method.into(),
            description: description.into(),
        }
    }

    pub fn validate(&self) -> Result<ValidCharge, PaymentError> {
        if self.amount <= 0 {
            return Err(PaymentError::InvalidAmount);
        }

        let currency = sanitize_string(&self.currency).to_lowercase();
        if currency.is_empty() {
            return Err(PaymentError::MissingCurrency);
        }

        let payment_method = sanitize_string(&self.payment_method);
        if payment_method.is_empty() {
            return Err(PaymentError::MissingPaymentMethod);
        }

        // Blank descriptions are defaulted; anything else is kept verbatim.
        let description = if self.description.trim().is_empty() {
            default_description(self.amount)
        } else {
            self.description.clone()
        };

        Ok(ValidCharge {
            amount: self.amount,
            currency,
            payment_method,
            description,
        })
    }
}
