//! Stripe webhook signatures and event mappings.
//!
//! Stripe signs `"{t}.{payload}"` with HMAC-SHA256 and sends the result as
//! `Stripe-Signature: t=<unix seconds>,v1=<hex>`. Several `v1` entries may be
//! present while a secret is being rolled.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use super::registry::{EventEffect, EventMapper, EventRegistry};
use super::{EventVerifier, ProviderEvent};
use crate::domain::{
    ProviderFields, TransactionState, TransactionStatus, TransactionType, CHARGE_ID,
    PAYMENT_INTENT_ID, REFUND_ID,
};
use crate::error::PaymentError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

pub const PAYMENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_INTENT_FAILED: &str = "payment_intent.payment_failed";
pub const CHARGE_REFUNDED: &str = "charge.refunded";
pub const CHARGE_REFUND_UPDATED: &str = "charge.refund.updated";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is empty")]
    EmptyHeader,
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("signature timestamp is not a number")]
    InvalidTimestamp,
    #[error("signature timestamp outside tolerance")]
    OutsideTolerance,
    #[error("no signature matches the payload")]
    Mismatch,
    #[error("invalid signing secret")]
    InvalidSecret,
}

impl From<SignatureError> for PaymentError {
    fn from(err: SignatureError) -> Self {
        PaymentError::EventVerificationFailed(err.to_string())
    }
}

fn signed_payload_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Checks a `Stripe-Signature` header against `payload` at time `now`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    if header.trim().is_empty() {
        return Err(SignatureError::EmptyHeader);
    }

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for item in header.split(',') {
        match item.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::InvalidTimestamp)?)
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let tolerance = i64::try_from(tolerance.as_secs()).unwrap_or(i64::MAX);
    if now.saturating_sub(timestamp) > tolerance {
        return Err(SignatureError::OutsideTolerance);
    }

    let mac = signed_payload_mac(secret, timestamp, payload)?;
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Builds a valid `Stripe-Signature` header for `payload`.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    let mac = signed_payload_mac(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: i64,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Clone)]
pub struct StripeEventVerifier {
    secret: String,
    tolerance: Duration,
}

impl StripeEventVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    pub fn verify_at(
        &self,
        payload: &[u8],
        signature: &str,
        now: i64,
    ) -> Result<ProviderEvent, PaymentError> {
        verify_signature(payload, signature, &self.secret, self.tolerance, now)?;

        let envelope: EventEnvelope = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::EventVerificationFailed(format!("malformed event payload: {}", e))
        })?;

        Ok(ProviderEvent {
            id: envelope.id,
            event_type: envelope.event_type,
            created: envelope.created,
            object: envelope.data.object,
        })
    }
}

impl EventVerifier for StripeEventVerifier {
    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    fn verify(&self, payload: &[u8], signature: &str) -> Result<ProviderEvent, PaymentError> {
        self.verify_at(payload, signature, Utc::now().timestamp())
    }
}

impl EventRegistry {
    /// Event types this service reconciles for Stripe.
    pub fn stripe() -> Self {
        Self::new([
            (PAYMENT_INTENT_SUCCEEDED, payment_intent_succeeded as EventMapper),
            (PAYMENT_INTENT_FAILED, payment_intent_failed as EventMapper),
            (CHARGE_REFUNDED, charge_refunded as EventMapper),
            (CHARGE_REFUND_UPDATED, refund_updated as EventMapper),
        ])
    }
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    transaction_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    #[serde(default)]
    latest_charge: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Deserialize)]
struct LastPaymentError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Charge {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    #[serde(default)]
    charge: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

fn parse<T: serde::de::DeserializeOwned>(object: &serde_json::Value) -> Result<T, String> {
    T::deserialize(object).map_err(|e| e.to_string())
}

fn handles(pairs: [(&str, Option<String>); 3]) -> ProviderFields {
    pairs
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), serde_json::Value::String(v)))
        })
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn payment_intent_succeeded(object: &serde_json::Value) -> Result<EventEffect, String> {
    let intent: PaymentIntent = parse(object)?;

    Ok(EventEffect {
        transaction_id: non_empty(intent.metadata.transaction_id),
        target: TransactionState::new(TransactionType::Charge, TransactionStatus::Succeeded),
        failure_reason: None,
        provider_fields: handles([
            (PAYMENT_INTENT_ID, Some(intent.id)),
            (CHARGE_ID, intent.latest_charge),
            (REFUND_ID, None),
        ]),
    })
}

fn payment_intent_failed(object: &serde_json::Value) -> Result<EventEffect, String> {
    let intent: PaymentIntent = parse(object)?;
    let (reason, failed_charge) = match intent.last_payment_error {
        Some(err) => (err.decline_code.or(err.code), err.charge),
        None => (None, None),
    };

    Ok(EventEffect {
        transaction_id: non_empty(intent.metadata.transaction_id),
        target: TransactionState::new(TransactionType::Charge, TransactionStatus::Failure),
        failure_reason: Some(reason.unwrap_or_else(|| "payment_failed".to_string())),
        provider_fields: handles([
            (PAYMENT_INTENT_ID, Some(intent.id)),
            (CHARGE_ID, failed_charge.or(intent.latest_charge)),
            (REFUND_ID, None),
        ]),
    })
}

fn charge_refunded(object: &serde_json::Value) -> Result<EventEffect, String> {
    let charge: Charge = parse(object)?;
    let status = match charge.status.as_str() {
        "succeeded" => TransactionStatus::Succeeded,
        "pending" => TransactionStatus::Pending,
        "failed" => TransactionStatus::Failure,
        other => return Err(format!("unexpected charge status {:?}", other)),
    };

    Ok(EventEffect {
        transaction_id: non_empty(charge.metadata.transaction_id),
        target: TransactionState::new(TransactionType::Refund, status),
        failure_reason: None,
        provider_fields: handles([
            (CHARGE_ID, Some(charge.id)),
            (PAYMENT_INTENT_ID, charge.payment_intent),
            (REFUND_ID, None),
        ]),
    })
}

fn refund_updated(object: &serde_json::Value) -> Result<EventEffect, String> {
    let refund: Refund = parse(object)?;
    let status = match refund.status.as_str() {
        "succeeded" => TransactionStatus::Succeeded,
        "pending" | "requires_action" => TransactionStatus::Pending,
        "failed" | "canceled" => TransactionStatus::Failure,
        other => return Err(format!("unexpected refund status {:?}", other)),
    };
    let failure_reason = match status {
        TransactionStatus::Failure => {
            Some(refund.failure_reason.unwrap_or_else(|| refund.status.clone()))
        }
        _ => None,
    };

    Ok(EventEffect {
        transaction_id: non_empty(refund.metadata.transaction_id),
        target: TransactionState::new(TransactionType::Refund, status),
        failure_reason,
        provider_fields: handles([
            (REFUND_ID, Some(refund.id)),
            (CHARGE_ID, refund.charge),
            (PAYMENT_INTENT_ID, refund.payment_intent),
        ]),
    })
}
