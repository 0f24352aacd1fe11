//! Inbound provider events: authentication and mapping to lifecycle effects.

use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

pub mod registry;
pub mod stripe;

pub use registry::{EventEffect, EventMapper, EventRegistry};
pub use stripe::StripeEventVerifier;

/// An authenticated, parsed provider event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    pub event_type: String,
    pub created: i64,
    /// The provider object the event is about (payment intent, charge, refund).
    pub object: serde_json::Value,
}

/// Authenticates a raw webhook delivery.
///
/// Implementations must reject any payload whose signature does not match
/// before parsing it into a `ProviderEvent`.
pub trait EventVerifier: Send + Sync {
    /// Header carrying the provider signature.
    fn signature_header(&self) -> &'static str;

    fn verify(&self, payload: &[u8], signature: &str) -> Result<ProviderEvent, PaymentError>;
}
