use std::collections::HashMap;

use super::ProviderEvent;
use crate::domain::{ProviderFields, TransactionState};
use crate::error::PaymentError;

/// What a supported event asks the reconciler to do.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEffect {
    /// Local id echoed back through provider metadata, when present.
    pub transaction_id: Option<String>,
    pub target: TransactionState,
    pub failure_reason: Option<String>,
    /// Handles carried by the event; also used for correlation when the
    /// transaction id is absent or unknown.
    pub provider_fields: ProviderFields,
}

/// Maps a verified event object to an effect. Returns a description of the
/// problem when the object lacks what the mapping needs.
pub type EventMapper = fn(&serde_json::Value) -> Result<EventEffect, String>;

/// Immutable event-type dispatch table, built once at startup.
#[derive(Clone)]
pub struct EventRegistry {
    rules: HashMap<&'static str, EventMapper>,
}

impl EventRegistry {
    pub fn new(rules: impl IntoIterator<Item = (&'static str, EventMapper)>) -> Self {
        Self {
            rules: rules.into_iter().collect(),
        }
    }

    pub fn supports(&self, event_type: &str) -> bool {
        self.rules.contains_key(event_type)
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.rules.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn resolve(&self, event: &ProviderEvent) -> Result<EventEffect, PaymentError> {
        let mapper = self
            .rules
            .get(event.event_type.as_str())
            .ok_or_else(|| PaymentError::UnsupportedEvent(event.event_type.clone()))?;

        mapper(&event.object).map_err(|reason| {
            PaymentError::EventVerificationFailed(format!(
                "{} event {}: {}",
                event.event_type, event.id, reason
            ))
        })
    }
}
