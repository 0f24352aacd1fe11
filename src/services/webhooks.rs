use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::PaymentProvider;
use crate::error::PaymentError;
use crate::services::reconciler::EventReconciler;
use crate::webhook::{EventRegistry, EventVerifier};

struct ProviderHooks {
    verifier: Arc<dyn EventVerifier>,
    registry: EventRegistry,
}

/// Acknowledgement returned for a processed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReceipt {
    pub received: bool,
    pub event_id: String,
    pub event_type: String,
    pub transaction_id: String,
    pub applied: bool,
}

/// Verifies and reconciles provider webhook deliveries.
#[derive(Clone)]
pub struct WebhookService {
    providers: Arc<HashMap<PaymentProvider, ProviderHooks>>,
    reconciler: EventReconciler,
}

impl WebhookService {
    pub fn builder(reconciler: EventReconciler) -> WebhookServiceBuilder {
        WebhookServiceBuilder {
            providers: HashMap::new(),
            reconciler,
        }
    }

    fn hooks(&self, provider: &str) -> Result<&ProviderHooks, PaymentError> {
        provider
            .parse::<PaymentProvider>()
            .ok()
            .and_then(|p| self.providers.get(&p))
            .ok_or_else(|| PaymentError::UnsupportedProvider(provider.to_string()))
    }

    /// Header the named provider signs deliveries in.
    pub fn signature_header(&self, provider: &str) -> Result<&'static str, PaymentError> {
        Ok(self.hooks(provider)?.verifier.signature_header())
    }

    pub async fn handle(
        &self,
        provider: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookReceipt, PaymentError> {
        let hooks = self.hooks(provider)?;

        let event = hooks.verifier.verify(payload, signature).map_err(|e| {
            tracing::warn!(provider, error = %e, "rejected webhook delivery");
            e
        })?;
        let effect = hooks.registry.resolve(&event).map_err(|e| {
            tracing::warn!(
                provider,
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "ignoring event"
            );
            e
        })?;

        let outcome = self.reconciler.reconcile(effect).await?;
        let tx = outcome.transaction();

        tracing::info!(
            provider,
            event_id = %event.id,
            event_type = %event.event_type,
            transaction_id = %tx.transaction_id,
            state = %tx.state(),
            applied = outcome.is_applied(),
            "webhook reconciled"
        );

        Ok(WebhookReceipt {
            received: true,
            applied: outcome.is_applied(),
            transaction_id: tx.transaction_id.clone(),
            event_id: event.id,
            event_type: event.event_type,
        })
    }
}

pub struct WebhookServiceBuilder {
    providers: HashMap<PaymentProvider, ProviderHooks>,
    reconciler: EventReconciler,
}

impl WebhookServiceBuilder {
    pub fn provider(
        mut self,
        provider: PaymentProvider,
        verifier: Arc<dyn EventVerifier>,
        registry: EventRegistry,
    ) -> Self {
        self.providers
            .insert(provider, ProviderHooks { verifier, registry });
        self
    }

    pub fn build(self) -> WebhookService {
        WebhookService {
            providers: Arc::new(self.providers),
            reconciler: self.reconciler,
        }
    }
}
