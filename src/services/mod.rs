pub mod payments;
pub mod reconciler;
pub mod transitions;
pub mod webhooks;

pub use payments::PaymentService;
pub use reconciler::EventReconciler;
pub use transitions::{apply_guarded, TransitionOutcome};
pub use webhooks::{WebhookReceipt, WebhookService};
