pub mod transaction;

pub use transaction::{
    PaymentProvider, ProviderFields, Transaction, TransactionState, TransactionStatus,
    TransactionType, TransactionUpdate, Transition, UnknownVariant, CHARGE_ID, IDEMPOTENCY_KEY,
    PAYMENT_INTENT_ID, REFUND_ID, REFUND_IDS,
};
