pub mod memory_transaction_store;
pub mod postgres_transaction_store;

pub use memory_transaction_store::InMemoryTransactionStore;
pub use postgres_transaction_store::PostgresTransactionStore;
