pub mod memory;
pub mod postgres_deposit_repository;
pub mod postgres_ledger_repository;
pub mod postgres_withdrawal_repository;

pub use memory::MemoryStore;
pub use postgres_deposit_repository::PostgresDepositRepository;
pub use postgres_ledger_repository::PostgresLedgerRepository;
pub use postgres_withdrawal_repository::PostgresWithdrawalRepository;

use std::sync::Arc;

use sqlx::PgPool;

use crate::ports::{DepositRepository, LedgerRepository, WithdrawalRepository};

/// The three storage ports, backed by one store.
#[derive(Clone)]
pub struct Repositories {
    pub ledger: Arc<dyn LedgerRepository>,
    pub deposits: Arc<dyn DepositRepository>,
    pub withdrawals: Arc<dyn WithdrawalRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            ledger: store.clone(),
            deposits: store.clone(),
            withdrawals: store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            ledger: Arc::new(PostgresLedgerRepository::new(pool.clone())),
            deposits: Arc::new(PostgresDepositRepository::new(pool.clone())),
            withdrawals: Arc::new(PostgresWithdrawalRepository::new(pool)),
        }
    }
}
