//! Balance Ledger: the only mutable shared state of the service.
//!
//! Engines never touch a backend directly. They describe a unit of work as a
//! closure over [`Ledger`] and hand it to [`LedgerStore::atomically`], which
//! commits it as a whole or not at all. Every `*_for_update` read takes the
//! row lock for the rest of the unit.

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;

use crate::error::Result;
use models::{
    Category, Loan, Merchant, MerchantUserBalance, PlatformSettings, Transaction, User,
};

pub mod connect;
pub mod memory;
pub mod models;
pub mod postgres;

pub trait Ledger {
    /// Platform settings, creating the default record on first read.
    fn settings(&mut self) -> Result<PlatformSettings>;

    fn user_for_update(&mut self, user_id: i64) -> Result<Option<User>>;
    fn user_by_phone_for_update(&mut self, phone: &str) -> Result<Option<User>>;
    fn insert_user(&mut self, user: &User) -> Result<()>;
    fn update_user_balances(&mut self, user: &User) -> Result<()>;

    fn merchant(&mut self, merchant_id: i64) -> Result<Option<Merchant>>;
    fn merchant_for_update(&mut self, merchant_id: i64) -> Result<Option<Merchant>>;
    fn update_merchant_balances(&mut self, merchant: &Merchant) -> Result<()>;

    fn category(&mut self, category_id: i64) -> Result<Option<Category>>;

    fn merchant_user_balance_for_update(
        &mut self,
        user_id: i64,
        merchant_id: i64,
    ) -> Result<Option<MerchantUserBalance>>;
    /// Returns the (user, merchant) balance row, creating an empty one if
    /// the pair has none yet.
    fn ensure_merchant_user_balance(
        &mut self,
        user_id: i64,
        merchant_id: i64,
    ) -> Result<MerchantUserBalance>;
    fn update_merchant_user_balance(&mut self, balance: &MerchantUserBalance) -> Result<()>;
    fn merchant_user_balances(&mut self, user_id: i64) -> Result<Vec<MerchantUserBalance>>;

    fn loan_for_update(&mut self, loan_id: i64) -> Result<Option<Loan>>;
    fn loan_by_transaction(&mut self, transaction_id: &str) -> Result<Option<Loan>>;
    /// Loans between the pair that are neither completed nor below one unit owed.
    fn outstanding_loans(&mut self, user_id: i64, merchant_id: i64) -> Result<Vec<Loan>>;
    fn insert_loan(&mut self, loan: &Loan) -> Result<()>;
    fn update_loan(&mut self, loan: &Loan) -> Result<()>;

    fn transaction(&mut self, id: &str) -> Result<Option<Transaction>>;
    fn transaction_for_update(&mut self, id: &str) -> Result<Option<Transaction>>;
    fn transaction_by_gateway_id_for_update(&mut self, gateway_tx_id: &str) -> Result<Option<Transaction>>;
    fn insert_transaction(&mut self, tx: &Transaction) -> Result<()>;
    /// Writes the mutable part of a transaction (status, gateway id, message,
    /// balance snapshots) to the row keyed by `id`. The id itself is never written.
    fn update_transaction(&mut self, id: &str, tx: &Transaction) -> Result<()>;
    /// PENDING transactions created before `created_before` that carry a
    /// gateway id, ordered by `(created_at, id)` and starting strictly after
    /// `after` when a cursor is given.
    fn stale_pending(
        &mut self,
        created_before: NaiveDateTime,
        after: Option<&StaleCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>>;
}

/// Keyset position of the last stale row a sweep has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleCursor {
    pub created_at: NaiveDateTime,
    pub id: String,
}

impl StaleCursor {
    pub fn of(tx: &Transaction) -> Self {
        Self {
            created_at: tx.created_at,
            id: tx.id.clone(),
        }
    }
}

/// Runs units of work against a ledger backend.
pub trait LedgerStore: Send + Sync + 'static {
    fn atomically<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T>;
}

/// The backend chosen at start-up.
pub enum Store {
    Postgres(postgres::PgStore),
    Memory(memory::MemoryStore),
}

impl LedgerStore for Store {
    fn atomically<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T>,
    {
        match self {
            Store::Postgres(store) => store.atomically(work),
            Store::Memory(store) => store.atomically(work),
        }
    }
}

pub(crate) fn zero() -> BigDecimal {
    BigDecimal::from(0)
}
