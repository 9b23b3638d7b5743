//! In-memory ledger backend.
//!
//! Used when no database is configured and by the engine tests. A unit of work
//! runs on a copy of the state under one mutex and the copy replaces the state
//! only when the unit returns `Ok`, so units are serialized and roll back on
//! error just like a database transaction.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;

use crate::database::models::{
    Category, Loan, Merchant, MerchantUserBalance, PlatformSettings, Transaction, TxStatus, User,
};
use crate::database::{zero, Ledger, LedgerStore, StaleCursor};
use crate::error::{Error, Result};
use crate::idgen;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    settings: Option<PlatformSettings>,
    users: BTreeMap<i64, User>,
    merchants: BTreeMap<i64, Merchant>,
    categories: BTreeMap<i64, Category>,
    merchant_user_balances: BTreeMap<(i64, i64), MerchantUserBalance>,
    loans: BTreeMap<i64, Loan>,
    transactions: BTreeMap<String, Transaction>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory ledger lock poisoned".to_string()))
    }

    /// Registers a merchant. Merchant onboarding happens outside this service.
    pub fn insert_merchant(&self, merchant: Merchant) -> Result<()> {
        self.lock()?.merchants.insert(merchant.id, merchant);
        Ok(())
    }

    pub fn insert_category(&self, category: Category) -> Result<()> {
        self.lock()?.categories.insert(category.id, category);
        Ok(())
    }

    pub fn insert_user(&self, user: User) -> Result<()> {
        self.atomically(|ledger| ledger.insert_user(&user))
    }

    pub fn replace_settings(&self, settings: PlatformSettings) -> Result<()> {
        self.lock()?.settings = Some(settings);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.lock()?.transactions.values().cloned().collect())
    }
}

impl LedgerStore for MemoryStore {
    fn atomically<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T>,
    {
        let mut state = self.lock()?;
        let mut working = state.clone();
        let out = work(&mut MemoryLedger { state: &mut working })?;
        *state = working;
        Ok(out)
    }
}

struct MemoryLedger<'s> {
    state: &'s mut MemoryState,
}

impl Ledger for MemoryLedger<'_> {
    fn settings(&mut self) -> Result<PlatformSettings> {
        Ok(self.state.settings.get_or_insert_with(PlatformSettings::default).clone())
    }

    fn user_for_update(&mut self, user_id: i64) -> Result<Option<User>> {
        Ok(self.state.users.get(&user_id).cloned())
    }

    fn user_by_phone_for_update(&mut self, phone: &str) -> Result<Option<User>> {
        Ok(self.state.users.values().find(|u| u.phone == phone).cloned())
    }

    fn insert_user(&mut self, user: &User) -> Result<()> {
        if self.state.users.contains_key(&user.id) || self.state.users.values().any(|u| u.phone == user.phone) {
            return Err(Error::Internal(format!("duplicate user {} / {}", user.id, user.phone)));
        }
        self.state.users.insert(user.id, user.clone());
        Ok(())
    }

    fn update_user_balances(&mut self, user: &User) -> Result<()> {
        let row = self
            .state
            .users
            .get_mut(&user.id)
            .ok_or_else(|| Error::not_found("user", user.id))?;
        row.global_balance = user.global_balance.clone();
        row.total_topped_up = user.total_topped_up.clone();
        Ok(())
    }

    fn merchant(&mut self, merchant_id: i64) -> Result<Option<Merchant>> {
        Ok(self.state.merchants.get(&merchant_id).cloned())
    }

    fn merchant_for_update(&mut self, merchant_id: i64) -> Result<Option<Merchant>> {
        self.merchant(merchant_id)
    }

    fn update_merchant_balances(&mut self, merchant: &Merchant) -> Result<()> {
        let row = self
            .state
            .merchants
            .get_mut(&merchant.id)
            .ok_or_else(|| Error::not_found("merchant", merchant.id))?;
        row.wallet_balance = merchant.wallet_balance.clone();
        row.total_received = merchant.total_received.clone();
        row.remaining_balance = merchant.remaining_balance.clone();
        Ok(())
    }

    fn category(&mut self, category_id: i64) -> Result<Option<Category>> {
        Ok(self.state.categories.get(&category_id).cloned())
    }

    fn merchant_user_balance_for_update(
        &mut self,
        user_id: i64,
        merchant_id: i64,
    ) -> Result<Option<MerchantUserBalance>> {
        Ok(self.state.merchant_user_balances.get(&(user_id, merchant_id)).cloned())
    }

    fn ensure_merchant_user_balance(
        &mut self,
        user_id: i64,
        merchant_id: i64,
    ) -> Result<MerchantUserBalance> {
        let now = chrono::Utc::now().naive_utc();
        let row = self
            .state
            .merchant_user_balances
            .entry((user_id, merchant_id))
            .or_insert_with(|| MerchantUserBalance {
                id: idgen::next(),
                user_id,
                merchant_id,
                balance: zero(),
                total_topped_up: zero(),
                created_at: now,
                updated_at: now,
            });
        Ok(row.clone())
    }

    fn update_merchant_user_balance(&mut self, balance: &MerchantUserBalance) -> Result<()> {
        let row = self
            .state
            .merchant_user_balances
            .get_mut(&(balance.user_id, balance.merchant_id))
            .ok_or_else(|| Error::not_found("merchant user balance", balance.id))?;
        row.balance = balance.balance.clone();
        row.total_topped_up = balance.total_topped_up.clone();
        row.updated_at = balance.updated_at;
        Ok(())
    }

    fn merchant_user_balances(&mut self, user_id: i64) -> Result<Vec<MerchantUserBalance>> {
        let mut rows: Vec<MerchantUserBalance> = self
            .state
            .merchant_user_balances
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.created_at);
        Ok(rows)
    }

    fn loan_for_update(&mut self, loan_id: i64) -> Result<Option<Loan>> {
        Ok(self.state.loans.get(&loan_id).cloned())
    }

    fn loan_by_transaction(&mut self, transaction_id: &str) -> Result<Option<Loan>> {
        Ok(self
            .state
            .loans
            .values()
            .find(|l| l.transaction_id == transaction_id)
            .cloned())
    }

    fn outstanding_loans(&mut self, user_id: i64, merchant_id: i64) -> Result<Vec<Loan>> {
        let mut rows: Vec<Loan> = self
            .state
            .loans
            .values()
            .filter(|l| l.user_id == user_id && l.merchant_id == merchant_id && l.is_outstanding())
            .cloned()
            .collect();
        rows.sort_by_key(|l| l.created_at);
        Ok(rows)
    }

    fn insert_loan(&mut self, loan: &Loan) -> Result<()> {
        self.state.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    fn update_loan(&mut self, loan: &Loan) -> Result<()> {
        let row = self
            .state
            .loans
            .get_mut(&loan.id)
            .ok_or_else(|| Error::not_found("loan", loan.id))?;
        row.paid_amount = loan.paid_amount.clone();
        row.remaining_amount = loan.remaining_amount.clone();
        row.status = loan.status;
        row.updated_at = loan.updated_at;
        Ok(())
    }

    fn transaction(&mut self, id: &str) -> Result<Option<Transaction>> {
        Ok(self.state.transactions.get(id).cloned())
    }

    fn transaction_for_update(&mut self, id: &str) -> Result<Option<Transaction>> {
        self.transaction(id)
    }

    fn transaction_by_gateway_id_for_update(&mut self, gateway_tx_id: &str) -> Result<Option<Transaction>> {
        Ok(self
            .state
            .transactions
            .values()
            .find(|t| t.gateway_tx_id.as_deref() == Some(gateway_tx_id))
            .cloned())
    }

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
        if self.state.transactions.contains_key(&tx.id) {
            return Err(Error::Internal(format!("duplicate transaction {}", tx.id)));
        }
        self.state.transactions.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    fn update_transaction(&mut self, id: &str, tx: &Transaction) -> Result<()> {
        let row = self
            .state
            .transactions
            .get_mut(id)
            .ok_or_else(|| Error::not_found("transaction", id))?;
        row.status = tx.status;
        row.gateway_tx_id = tx.gateway_tx_id.clone();
        row.message = tx.message.clone();
        row.balance_before = tx.balance_before.clone();
        row.balance_after = tx.balance_after.clone();
        row.merchant_balance_before = tx.merchant_balance_before.clone();
        row.merchant_balance_after = tx.merchant_balance_after.clone();
        row.updated_at = tx.updated_at;
        Ok(())
    }

    fn stale_pending(
        &mut self,
        created_before: NaiveDateTime,
        after: Option<&StaleCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        let mut rows: Vec<Transaction> = self
            .state
            .transactions
            .values()
            .filter(|t| t.status == TxStatus::Pending && t.created_at < created_before && t.gateway_tx_id.is_some())
            .filter(|t| after.map_or(true, |c| (t.created_at, t.id.as_str()) > (c.created_at, c.id.as_str())))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(rows)
    }
}
