//! Payment engines over the Balance Ledger.
//!
//! Every operation runs its ledger work as one unit of work on the blocking
//! pool. Gateway calls happen between units, never while rows are locked.

use std::sync::Arc;

use actix_web::web;
use bigdecimal::{BigDecimal, Signed};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::warn;

use crate::database::models::{Category, Loan, Merchant, Transaction, TxKind, TxStatus};
use crate::database::{zero, Ledger, LedgerStore};
use crate::error::{Error, Result};
use crate::fees::FeeSplit;
use crate::gateway::Gateway;
use crate::idgen::{self, TxPrefix};
use crate::notify::Notifier;

pub mod gateway_payment;
pub mod instant;
pub mod loans;
pub mod reconcile;
pub mod topup;

pub use gateway_payment::{GatewayPayment, Payer};
pub use instant::InstantPayment;
pub use topup::{Account, TopUp};

pub struct PaymentService<S> {
    pub(crate) store: Arc<S>,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) notifier: Arc<dyn Notifier>,
}

impl<S> Clone for PaymentService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<S: LedgerStore> PaymentService<S> {
    pub fn new(store: Arc<S>, gateway: Arc<dyn Gateway>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs `work` as one unit of work on the blocking pool.
    pub(crate) async fn ledger<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Ledger) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        web::block(move || store.atomically(work))
            .await
            .map_err(|e| Error::Internal(format!("ledger worker failed: {e}")))?
    }

    /// Notification failures never reach the caller.
    pub(crate) async fn notify(&self, tx: &Transaction) {
        if let Err(err) = self.notifier.transaction_completed(tx).await {
            warn!(transaction_id = tx.id.as_str(), error = %err, "notification failed");
        }
    }

    /// Global balance, card top-up total and every per-merchant balance.
    pub async fn balance(&self, user_id: i64) -> Result<BalanceView> {
        self.ledger(move |ledger| {
            let user = ledger
                .user_for_update(user_id)?
                .ok_or_else(|| Error::not_found("user", user_id))?;
            let mut merchants = Vec::new();
            for row in ledger.merchant_user_balances(user_id)? {
                let loans = ledger.outstanding_loans(user_id, row.merchant_id)?;
                let outstanding_loan = if loans.is_empty() {
                    None
                } else {
                    Some(loans.into_iter().map(|l| l.remaining_amount).sum::<BigDecimal>())
                };
                merchants.push(MerchantBalanceView {
                    merchant_id: row.merchant_id,
                    balance: row.balance,
                    total_topped_up: row.total_topped_up,
                    outstanding_loan,
                });
            }
            Ok(BalanceView {
                user_id: user.id,
                phone: user.phone,
                global_balance: user.global_balance,
                total_topped_up: user.total_topped_up,
                merchants,
            })
        })
        .await
    }
}

/// A transaction as returned to callers, with its loan for LOAN top-ups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loan: Option<Loan>,
}

impl TransactionView {
    pub fn new(transaction: Transaction, loan: Option<Loan>) -> Self {
        Self { transaction, loan }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub user_id: i64,
    pub phone: String,
    pub global_balance: BigDecimal,
    pub total_topped_up: BigDecimal,
    pub merchants: Vec<MerchantBalanceView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantBalanceView {
    pub merchant_id: i64,
    pub balance: BigDecimal,
    pub total_topped_up: BigDecimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outstanding_loan: Option<BigDecimal>,
}

pub(crate) fn now() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

pub(crate) fn ensure_positive(amount: &BigDecimal) -> Result<()> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(Error::BadParameter(format!("amount must be positive, got {amount}")))
    }
}

pub(crate) fn clamp_zero(value: BigDecimal) -> BigDecimal {
    if value.is_negative() {
        zero()
    } else {
        value
    }
}

pub(crate) fn require_active(merchant: Option<Merchant>, merchant_id: i64) -> Result<Merchant> {
    let merchant = merchant.ok_or_else(|| Error::not_found("merchant", merchant_id))?;
    if !merchant.is_active() {
        return Err(Error::MerchantInactive(merchant_id));
    }
    Ok(merchant)
}

pub(crate) fn require_category(ledger: &mut dyn Ledger, category_id: i64) -> Result<Category> {
    let category = ledger
        .category(category_id)?
        .ok_or_else(|| Error::not_found("category", category_id))?;
    if !category.active {
        return Err(Error::Validation(format!("category {category_id} is not active")));
    }
    Ok(category)
}

/// A submerchant inherits flexibility from its parent.
pub(crate) fn is_flexible(ledger: &mut dyn Ledger, merchant: &Merchant) -> Result<bool> {
    if merchant.is_flexible {
        return Ok(true);
    }
    match merchant.parent_merchant_id {
        Some(parent_id) => Ok(ledger.merchant(parent_id)?.map_or(false, |p| p.is_flexible)),
        None => Ok(false),
    }
}

/// Applies a received payment to a merchant row locked by the caller.
/// Returns the remaining balance before and after.
pub(crate) fn credit_merchant(
    ledger: &mut dyn Ledger,
    merchant: &mut Merchant,
    amount: &BigDecimal,
) -> Result<(BigDecimal, BigDecimal)> {
    let before = merchant.remaining_balance.clone();
    merchant.remaining_balance = clamp_zero(&merchant.remaining_balance - amount);
    merchant.wallet_balance += amount;
    merchant.total_received += amount;
    ledger.update_merchant_balances(merchant)?;
    Ok((before, merchant.remaining_balance.clone()))
}

pub(crate) fn draft(prefix: TxPrefix, kind: TxKind, amount: &BigDecimal) -> Transaction {
    let now = now();
    Transaction {
        id: idgen::transaction_id(prefix),
        kind,
        top_up_type: None,
        user_id: None,
        merchant_id: None,
        category_id: None,
        payer_phone: None,
        amount: amount.clone(),
        status: TxStatus::Pending,
        gateway_tx_id: None,
        message: None,
        balance_before: None,
        balance_after: None,
        merchant_balance_before: None,
        merchant_balance_after: None,
        discount_amount: zero(),
        user_bonus_amount: zero(),
        admin_income_amount: zero(),
        commission_amount: zero(),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn apply_fees(tx: &mut Transaction, fees: &FeeSplit) {
    tx.discount_amount = fees.discount.clone();
    tx.user_bonus_amount = fees.user_bonus.clone();
    tx.commission_amount = fees.commission.clone();
    tx.admin_income_amount = fees.admin_income.clone();
}
