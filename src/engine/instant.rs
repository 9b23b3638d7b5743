use std::cmp::min;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use tracing::{info, instrument};

use super::{
    apply_fees, clamp_zero, credit_merchant, draft, ensure_positive, is_flexible, require_active, require_category,
    PaymentService, TransactionView,
};
use crate::database::models::{Transaction, TxKind, TxStatus, UserStatus};
use crate::database::{Ledger, LedgerStore};
use crate::error::{Error, Result};
use crate::fees;
use crate::idgen::TxPrefix;
use crate::pin;

/// A card-present payment authenticated by PIN.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantPayment {
    pub user_id: i64,
    pub pin: String,
    pub merchant_id: i64,
    pub category_id: i64,
    pub amount: BigDecimal,
}

impl std::fmt::Debug for InstantPayment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantPayment")
            .field("user_id", &self.user_id)
            .field("merchant_id", &self.merchant_id)
            .field("category_id", &self.category_id)
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore> PaymentService<S> {
    /// Settles a payment synchronously. The transaction is created in SUCCESS
    /// or not at all.
    #[instrument(skip(self, payment), fields(user_id = payment.user_id, merchant_id = payment.merchant_id))]
    pub async fn pay(&self, payment: InstantPayment) -> Result<TransactionView> {
        ensure_positive(&payment.amount)?;
        let tx = self.ledger(move |ledger| settle(ledger, &payment)).await?;
        info!(
            transaction_id = tx.id.as_str(),
            amount = %tx.amount,
            user_bonus = %tx.user_bonus_amount,
            "instant payment settled"
        );
        self.notify(&tx).await;
        Ok(TransactionView::new(tx, None))
    }
}

fn settle(ledger: &mut dyn Ledger, payment: &InstantPayment) -> Result<Transaction> {
    let amount = &payment.amount;
    let mut user = ledger
        .user_for_update(payment.user_id)?
        .ok_or_else(|| Error::not_found("user", payment.user_id))?;
    if !pin::verify_pin(user.pin_hash.as_deref(), &payment.pin) {
        return Err(Error::InvalidCredential);
    }
    if user.status != UserStatus::Active {
        return Err(Error::UserInactive);
    }
    let mut merchant = require_active(ledger.merchant_for_update(payment.merchant_id)?, payment.merchant_id)?;
    require_category(ledger, payment.category_id)?;

    let mut available = user.global_balance.clone();
    if !is_flexible(ledger, &merchant)? {
        let relationship = ledger.merchant_user_balance_for_update(user.id, merchant.id)?;

        // loaned funds stay locked until the loan is repaid
        let loans = ledger.outstanding_loans(user.id, merchant.id)?;
        if !loans.is_empty() {
            let loaned = match &relationship {
                Some(row) => row.balance.clone(),
                None => loans.into_iter().map(|l| l.remaining_amount).sum(),
            };
            available = clamp_zero(&available - &min(loaned, available.clone()));
        }

        if &merchant.remaining_balance - amount < BigDecimal::from(1) {
            let topped_up = relationship.map_or(false, |row| row.total_topped_up > BigDecimal::from(0));
            return Err(if topped_up {
                Error::MerchantBalanceLow(merchant.id)
            } else {
                Error::NoMerchantRelationship(merchant.id)
            });
        }
    }
    if &available < amount {
        return Err(Error::InsufficientBalance {
            available,
            requested: amount.clone(),
        });
    }

    let fees = fees::split(
        amount,
        &merchant.discount_percentage,
        &merchant.user_bonus_percentage,
        &merchant.commission_percentage,
    )?;

    let balance_before = user.global_balance.clone();
    user.global_balance = clamp_zero(&user.global_balance - amount + &fees.user_bonus);
    ledger.update_user_balances(&user)?;
    let (merchant_before, merchant_after) = credit_merchant(ledger, &mut merchant, amount)?;

    let mut tx = draft(TxPrefix::Payment, TxKind::Payment, amount);
    tx.user_id = Some(user.id);
    tx.merchant_id = Some(merchant.id);
    tx.category_id = Some(payment.category_id);
    tx.payer_phone = Some(user.phone.clone());
    tx.status = TxStatus::Success;
    tx.balance_before = Some(balance_before);
    tx.balance_after = Some(user.global_balance.clone());
    tx.merchant_balance_before = Some(merchant_before);
    tx.merchant_balance_after = Some(merchant_after);
    apply_fees(&mut tx, &fees);
    ledger.insert_transaction(&tx)?;
    Ok(tx)
}
