use bigdecimal::BigDecimal;
use tracing::{info, instrument};

use super::gateway_payment::{receiving_phone, Prepared};
use super::{draft, ensure_positive, now, require_active, PaymentService, TransactionView};
use crate::database::models::{Loan, LoanStatus, TopUpType, TxKind, TxStatus, User, UserStatus};
use crate::database::{zero, Ledger, LedgerStore};
use crate::error::{Error, Result};
use crate::gateway::{InitiateRequest, Transfer};
use crate::idgen::{self, TxPrefix};
use crate::phone;

/// Who is being topped up.
#[derive(Debug, Clone, PartialEq)]
pub enum Account {
    User(i64),
    /// Any accepted phone form; an unknown number enrolls a new user.
    Phone(String),
}

#[derive(Debug, Clone)]
pub struct TopUp {
    pub account: Account,
    pub merchant_id: Option<i64>,
    pub amount: BigDecimal,
    pub kind: TopUpType,
}

impl<S: LedgerStore> PaymentService<S> {
    /// CASH and LOAN top-ups are credited at once; MOMO waits for the gateway.
    #[instrument(skip(self, top_up), fields(kind = %top_up.kind, merchant_id = ?top_up.merchant_id))]
    pub async fn top_up(&self, top_up: TopUp) -> Result<TransactionView> {
        ensure_positive(&top_up.amount)?;
        match top_up.kind {
            TopUpType::Cash | TopUpType::Loan => {
                let view = self.ledger(move |ledger| settle(ledger, &top_up)).await?;
                info!(
                    transaction_id = view.transaction.id.as_str(),
                    amount = %view.transaction.amount,
                    loan_id = view.loan.as_ref().map(|l| l.id),
                    "top-up credited"
                );
                self.notify(&view.transaction).await;
                Ok(view)
            }
            TopUpType::Momo => {
                let prepared = self.ledger(move |ledger| prepare_momo(ledger, &top_up)).await?;
                let tx = self.initiate_and_record(prepared).await?;
                Ok(TransactionView::new(tx, None))
            }
        }
    }
}

/// Finds the user, enrolling a bare account for an unknown phone number.
fn resolve_account(ledger: &mut dyn Ledger, account: &Account) -> Result<User> {
    let user = match account {
        Account::User(user_id) => ledger
            .user_for_update(*user_id)?
            .ok_or_else(|| Error::not_found("user", user_id))?,
        Account::Phone(raw) => {
            let phone = phone::normalize(raw)?;
            match ledger.user_by_phone_for_update(&phone)? {
                Some(user) => user,
                None => {
                    let user = User {
                        id: idgen::next(),
                        phone,
                        pin_hash: None,
                        global_balance: zero(),
                        total_topped_up: zero(),
                        status: UserStatus::Active,
                        created_at: now(),
                    };
                    ledger.insert_user(&user)?;
                    info!(user_id = user.id, "user enrolled by top-up");
                    user
                }
            }
        }
    };
    if user.status != UserStatus::Active {
        return Err(Error::UserInactive);
    }
    Ok(user)
}

/// Credits a top-up to a user row locked by the caller. A merchant-funded
/// top-up is also booked on the (user, merchant) balance; a card top-up
/// without a merchant on the user's own total. Returns the global balance
/// before and after.
pub(crate) fn credit_top_up(
    ledger: &mut dyn Ledger,
    user: &mut User,
    merchant_id: Option<i64>,
    amount: &BigDecimal,
) -> Result<(BigDecimal, BigDecimal)> {
    match merchant_id {
        Some(merchant_id) => {
            let mut row = ledger.ensure_merchant_user_balance(user.id, merchant_id)?;
            row.balance += amount;
            row.total_topped_up += amount;
            row.updated_at = now();
            ledger.update_merchant_user_balance(&row)?;
        }
        None => user.total_topped_up += amount,
    }
    let before = user.global_balance.clone();
    user.global_balance += amount;
    ledger.update_user_balances(user)?;
    Ok((before, user.global_balance.clone()))
}

fn settle(ledger: &mut dyn Ledger, top_up: &TopUp) -> Result<TransactionView> {
    let mut user = resolve_account(ledger, &top_up.account)?;
    let merchant_id = top_up
        .merchant_id
        .ok_or_else(|| Error::Validation(format!("{} top-up requires a merchant", top_up.kind)))?;
    require_active(ledger.merchant(merchant_id)?, merchant_id)?;

    let (before, after) = credit_top_up(ledger, &mut user, Some(merchant_id), &top_up.amount)?;
    let mut tx = draft(TxPrefix::TopUp, TxKind::TopUp, &top_up.amount);
    tx.top_up_type = Some(top_up.kind);
    tx.user_id = Some(user.id);
    tx.merchant_id = Some(merchant_id);
    tx.payer_phone = Some(user.phone.clone());
    tx.status = TxStatus::Success;
    tx.balance_before = Some(before);
    tx.balance_after = Some(after);
    ledger.insert_transaction(&tx)?;

    let loan = if top_up.kind == TopUpType::Loan {
        let loan = Loan {
            id: idgen::next(),
            user_id: user.id,
            merchant_id,
            transaction_id: tx.id.clone(),
            loan_amount: top_up.amount.clone(),
            paid_amount: zero(),
            remaining_amount: top_up.amount.clone(),
            status: LoanStatus::Pending,
            created_at: tx.created_at,
            updated_at: tx.created_at,
        };
        ledger.insert_loan(&loan)?;
        Some(loan)
    } else {
        None
    };
    Ok(TransactionView::new(tx, loan))
}

fn prepare_momo(ledger: &mut dyn Ledger, top_up: &TopUp) -> Result<Prepared> {
    let user = resolve_account(ledger, &top_up.account)?;
    let merchant = match top_up.merchant_id {
        Some(merchant_id) => {
            let merchant = require_active(ledger.merchant(merchant_id)?, merchant_id)?;
            ledger.ensure_merchant_user_balance(user.id, merchant_id)?;
            Some(merchant)
        }
        None => None,
    };
    let settings = ledger.settings()?;
    let receiver = receiving_phone(ledger, merchant.as_ref(), &settings)?;

    let message = format!("Wallet top-up for {}", user.phone);
    let mut tx = draft(TxPrefix::TopUp, TxKind::TopUp, &top_up.amount);
    tx.top_up_type = Some(TopUpType::Momo);
    tx.user_id = Some(user.id);
    tx.merchant_id = merchant.as_ref().map(|m| m.id);
    tx.payer_phone = Some(user.phone.clone());

    Ok(Prepared {
        tx,
        request: InitiateRequest {
            amount: top_up.amount.clone(),
            currency: settings.currency,
            payer_phone: user.phone,
            transfers: vec![Transfer {
                amount: top_up.amount.clone(),
                phone: receiver,
                message: message.clone(),
            }],
            message,
        },
    })
}
