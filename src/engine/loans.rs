use bigdecimal::{BigDecimal, Zero};
use tracing::{info, instrument};

use super::{clamp_zero, ensure_positive, now, PaymentService};
use crate::database::models::{Loan, LoanStatus};
use crate::database::LedgerStore;
use crate::error::{Error, Result};

impl<S: LedgerStore> PaymentService<S> {
    /// Records a repayment settled outside the wallet. The user's global
    /// balance is untouched; the merchant-funded balance shrinks with the debt.
    #[instrument(skip(self))]
    pub async fn repay_loan(&self, loan_id: i64, amount: BigDecimal) -> Result<Loan> {
        ensure_positive(&amount)?;
        let loan = self
            .ledger(move |ledger| {
                let mut loan = ledger
                    .loan_for_update(loan_id)?
                    .ok_or_else(|| Error::not_found("loan", loan_id))?;
                if loan.status == LoanStatus::Completed {
                    return Err(Error::Validation(format!("loan {loan_id} is already repaid")));
                }
                if amount > loan.remaining_amount {
                    return Err(Error::Validation(format!(
                        "repayment {amount} exceeds the {} still owed",
                        loan.remaining_amount
                    )));
                }

                loan.paid_amount += &amount;
                loan.remaining_amount -= &amount;
                loan.status = if loan.remaining_amount.is_zero() {
                    LoanStatus::Completed
                } else {
                    LoanStatus::PartiallyPaid
                };
                loan.updated_at = now();
                ledger.update_loan(&loan)?;

                if let Some(mut row) = ledger.merchant_user_balance_for_update(loan.user_id, loan.merchant_id)? {
                    row.balance = clamp_zero(&row.balance - &amount);
                    row.updated_at = loan.updated_at;
                    ledger.update_merchant_user_balance(&row)?;
                }
                Ok(loan)
            })
            .await?;
        info!(
            loan_id = loan.id,
            status = %loan.status,
            remaining = %loan.remaining_amount,
            "loan repayment recorded"
        );
        Ok(loan)
    }
}
