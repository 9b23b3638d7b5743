//! Fee Calculator: splits a payment amount into discount, user bonus,
//! commission and platform (admin) income.
//!
//! Each component is rounded half-up to cents on its own, before the
//! components are combined. Those are the amounts wired to the external
//! parties, so the local ledger must reproduce them exactly.

use bigdecimal::{BigDecimal, Signed, Zero};
use serde::Serialize;

use crate::error::{Error, Result};

fn cent() -> BigDecimal {
    BigDecimal::new(1.into(), 2)
}

/// Rounds half-up (away from zero) to 2 decimal places.
pub fn round_cents(value: &BigDecimal) -> BigDecimal {
    let truncated = value.with_scale(2);
    let remainder = value - &truncated;
    let half_cent = BigDecimal::new(5.into(), 3);
    if remainder.abs() < half_cent {
        truncated
    } else if value.is_negative() {
        truncated - cent()
    } else {
        truncated + cent()
    }
}

fn percentage_of(amount: &BigDecimal, percentage: &BigDecimal) -> BigDecimal {
    round_cents(&(amount * percentage * cent()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSplit {
    pub discount: BigDecimal,
    pub user_bonus: BigDecimal,
    pub commission: BigDecimal,
    pub admin_income: BigDecimal,
}

impl FeeSplit {
    /// What the receiving party is credited out of `amount`.
    pub fn net_to_receiver(&self, amount: &BigDecimal) -> BigDecimal {
        amount - &self.user_bonus - &self.commission
    }
}

/// Splits `amount` by the merchant-configured percentages.
///
/// Rejects configurations that would pay out more than the discount
/// (negative admin income) or leave the receiver with a negative credit.
pub fn split(
    amount: &BigDecimal,
    discount_pct: &BigDecimal,
    user_bonus_pct: &BigDecimal,
    commission_pct: &BigDecimal,
) -> Result<FeeSplit> {
    let discount = percentage_of(amount, discount_pct);
    let user_bonus = percentage_of(amount, user_bonus_pct);
    let commission = percentage_of(amount, commission_pct);
    let admin_income = &discount - &user_bonus - &commission;

    if admin_income.is_negative() {
        return Err(Error::Configuration(format!(
            "user bonus {user_bonus} and commission {commission} exceed discount {discount}"
        )));
    }
    if user_bonus.is_negative() || commission.is_negative() || discount.is_negative() {
        return Err(Error::Configuration("negative fee percentage".to_string()));
    }

    let fees = FeeSplit {
        discount,
        user_bonus,
        commission,
        admin_income,
    };
    if fees.net_to_receiver(amount) < BigDecimal::zero() {
        return Err(Error::Configuration(format!(
            "net amount credited to the receiver of {amount} would be negative"
        )));
    }
    Ok(fees)
}
