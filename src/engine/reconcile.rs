//! Reconciliation: resolving PENDING transactions against the gateway.
//!
//! The gateway is always queried before the unit of work opens. Inside the
//! unit the transaction row is locked and its status re-read, so of any number
//! of concurrent resolutions only the first to see PENDING applies the ledger
//! effect. Every later one finds a terminal row and changes nothing.

use tracing::{error, info, instrument, warn};

use super::topup::credit_top_up;
use super::{credit_merchant, now, PaymentService, TransactionView};
use crate::database::models::{Transaction, TxKind, TxStatus};
use crate::database::{Ledger, LedgerStore};
use crate::error::{Error, Result};
use crate::gateway::GatewayStatus;

/// How to find the transaction being resolved.
#[derive(Debug, Clone)]
pub(crate) enum TxLookup {
    Local(String),
    Gateway(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Resolution {
    pub transaction: Transaction,
    /// Whether this call moved the transaction out of PENDING.
    pub transitioned: bool,
}

impl<S: LedgerStore> PaymentService<S> {
    /// Current state of a transaction, resolving it first when it is still
    /// pending at the gateway.
    ///
    /// Settled transactions are returned without asking the gateway. A gateway
    /// error leaves the transaction pending; it is not reported to the caller.
    #[instrument(skip(self))]
    pub async fn check_status(&self, transaction_id: &str) -> Result<TransactionView> {
        let id = transaction_id.to_string();
        let view = self.ledger(move |ledger| load_view(ledger, &id)).await?;
        if view.transaction.status.is_terminal() {
            return Ok(view);
        }
        let Some(gateway_tx_id) = view.transaction.gateway_tx_id.clone() else {
            return Ok(view);
        };

        let status = match self.gateway.check_status(&gateway_tx_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    transaction_id,
                    gateway_tx_id = gateway_tx_id.as_str(),
                    error = %err,
                    "status check failed, transaction stays pending"
                );
                return Ok(view);
            }
        };
        let resolution = self
            .resolve(TxLookup::Local(view.transaction.id.clone()), status)
            .await?;
        Ok(TransactionView::new(resolution.transaction, view.loan))
    }

    /// Handles the gateway's asynchronous notification. The payload only
    /// identifies the transaction; its outcome is re-queried.
    #[instrument(skip(self))]
    pub async fn gateway_callback(&self, gateway_tx_id: &str) -> Result<TransactionView> {
        let gateway_id = gateway_tx_id.to_string();
        let tx = self
            .ledger(move |ledger| {
                ledger
                    .transaction_by_gateway_id_for_update(&gateway_id)?
                    .ok_or_else(|| Error::not_found("gateway transaction", &gateway_id))
            })
            .await?;
        self.check_status(&tx.id).await
    }

    pub(crate) async fn resolve(&self, lookup: TxLookup, status: GatewayStatus) -> Result<Resolution> {
        let resolution = self
            .ledger(move |ledger| resolve_locked(ledger, &lookup, &status))
            .await?;
        if resolution.transitioned {
            let tx = &resolution.transaction;
            info!(transaction_id = tx.id.as_str(), status = %tx.status, "transaction resolved");
            if tx.status == TxStatus::Success {
                self.notify(tx).await;
            }
        }
        Ok(resolution)
    }
}

fn load_view(ledger: &mut dyn Ledger, id: &str) -> Result<TransactionView> {
    let tx = ledger
        .transaction(id)?
        .ok_or_else(|| Error::not_found("transaction", id))?;
    let loan = ledger.loan_by_transaction(&tx.id)?;
    Ok(TransactionView::new(tx, loan))
}

/// Applies a gateway outcome to a transaction under its row lock.
pub(crate) fn resolve_locked(ledger: &mut dyn Ledger, lookup: &TxLookup, status: &GatewayStatus) -> Result<Resolution> {
    let found = match lookup {
        TxLookup::Local(id) => ledger.transaction_for_update(id)?,
        TxLookup::Gateway(gateway_tx_id) => ledger.transaction_by_gateway_id_for_update(gateway_tx_id)?,
    };
    let mut tx = found.ok_or_else(|| match lookup {
        TxLookup::Local(id) => Error::not_found("transaction", id),
        TxLookup::Gateway(gateway_tx_id) => Error::not_found("gateway transaction", gateway_tx_id),
    })?;
    let original_id = tx.id.clone();

    if tx.status != TxStatus::Pending {
        return Ok(Resolution {
            transaction: tx,
            transitioned: false,
        });
    }
    match status {
        GatewayStatus::Pending => {
            return Ok(Resolution {
                transaction: tx,
                transitioned: false,
            })
        }
        GatewayStatus::Success => {
            apply_success(ledger, &mut tx)?;
            tx.status = TxStatus::Success;
        }
        GatewayStatus::Failed(description) => {
            tx.status = TxStatus::Failed;
            if let Some(description) = description {
                tx.message = Some(description.clone());
            }
        }
    }
    tx.updated_at = now();

    restore_id(&mut tx, &original_id);
    ledger.update_transaction(&original_id, &tx)?;
    Ok(Resolution {
        transaction: tx,
        transitioned: true,
    })
}

fn apply_success(ledger: &mut dyn Ledger, tx: &mut Transaction) -> Result<()> {
    match tx.kind {
        TxKind::TopUp => {
            let user_id = tx
                .user_id
                .ok_or_else(|| Error::Internal(format!("top-up {} has no user", tx.id)))?;
            let mut user = ledger
                .user_for_update(user_id)?
                .ok_or_else(|| Error::not_found("user", user_id))?;
            let (before, after) = credit_top_up(ledger, &mut user, tx.merchant_id, &tx.amount)?;
            tx.balance_before = Some(before);
            tx.balance_after = Some(after);
        }
        TxKind::Payment => {
            let merchant_id = tx
                .merchant_id
                .ok_or_else(|| Error::Internal(format!("payment {} has no merchant", tx.id)))?;
            // guest payments have no wallet to credit the bonus to
            if let Some(user_id) = tx.user_id {
                let mut user = ledger
                    .user_for_update(user_id)?
                    .ok_or_else(|| Error::not_found("user", user_id))?;
                tx.balance_before = Some(user.global_balance.clone());
                user.global_balance += &tx.user_bonus_amount;
                ledger.update_user_balances(&user)?;
                tx.balance_after = Some(user.global_balance);
            }
            let mut merchant = ledger
                .merchant_for_update(merchant_id)?
                .ok_or_else(|| Error::not_found("merchant", merchant_id))?;
            let (before, after) = credit_merchant(ledger, &mut merchant, &tx.amount)?;
            tx.merchant_balance_before = Some(before);
            tx.merchant_balance_after = Some(after);
        }
    }
    Ok(())
}

/// The local id is the caller's handle and must survive every transition.
fn restore_id(tx: &mut Transaction, original_id: &str) {
    if tx.id != original_id {
        error!(
            transaction_id = original_id,
            overwritten_with = tx.id.as_str(),
            "transaction id changed during resolution, restoring"
        );
        tx.id = original_id.to_string();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::database::memory::MemoryStore;
    use crate::database::models::TopUpType;
    use crate::engine::fixtures::*;
    use crate::engine::{Account, GatewayPayment, Payer, TopUp};
    use crate::gateway::GatewayError;

    const USER: i64 = 1;
    const MERCHANT: i64 = 10;

    async fn pending_payment(h: &Harness) -> Transaction {
        h.service
            .pay_via_gateway(GatewayPayment {
                merchant_id: MERCHANT,
                category_id: CATEGORY,
                amount: dec("1000"),
                payer: Payer::User(USER),
            })
            .await
            .unwrap()
            .transaction
    }

    fn setup() -> Harness {
        let h = Harness::new();
        h.add_user(USER, "250788123456", "100");
        h.add_merchant(merchant(MERCHANT, "2000"));
        h
    }

    #[actix_web::test]
    async fn repeated_polls_credit_exactly_once() {
        let h = setup();
        let tx = pending_payment(&h).await;
        h.gateway.status_of("gw-1", Ok(GatewayStatus::Success));

        for _ in 0..5 {
            let view = h.service.check_status(&tx.id).await.unwrap();
            assert_eq!(view.transaction.id, tx.id);
            assert_eq!(view.transaction.status, TxStatus::Success);
        }

        // bonus 2% of 1000 back to the payer, merchant credited once
        assert_eq!(h.user(USER).global_balance, dec("120"));
        let m = h.merchant(MERCHANT);
        assert_eq!(m.remaining_balance, dec("1000"));
        assert_eq!(m.wallet_balance, dec("1000"));
        assert_eq!(m.total_received, dec("1000"));
        assert_eq!(h.notifier.ids(), vec![tx.id.clone()]);
        // only the first poll reached the gateway
        assert_eq!(h.gateway.status_calls(), 1);

        let settled = h.transaction(&tx.id);
        assert_eq!(settled.gateway_tx_id.as_deref(), Some("gw-1"));
        assert_eq!(settled.merchant_balance_before, Some(dec("2000")));
        assert_eq!(settled.merchant_balance_after, Some(dec("1000")));
    }

    #[actix_web::test]
    async fn gateway_error_reads_as_still_pending() {
        let h = setup();
        let tx = pending_payment(&h).await;
        h.gateway
            .status_of("gw-1", Err(GatewayError::Unavailable("timed out".to_string())));

        let view = h.service.check_status(&tx.id).await.unwrap();
        assert_eq!(view.transaction.status, TxStatus::Pending);
        assert_eq!(h.merchant(MERCHANT).wallet_balance, dec("0"));
    }

    #[actix_web::test]
    async fn pending_at_the_gateway_changes_nothing() {
        let h = setup();
        let tx = pending_payment(&h).await;

        let view = h.service.check_status(&tx.id).await.unwrap();
        assert_eq!(view.transaction.status, TxStatus::Pending);
        assert_eq!(view.transaction, tx);
    }

    #[actix_web::test]
    async fn failure_is_terminal_and_moves_no_money() {
        let h = setup();
        let tx = pending_payment(&h).await;
        h.gateway.status_of(
            "gw-1",
            Ok(GatewayStatus::Failed(Some("payer declined".to_string()))),
        );

        let view = h.service.check_status(&tx.id).await.unwrap();
        assert_eq!(view.transaction.status, TxStatus::Failed);
        assert_eq!(view.transaction.message.as_deref(), Some("payer declined"));

        h.gateway.status_of("gw-1", Ok(GatewayStatus::Success));
        let view = h.service.check_status(&tx.id).await.unwrap();
        assert_eq!(view.transaction.status, TxStatus::Failed);
        assert_eq!(h.user(USER).global_balance, dec("100"));
        assert_eq!(h.merchant(MERCHANT).wallet_balance, dec("0"));
        assert!(h.notifier.ids().is_empty());
    }

    #[actix_web::test]
    async fn unknown_transaction_is_not_found() {
        let h = setup();
        assert!(matches!(h.service.check_status("PAY-nope").await, Err(Error::NotFound(_))));
    }

    #[actix_web::test]
    async fn callback_reconciles_by_gateway_id() {
        let h = setup();
        let tx = pending_payment(&h).await;
        h.gateway.status_of("gw-1", Ok(GatewayStatus::Success));

        let view = h.service.gateway_callback("gw-1").await.unwrap();
        assert_eq!(view.transaction.id, tx.id);
        assert_eq!(view.transaction.status, TxStatus::Success);
        assert!(matches!(h.service.gateway_callback("gw-404").await, Err(Error::NotFound(_))));
    }

    #[actix_web::test]
    async fn momo_top_up_is_credited_on_confirmation() {
        let h = setup();
        let view = h
            .service
            .top_up(TopUp {
                account: Account::User(USER),
                merchant_id: Some(MERCHANT),
                amount: dec("500"),
                kind: TopUpType::Momo,
            })
            .await
            .unwrap();
        assert_eq!(view.transaction.status, TxStatus::Pending);
        assert_eq!(h.user(USER).global_balance, dec("100"));

        h.gateway.status_of("gw-1", Ok(GatewayStatus::Success));
        let view = h.service.check_status(&view.transaction.id).await.unwrap();
        assert_eq!(view.transaction.status, TxStatus::Success);
        assert_eq!(view.transaction.balance_after, Some(dec("600")));
        let balance = h.service.balance(USER).await.unwrap();
        assert_eq!(balance.global_balance, dec("600"));
        assert_eq!(balance.merchants[0].balance, dec("500"));
        assert_eq!(balance.merchants[0].total_topped_up, dec("500"));
    }

    #[test]
    fn racing_resolutions_credit_once() {
        let h = setup();
        let system = actix_web::rt::System::new();
        let tx = system.block_on(pending_payment(&h));
        let store: Arc<MemoryStore> = Arc::clone(&h.service.store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let lookup = if i % 2 == 0 {
                    TxLookup::Local(tx.id.clone())
                } else {
                    TxLookup::Gateway("gw-1".to_string())
                };
                std::thread::spawn(move || {
                    store
                        .atomically(|ledger| resolve_locked(ledger, &lookup, &GatewayStatus::Success))
                        .unwrap()
                        .transitioned
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|transitioned| *transitioned)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(h.merchant(MERCHANT).wallet_balance, dec("1000"));
        assert_eq!(h.user(USER).global_balance, dec("120"));
    }

    #[test]
    fn restore_id_puts_the_original_back() {
        let mut tx = crate::engine::draft(crate::idgen::TxPrefix::Payment, TxKind::Payment, &dec("1"));
        let original = tx.id.clone();
        tx.id = "overwritten".to_string();
        restore_id(&mut tx, &original);
        assert_eq!(tx.id, original);
    }
}
