use bigdecimal::{BigDecimal, Signed};
use tracing::{error, info, instrument, warn};

use super::{
    apply_fees, draft, ensure_positive, is_flexible, now, require_active, require_category, PaymentService, TransactionView,
};
use crate::database::models::{Merchant, PlatformSettings, Transaction, TxKind, TxStatus, UserStatus};
use crate::database::{Ledger, LedgerStore};
use crate::error::{Error, Result};
use crate::fees;
use crate::gateway::{InitiateRequest, Transfer};
use crate::idgen::TxPrefix;
use crate::phone;

#[derive(Debug, Clone, PartialEq)]
pub enum Payer {
    /// An enrolled user, paying from their registered phone.
    User(i64),
    /// A guest identified only by a mobile-money phone number.
    Phone(String),
}

#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub merchant_id: i64,
    pub category_id: i64,
    pub amount: BigDecimal,
    pub payer: Payer,
}

/// A transaction ready to be recorded and the instruction that funds it.
pub(crate) struct Prepared {
    pub tx: Transaction,
    pub request: InitiateRequest,
}

impl<S: LedgerStore> PaymentService<S> {
    /// Starts a mobile-money payment. Balances are untouched until the
    /// gateway confirms it.
    #[instrument(skip(self, payment), fields(merchant_id = payment.merchant_id))]
    pub async fn pay_via_gateway(&self, payment: GatewayPayment) -> Result<TransactionView> {
        ensure_positive(&payment.amount)?;
        let prepared = self.ledger(move |ledger| prepare(ledger, &payment)).await?;
        let tx = self.initiate_and_record(prepared).await?;
        Ok(TransactionView::new(tx, None))
    }

    /// Records the transaction as PENDING, sends the instruction, then
    /// attaches the gateway id when accepted or marks it FAILED with the
    /// provider's message otherwise.
    pub(crate) async fn initiate_and_record(&self, prepared: Prepared) -> Result<Transaction> {
        let Prepared { mut tx, request } = prepared;
        let record = tx.clone();
        self.ledger(move |ledger| ledger.insert_transaction(&record)).await?;

        let failure = match self.gateway.initiate(&request).await {
            Ok(initiated) => match initiated.accepted_id() {
                Some(gateway_tx_id) => {
                    tx.gateway_tx_id = Some(gateway_tx_id.to_string());
                    tx.message = initiated.status_desc.clone();
                    None
                }
                None => {
                    let detail = initiated
                        .status_desc
                        .clone()
                        .unwrap_or_else(|| format!("gateway answered with status {}", initiated.http_status));
                    tx.message = Some(detail.clone());
                    Some(Error::GatewayRejected {
                        status: initiated.http_status,
                        detail,
                    })
                }
            },
            Err(err) => {
                tx.message = Some(err.provider_message().to_string());
                Some(Error::from(err))
            }
        };
        if failure.is_some() {
            tx.status = TxStatus::Failed;
        }
        tx.updated_at = now();

        let record = tx.clone();
        let id = tx.id.clone();
        if let Err(err) = self.ledger(move |ledger| ledger.update_transaction(&id, &record)).await {
            error!(
                transaction_id = tx.id.as_str(),
                gateway_tx_id = tx.gateway_tx_id.as_deref(),
                status = %tx.status,
                error = %err,
                "failed to record gateway initiation outcome"
            );
            return Err(err);
        }

        match failure {
            None => {
                info!(
                    transaction_id = tx.id.as_str(),
                    gateway_tx_id = tx.gateway_tx_id.as_deref(),
                    amount = %tx.amount,
                    "gateway transfer initiated"
                );
                Ok(tx)
            }
            Some(err) => {
                warn!(transaction_id = tx.id.as_str(), error = %err, "gateway transfer failed to initiate");
                Err(err)
            }
        }
    }
}

/// The account that receives a gateway payment: a flexible merchant's own
/// mobile-money account, otherwise the platform's.
pub(crate) fn receiving_phone(
    ledger: &mut dyn Ledger,
    merchant: Option<&Merchant>,
    settings: &PlatformSettings,
) -> Result<String> {
    if let Some(merchant) = merchant {
        if is_flexible(ledger, merchant)? {
            let own = merchant.momo_phone.as_deref().ok_or_else(|| {
                Error::Configuration(format!("flexible merchant {} has no mobile-money account", merchant.id))
            })?;
            return phone::normalize(own);
        }
    }
    let platform = settings
        .platform_phone
        .as_deref()
        .ok_or_else(|| Error::Configuration("platform mobile-money account is not configured".to_string()))?;
    phone::normalize(platform)
}

fn prepare(ledger: &mut dyn Ledger, payment: &GatewayPayment) -> Result<Prepared> {
    let amount = &payment.amount;
    let merchant = require_active(ledger.merchant(payment.merchant_id)?, payment.merchant_id)?;
    require_category(ledger, payment.category_id)?;
    let fees = fees::split(
        amount,
        &merchant.discount_percentage,
        &merchant.user_bonus_percentage,
        &merchant.commission_percentage,
    )?;
    let settings = ledger.settings()?;

    let (user_id, payer_phone) = match &payment.payer {
        Payer::User(user_id) => {
            let user = ledger
                .user_for_update(*user_id)?
                .ok_or_else(|| Error::not_found("user", user_id))?;
            if user.status != UserStatus::Active {
                return Err(Error::UserInactive);
            }
            (Some(user.id), phone::normalize(&user.phone)?)
        }
        Payer::Phone(raw) => (None, phone::normalize(raw)?),
    };
    let receiver = receiving_phone(ledger, Some(&merchant), &settings)?;

    let message = format!("Payment to {}", merchant.name);
    let mut transfers = vec![Transfer {
        amount: fees.net_to_receiver(amount),
        phone: receiver,
        message: message.clone(),
    }];
    if fees.user_bonus.is_positive() {
        transfers.push(Transfer {
            amount: fees.user_bonus.clone(),
            phone: payer_phone.clone(),
            message: "Bonus".to_string(),
        });
    }
    if let (true, Some(commission_phone)) = (fees.commission.is_positive(), settings.commission_phone.as_deref()) {
        transfers.push(Transfer {
            amount: fees.commission.clone(),
            phone: phone::normalize(commission_phone)?,
            message: "Commission".to_string(),
        });
    }

    let mut tx = draft(TxPrefix::Payment, TxKind::Payment, amount);
    tx.user_id = user_id;
    tx.merchant_id = Some(merchant.id);
    tx.category_id = Some(payment.category_id);
    tx.payer_phone = Some(payer_phone.clone());
    apply_fees(&mut tx, &fees);

    Ok(Prepared {
        tx,
        request: InitiateRequest {
            amount: amount.clone(),
            currency: settings.currency,
            payer_phone,
            transfers,
            message,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::database::memory::MemoryStore;
    use crate::engine::fixtures::*;
    use crate::gateway::fake::FakeGateway;
    use crate::gateway::{GatewayError, Initiated};
    use crate::notify::recording::RecordingNotifier;

    const MERCHANT: i64 = 10;

    fn guest(amount: &str) -> GatewayPayment {
        GatewayPayment {
            merchant_id: MERCHANT,
            category_id: CATEGORY,
            amount: dec(amount),
            payer: Payer::Phone("0788123456".to_string()),
        }
    }

    #[actix_web::test]
    async fn accepted_payment_is_pending_and_touches_no_balance() {
        let h = Harness::new();
        let mut m = merchant(MERCHANT, "2000");
        m.commission_percentage = dec("1");
        h.add_merchant(m);

        let view = h.service.pay_via_gateway(guest("1000")).await.unwrap();
        let tx = view.transaction;
        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(tx.gateway_tx_id.as_deref(), Some("gw-1"));
        assert_eq!(tx.payer_phone.as_deref(), Some("250788123456"));
        assert_eq!(tx.user_id, None);
        assert_eq!(h.transaction(&tx.id), tx);

        let m = h.merchant(MERCHANT);
        assert_eq!(m.remaining_balance, dec("2000"));
        assert_eq!(m.wallet_balance, dec("0"));
        assert!(h.notifier.ids().is_empty());

        let sent = h.gateway.initiated.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        assert_eq!(request.payer_phone, "250788123456");
        assert_eq!(request.currency, "RWF");
        let legs: Vec<(String, BigDecimal)> = request
            .transfers
            .iter()
            .map(|t| (t.phone.clone(), t.amount.clone()))
            .collect();
        assert_eq!(
            legs,
            vec![
                (PLATFORM_PHONE.to_string(), dec("970")),
                ("250788123456".to_string(), dec("20")),
                (COMMISSION_PHONE.to_string(), dec("10")),
            ]
        );
    }

    #[actix_web::test]
    async fn flexible_merchant_receives_on_its_own_account() {
        let h = Harness::new();
        let mut m = merchant(MERCHANT, "0");
        m.is_flexible = true;
        m.user_bonus_percentage = dec("0");
        h.add_merchant(m);

        h.service.pay_via_gateway(guest("500")).await.unwrap();
        let sent = h.gateway.initiated.lock().unwrap().clone();
        assert_eq!(sent[0].transfers.len(), 1);
        assert_eq!(sent[0].transfers[0].phone, "250788999999");
        assert_eq!(sent[0].transfers[0].amount, dec("500"));
    }

    #[actix_web::test]
    async fn rejected_initiation_is_recorded_as_failed() {
        let gateway = FakeGateway::accepting("gw-1");
        gateway.initiate_returns(Err(GatewayError::Rejected {
            status: 400,
            body: "{\"message\":\"payer not registered\"}".to_string(),
        }));
        let h = Harness::with(gateway, RecordingNotifier::default());
        h.add_merchant(merchant(MERCHANT, "2000"));

        let err = h.service.pay_via_gateway(guest("1000")).await.unwrap_err();
        assert!(matches!(err, Error::GatewayRejected { status: 400, .. }));

        let recorded = only_transaction(&h);
        assert_eq!(recorded.status, TxStatus::Failed);
        assert_eq!(recorded.message.as_deref(), Some("{\"message\":\"payer not registered\"}"));
    }

    #[actix_web::test]
    async fn unaccepted_answer_is_a_failure() {
        let gateway = FakeGateway::accepting("gw-1");
        gateway.initiate_returns(Ok(Initiated {
            http_status: 200,
            gateway_tx_id: None,
            status_desc: Some("Duplicate request".to_string()),
        }));
        let h = Harness::with(gateway, RecordingNotifier::default());
        h.add_merchant(merchant(MERCHANT, "2000"));

        let err = h.service.pay_via_gateway(guest("1000")).await.unwrap_err();
        assert!(matches!(err, Error::GatewayRejected { status: 200, ref detail } if detail == "Duplicate request"));
        assert_eq!(only_transaction(&h).status, TxStatus::Failed);
    }

    #[actix_web::test]
    async fn timeout_fails_the_initiation() {
        let gateway = FakeGateway::accepting("gw-1");
        gateway.initiate_returns(Err(GatewayError::Unavailable("gateway timed out".to_string())));
        let h = Harness::with(gateway, RecordingNotifier::default());
        h.add_merchant(merchant(MERCHANT, "2000"));

        let err = h.service.pay_via_gateway(guest("1000")).await.unwrap_err();
        assert!(matches!(err, Error::GatewayUnavailable(_)));
        let recorded = only_transaction(&h);
        assert_eq!(recorded.status, TxStatus::Failed);
        assert_eq!(recorded.message.as_deref(), Some("gateway timed out"));
    }

    #[actix_web::test]
    async fn malformed_guest_phone_is_rejected_before_initiation() {
        let h = Harness::new();
        h.add_merchant(merchant(MERCHANT, "2000"));
        let mut payment = guest("1000");
        payment.payer = Payer::Phone("12345".to_string());

        assert!(matches!(
            h.service.pay_via_gateway(payment).await,
            Err(Error::InvalidPhoneFormat(_))
        ));
        assert!(h.gateway.initiated.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn missing_platform_account_is_a_configuration_error() {
        let h = Harness::new();
        h.store().replace_settings(PlatformSettings::default()).unwrap();
        h.add_merchant(merchant(MERCHANT, "2000"));

        assert!(matches!(
            h.service.pay_via_gateway(guest("1000")).await,
            Err(Error::Configuration(_))
        ));
    }

    /// Commits the first `healthy` units of work and fails every later one.
    struct FlakyStore {
        inner: MemoryStore,
        healthy: AtomicUsize,
    }

    impl LedgerStore for FlakyStore {
        fn atomically<T, F>(&self, work: F) -> Result<T>
        where
            F: FnOnce(&mut dyn Ledger) -> Result<T>,
        {
            let left = self.healthy.load(Ordering::SeqCst);
            if left == 0 {
                return Err(Error::Internal("storage unavailable".to_string()));
            }
            self.healthy.store(left - 1, Ordering::SeqCst);
            self.inner.atomically(work)
        }
    }

    fn flaky(healthy: usize) -> (PaymentService<FlakyStore>, Arc<FlakyStore>, Arc<FakeGateway>) {
        let inner = seeded_store();
        inner.insert_merchant(merchant(MERCHANT, "2000")).unwrap();
        let store = Arc::new(FlakyStore {
            inner,
            healthy: AtomicUsize::new(healthy),
        });
        let gateway = Arc::new(FakeGateway::accepting("gw-1"));
        let service = PaymentService::new(store.clone(), gateway.clone(), Arc::new(RecordingNotifier::default()));
        (service, store, gateway)
    }

    #[actix_web::test]
    async fn pending_row_exists_before_the_gateway_is_called() {
        // preparation commits, recording the draft does not
        let (service, store, gateway) = flaky(1);

        assert!(matches!(service.pay_via_gateway(guest("1000")).await, Err(Error::Internal(_))));
        assert!(gateway.initiated.lock().unwrap().is_empty());
        assert!(store.inner.transactions().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn unrecorded_outcome_leaves_the_pending_draft() {
        // preparation and the draft commit, the outcome does not
        let (service, store, gateway) = flaky(2);

        assert!(matches!(service.pay_via_gateway(guest("1000")).await, Err(Error::Internal(_))));
        assert_eq!(gateway.initiated.lock().unwrap().len(), 1);

        let recorded = store.inner.transactions().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].status, TxStatus::Pending);
        assert_eq!(recorded[0].gateway_tx_id, None);
        assert_eq!(recorded[0].amount, dec("1000"));
    }

    fn only_transaction(h: &Harness) -> Transaction {
        let mut recorded = h.store().transactions().unwrap();
        assert_eq!(recorded.len(), 1);
        recorded.remove(0)
    }
}
