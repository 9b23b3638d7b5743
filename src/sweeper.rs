//! Stale-Pending Sweeper.
//!
//! Periodically asks the gateway, in bulk, about PENDING transactions that
//! have waited too long, and settles the ones it reports successful. Silence
//! or failure at the gateway is never taken as a failed payment: the sweeper
//! only speeds up success detection.

use std::collections::HashSet;
use std::time::Duration;

use actix_web::rt;
use tracing::{error, info, warn};

use crate::config::SweeperConfig;
use crate::database::{LedgerStore, StaleCursor};
use crate::engine::reconcile::TxLookup;
use crate::engine::PaymentService;
use crate::gateway::GatewayStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub settled: usize,
}

/// One sweep over every stale row, `batch_size` rows per bulk request.
/// Every failure is logged and swallowed.
pub async fn sweep_stale<S: LedgerStore>(service: &PaymentService<S>, config: &SweeperConfig) -> SweepReport {
    let mut report = SweepReport::default();
    let cutoff = chrono::Utc::now().naive_utc() - chrono::Duration::seconds(i64::from(config.stale_after_secs));
    let batch_size = config.batch_size;
    let mut cursor: Option<StaleCursor> = None;

    loop {
        let after = cursor.clone();
        let stale = match service
            .ledger(move |ledger| ledger.stale_pending(cutoff, after.as_ref(), batch_size))
            .await
        {
            Ok(stale) => stale,
            Err(err) => {
                error!(error = %err, "failed to load stale pending transactions");
                return report;
            }
        };
        let Some(last) = stale.last() else {
            return report;
        };
        cursor = Some(StaleCursor::of(last));
        let exhausted = i64::try_from(stale.len()).map_or(true, |n| n < batch_size);

        let requested: Vec<String> = stale.into_iter().filter_map(|tx| tx.gateway_tx_id).collect();
        report.examined += requested.len();
        report.settled += settle_chunk(service, requested).await;

        if exhausted {
            return report;
        }
    }
}

async fn settle_chunk<S: LedgerStore>(service: &PaymentService<S>, requested: Vec<String>) -> usize {
    if requested.is_empty() {
        return 0;
    }
    let items = match service.gateway.bulk_status(&requested).await {
        Ok(items) => items,
        Err(err) => {
            warn!(error = %err, count = requested.len(), "bulk status check failed");
            return 0;
        }
    };

    let requested: HashSet<String> = requested.into_iter().collect();
    let mut settled = 0;
    for item in items {
        if item.status != GatewayStatus::Success || !requested.contains(&item.external_id) {
            continue;
        }
        match service
            .resolve(TxLookup::Gateway(item.external_id.clone()), GatewayStatus::Success)
            .await
        {
            Ok(resolution) if resolution.transitioned => settled += 1,
            Ok(_) => {}
            Err(err) => error!(
                gateway_tx_id = item.external_id.as_str(),
                error = %err,
                "failed to settle stale transaction"
            ),
        }
    }
    settled
}

/// Runs [`sweep_stale`] on the current actix runtime every interval.
pub fn spawn<S: LedgerStore>(service: PaymentService<S>, config: SweeperConfig) {
    rt::spawn(async move {
        let mut interval = rt::time::interval(Duration::from_secs(u64::from(config.interval_secs)));
        loop {
            interval.tick().await;
            let report = sweep_stale(&service, &config).await;
            info!(examined = report.examined, settled = report.settled, "stale pending sweep finished");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Transaction, TxKind, TxStatus};
    use crate::engine::fixtures::*;
    use crate::gateway::GatewayError;

    const MERCHANT: i64 = 10;

    fn config() -> SweeperConfig {
        SweeperConfig {
            enabled: true,
            interval_secs: 60,
            stale_after_secs: 300,
            batch_size: 100,
        }
    }

    fn pending(h: &Harness, gateway_tx_id: &str, age_secs: i64) -> Transaction {
        let mut tx = crate::engine::draft(crate::idgen::TxPrefix::Payment, TxKind::Payment, &dec("100"));
        tx.merchant_id = Some(MERCHANT);
        tx.gateway_tx_id = Some(gateway_tx_id.to_string());
        tx.created_at -= chrono::Duration::seconds(age_secs);
        let record = tx.clone();
        h.store().atomically(move |l| l.insert_transaction(&record)).unwrap();
        tx
    }

    fn setup() -> Harness {
        let h = Harness::new();
        h.add_merchant(merchant(MERCHANT, "1000"));
        h
    }

    #[actix_web::test]
    async fn settles_only_reported_successes() {
        let h = setup();
        let paid = pending(&h, "gw-paid", 600);
        let failed = pending(&h, "gw-failed", 600);
        let silent = pending(&h, "gw-silent", 600);
        let fresh = pending(&h, "gw-fresh", 10);
        h.gateway.status_of("gw-paid", Ok(GatewayStatus::Success));
        h.gateway.status_of("gw-failed", Ok(GatewayStatus::Failed(None)));
        h.gateway.status_of("gw-fresh", Ok(GatewayStatus::Success));

        let report = sweep_stale(&h.service, &config()).await;
        assert_eq!(report, SweepReport { examined: 3, settled: 1 });

        assert_eq!(h.transaction(&paid.id).status, TxStatus::Success);
        assert_eq!(h.transaction(&failed.id).status, TxStatus::Pending);
        assert_eq!(h.transaction(&silent.id).status, TxStatus::Pending);
        assert_eq!(h.transaction(&fresh.id).status, TxStatus::Pending);
        assert_eq!(h.merchant(MERCHANT).wallet_balance, dec("100"));
        assert_eq!(h.notifier.ids(), vec![paid.id]);

        let calls = h.gateway.bulk_calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].contains(&"gw-fresh".to_string()));

        // a second sweep finds nothing new to settle
        let report = sweep_stale(&h.service, &config()).await;
        assert_eq!(report.settled, 0);
        assert_eq!(h.merchant(MERCHANT).wallet_balance, dec("100"));
    }

    #[actix_web::test]
    async fn backlog_larger_than_a_batch_is_walked_in_chunks() {
        let h = setup();
        pending(&h, "gw-silent-1", 900);
        pending(&h, "gw-silent-2", 800);
        let paid = pending(&h, "gw-paid", 600);
        h.gateway.status_of("gw-paid", Ok(GatewayStatus::Success));
        let config = SweeperConfig {
            batch_size: 2,
            ..config()
        };

        let report = sweep_stale(&h.service, &config).await;
        assert_eq!(report, SweepReport { examined: 3, settled: 1 });
        assert_eq!(h.transaction(&paid.id).status, TxStatus::Success);

        let calls = h.gateway.bulk_calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                vec!["gw-silent-1".to_string(), "gw-silent-2".to_string()],
                vec!["gw-paid".to_string()],
            ]
        );
    }

    #[actix_web::test]
    async fn failed_chunk_does_not_stop_the_sweep() {
        let h = setup();
        pending(&h, "gw-silent-1", 900);
        let paid = pending(&h, "gw-paid", 600);
        h.gateway.status_of("gw-paid", Ok(GatewayStatus::Success));
        h.gateway.fail_bulk_once(GatewayError::Unavailable("timed out".to_string()));
        let config = SweeperConfig {
            batch_size: 1,
            ..config()
        };

        let report = sweep_stale(&h.service, &config).await;
        assert_eq!(report, SweepReport { examined: 2, settled: 1 });
        assert_eq!(h.transaction(&paid.id).status, TxStatus::Success);
    }

    #[actix_web::test]
    async fn bulk_failure_is_swallowed() {
        let h = setup();
        let tx = pending(&h, "gw-1", 600);
        h.gateway.fail_bulk(GatewayError::Unavailable("timed out".to_string()));

        let report = sweep_stale(&h.service, &config()).await;
        assert_eq!(report, SweepReport { examined: 1, settled: 0 });
        assert_eq!(h.transaction(&tx.id).status, TxStatus::Pending);
    }

    #[actix_web::test]
    async fn nothing_stale_means_no_gateway_call() {
        let h = setup();
        let report = sweep_stale(&h.service, &config()).await;
        assert_eq!(report, SweepReport::default());
        assert!(h.gateway.bulk_calls.lock().unwrap().is_empty());
    }
}
