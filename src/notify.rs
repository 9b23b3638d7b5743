use async_trait::async_trait;
use tracing::info;

use crate::database::models::{Transaction, TxKind};

/// Delivers user- and merchant-facing messages about completed transactions.
///
/// Called after the ledger change is committed. Errors are logged by the
/// caller and never undo the transaction.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn transaction_completed(&self, tx: &Transaction) -> anyhow::Result<()>;
}

/// Writes the messages to the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn transaction_completed(&self, tx: &Transaction) -> anyhow::Result<()> {
        let (user_message, merchant_message) = messages(tx);
        info!(
            transaction_id = tx.id.as_str(),
            user_id = ?tx.user_id,
            merchant_id = ?tx.merchant_id,
            user_message = user_message.as_str(),
            merchant_message = merchant_message.as_str(),
            "transaction notification"
        );
        Ok(())
    }
}

fn messages(tx: &Transaction) -> (String, String) {
    match tx.kind {
        TxKind::Payment => {
            let user = match &tx.balance_after {
                Some(balance) => format!(
                    "You paid {} (ref {}). Bonus {}. New balance {}.",
                    tx.amount, tx.id, tx.user_bonus_amount, balance
                ),
                None => format!("You paid {} (ref {}).", tx.amount, tx.id),
            };
            let merchant = format!("Payment of {} received (ref {}).", tx.amount, tx.id);
            (user, merchant)
        }
        TxKind::TopUp => {
            let user = format!("Your wallet was topped up with {} (ref {}).", tx.amount, tx.id);
            let merchant = format!("Top-up of {} completed (ref {}).", tx.amount, tx.id);
            (user, merchant)
        }
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::Mutex;

    /// Keeps the ids it was notified about; optionally fails every call.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub fail: bool,
        pub notified: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn ids(&self) -> Vec<String> {
            self.notified.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn transaction_completed(&self, tx: &Transaction) -> anyhow::Result<()> {
            self.notified.lock().unwrap().push(tx.id.clone());
            if self.fail {
                anyhow::bail!("sms provider down");
            }
            Ok(())
        }
    }
}
