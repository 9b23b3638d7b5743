use snowflake::SnowflakeIdGenerator;
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

const SNOWFLAKE_EPOCH: u64 = 1669205840566;

static GENERATOR: once_cell::sync::OnceCell<Mutex<SnowflakeIdGenerator>> = once_cell::sync::OnceCell::new();

fn new() -> Mutex<SnowflakeIdGenerator> {
    let epoch = UNIX_EPOCH + Duration::from_millis(SNOWFLAKE_EPOCH);
    let machine_id = fastrand::i32(0..32);
    let node_id = fastrand::i32(0..32);
    Mutex::new(SnowflakeIdGenerator::with_epoch(machine_id, node_id, epoch))
}

/// Next row id for users, merchants, balances and loans.
pub fn next() -> i64 {
    let generator = GENERATOR.get_or_init(new);
    // a poisoned generator still holds a valid sequence
    let mut generator = generator.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    generator.generate()
}

/// Prefix of a local transaction id, by what the transaction does.
#[derive(Debug, Clone, Copy)]
pub enum TxPrefix {
    Payment,
    TopUp,
}

impl TxPrefix {
    fn as_str(self) -> &'static str {
        match self {
            TxPrefix::Payment => "PAY",
            TxPrefix::TopUp => "TOP",
        }
    }
}

/// Local transaction id: `PAY-20261019134501-<snowflake>`.
///
/// Generated once when the transaction is created and never regenerated.
/// This is the handle clients poll with, not the gateway's id.
pub fn transaction_id(prefix: TxPrefix) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    format!("{}-{}-{}", prefix.as_str(), timestamp, next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_next() {
        for idx in 0..10000 {
            let id = next();
            assert!(
                id > 0,
                "id: {}, idx: {}, gen: {:?}",
                id,
                idx,
                GENERATOR.get().unwrap().lock()
            );
        }
    }

    #[test]
    fn transaction_ids_are_unique_and_traceable() {
        let ids: HashSet<String> = (0..1000).map(|_| transaction_id(TxPrefix::Payment)).collect();
        assert_eq!(ids.len(), 1000);
        let sample = transaction_id(TxPrefix::TopUp);
        let parts: Vec<&str> = sample.splitn(3, '-').collect();
        assert_eq!(parts[0], "TOP");
        assert_eq!(parts[1].len(), 14);
        assert!(parts[2].parse::<i64>().unwrap() > 0);
    }
}
