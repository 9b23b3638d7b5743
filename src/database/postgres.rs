use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::{BoolExpressionMethods, Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::connect::PgPool;
use crate::database::models::{
    Category, Loan, LoanStatus, Merchant, MerchantUserBalance, PlatformSettings, Transaction,
    TxStatus, User, SETTINGS_ROW_ID,
};
use crate::database::{zero, Ledger, LedgerStore, StaleCursor};
use crate::error::{Error, Result};
use crate::idgen;
use crate::schema::{
    categories, loans, merchant_user_balances, merchants, platform_settings, transactions, users,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl LedgerStore for PgStore {
    fn atomically<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Ledger) -> Result<T>,
    {
        let mut pooled = self.pool.get()?;
        let conn: &mut PgConnection = &mut pooled;
        // wrap in transaction, any error rolls the whole unit back
        conn.transaction::<_, Error, _>(|conn| {
            let mut ledger = PgLedger { conn };
            work(&mut ledger)
        })
    }
}

pub struct PgLedger<'c> {
    conn: &'c mut PgConnection,
}

impl Ledger for PgLedger<'_> {
    fn settings(&mut self) -> Result<PlatformSettings> {
        // first read creates the default record
        diesel::insert_into(platform_settings::table)
            .values(&PlatformSettings::default())
            .on_conflict(platform_settings::id)
            .do_nothing()
            .execute(self.conn)?;
        Ok(platform_settings::table
            .find(SETTINGS_ROW_ID)
            .first::<PlatformSettings>(self.conn)?)
    }

    fn user_for_update(&mut self, user_id: i64) -> Result<Option<User>> {
        Ok(users::table
            .find(user_id)
            .for_update()
            .first::<User>(self.conn)
            .optional()?)
    }

    fn user_by_phone_for_update(&mut self, phone: &str) -> Result<Option<User>> {
        Ok(users::table
            .filter(users::phone.eq(phone))
            .for_update()
            .first::<User>(self.conn)
            .optional()?)
    }

    fn insert_user(&mut self, user: &User) -> Result<()> {
        diesel::insert_into(users::table).values(user).execute(self.conn)?;
        Ok(())
    }

    fn update_user_balances(&mut self, user: &User) -> Result<()> {
        diesel::update(users::table.find(user.id))
            .set((
                users::global_balance.eq(&user.global_balance),
                users::total_topped_up.eq(&user.total_topped_up),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn merchant(&mut self, merchant_id: i64) -> Result<Option<Merchant>> {
        Ok(merchants::table
            .find(merchant_id)
            .first::<Merchant>(self.conn)
            .optional()?)
    }

    fn merchant_for_update(&mut self, merchant_id: i64) -> Result<Option<Merchant>> {
        Ok(merchants::table
            .find(merchant_id)
            .for_update()
            .first::<Merchant>(self.conn)
            .optional()?)
    }

    fn update_merchant_balances(&mut self, merchant: &Merchant) -> Result<()> {
        diesel::update(merchants::table.find(merchant.id))
            .set((
                merchants::wallet_balance.eq(&merchant.wallet_balance),
                merchants::total_received.eq(&merchant.total_received),
                merchants::remaining_balance.eq(&merchant.remaining_balance),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn category(&mut self, category_id: i64) -> Result<Option<Category>> {
        Ok(categories::table
            .find(category_id)
            .first::<Category>(self.conn)
            .optional()?)
    }

    fn merchant_user_balance_for_update(
        &mut self,
        user_id: i64,
        merchant_id: i64,
    ) -> Result<Option<MerchantUserBalance>> {
        Ok(merchant_user_balances::table
            .filter(merchant_user_balances::user_id.eq(user_id))
            .filter(merchant_user_balances::merchant_id.eq(merchant_id))
            .for_update()
            .first::<MerchantUserBalance>(self.conn)
            .optional()?)
    }

    fn ensure_merchant_user_balance(
        &mut self,
        user_id: i64,
        merchant_id: i64,
    ) -> Result<MerchantUserBalance> {
        // creates the pair's record, on conflict does nothing
        let now = chrono::Utc::now().naive_utc();
        diesel::insert_into(merchant_user_balances::table)
            .values(&MerchantUserBalance {
                id: idgen::next(),
                user_id,
                merchant_id,
                balance: zero(),
                total_topped_up: zero(),
                created_at: now,
                updated_at: now,
            })
            .on_conflict((
                merchant_user_balances::user_id,
                merchant_user_balances::merchant_id,
            ))
            .do_nothing()
            .execute(self.conn)?;
        self.merchant_user_balance_for_update(user_id, merchant_id)?
            .ok_or_else(|| Error::Internal(format!("balance row for user {user_id} and merchant {merchant_id} vanished")))
    }

    fn update_merchant_user_balance(&mut self, balance: &MerchantUserBalance) -> Result<()> {
        diesel::update(merchant_user_balances::table.find(balance.id))
            .set((
                merchant_user_balances::balance.eq(&balance.balance),
                merchant_user_balances::total_topped_up.eq(&balance.total_topped_up),
                merchant_user_balances::updated_at.eq(balance.updated_at),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn merchant_user_balances(&mut self, user_id: i64) -> Result<Vec<MerchantUserBalance>> {
        Ok(merchant_user_balances::table
            .filter(merchant_user_balances::user_id.eq(user_id))
            .order(merchant_user_balances::created_at.asc())
            .load::<MerchantUserBalance>(self.conn)?)
    }

    fn loan_for_update(&mut self, loan_id: i64) -> Result<Option<Loan>> {
        Ok(loans::table
            .find(loan_id)
            .for_update()
            .first::<Loan>(self.conn)
            .optional()?)
    }

    fn loan_by_transaction(&mut self, transaction_id: &str) -> Result<Option<Loan>> {
        Ok(loans::table
            .filter(loans::transaction_id.eq(transaction_id))
            .first::<Loan>(self.conn)
            .optional()?)
    }

    fn outstanding_loans(&mut self, user_id: i64, merchant_id: i64) -> Result<Vec<Loan>> {
        Ok(loans::table
            .filter(loans::user_id.eq(user_id))
            .filter(loans::merchant_id.eq(merchant_id))
            .filter(loans::status.ne(LoanStatus::Completed))
            .filter(loans::remaining_amount.ge(BigDecimal::from(1)))
            .order(loans::created_at.asc())
            .load::<Loan>(self.conn)?)
    }

    fn insert_loan(&mut self, loan: &Loan) -> Result<()> {
        diesel::insert_into(loans::table).values(loan).execute(self.conn)?;
        Ok(())
    }

    fn update_loan(&mut self, loan: &Loan) -> Result<()> {
        diesel::update(loans::table.find(loan.id))
            .set((
                loans::paid_amount.eq(&loan.paid_amount),
                loans::remaining_amount.eq(&loan.remaining_amount),
                loans::status.eq(loan.status),
                loans::updated_at.eq(loan.updated_at),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn transaction(&mut self, id: &str) -> Result<Option<Transaction>> {
        Ok(transactions::table
            .find(id)
            .first::<Transaction>(self.conn)
            .optional()?)
    }

    fn transaction_for_update(&mut self, id: &str) -> Result<Option<Transaction>> {
        Ok(transactions::table
            .find(id)
            .for_update()
            .first::<Transaction>(self.conn)
            .optional()?)
    }

    fn transaction_by_gateway_id_for_update(&mut self, gateway_tx_id: &str) -> Result<Option<Transaction>> {
        Ok(transactions::table
            .filter(transactions::gateway_tx_id.eq(gateway_tx_id))
            .for_update()
            .first::<Transaction>(self.conn)
            .optional()?)
    }

    fn insert_transaction(&mut self, tx: &Transaction) -> Result<()> {
        diesel::insert_into(transactions::table).values(tx).execute(self.conn)?;
        Ok(())
    }

    fn update_transaction(&mut self, id: &str, tx: &Transaction) -> Result<()> {
        diesel::update(transactions::table.find(id))
            .set((
                transactions::status.eq(tx.status),
                transactions::gateway_tx_id.eq(&tx.gateway_tx_id),
                transactions::message.eq(&tx.message),
                transactions::balance_before.eq(&tx.balance_before),
                transactions::balance_after.eq(&tx.balance_after),
                transactions::merchant_balance_before.eq(&tx.merchant_balance_before),
                transactions::merchant_balance_after.eq(&tx.merchant_balance_after),
                transactions::updated_at.eq(tx.updated_at),
            ))
            .execute(self.conn)?;
        Ok(())
    }

    fn stale_pending(
        &mut self,
        created_before: NaiveDateTime,
        after: Option<&StaleCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        let mut query = transactions::table
            .filter(transactions::status.eq(TxStatus::Pending))
            .filter(transactions::created_at.lt(created_before))
            .filter(transactions::gateway_tx_id.is_not_null())
            .into_boxed();
        if let Some(cursor) = after {
            query = query.filter(
                transactions::created_at.gt(cursor.created_at).or(transactions::created_at
                    .eq(cursor.created_at)
                    .and(transactions::id.gt(cursor.id.clone()))),
            );
        }
        Ok(query
            .order((transactions::created_at.asc(), transactions::id.asc()))
            .limit(limit)
            .load::<Transaction>(self.conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connect;
    use crate::database::models::{MerchantStatus, TxKind, UserStatus};
    use std::str::FromStr;

    fn pool() -> PgPool {
        dotenvy::dotenv().ok();
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = connect::create_db_connection_pool(&url).unwrap();
        connect::run_migrations(&pool).unwrap();
        pool
    }

    fn user(phone: &str) -> User {
        User {
            id: idgen::next(),
            phone: phone.to_string(),
            pin_hash: None,
            global_balance: BigDecimal::from(100),
            total_topped_up: zero(),
            status: UserStatus::Active,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    fn merchant() -> Merchant {
        Merchant {
            id: idgen::next(),
            name: "test merchant".to_string(),
            status: MerchantStatus::Active,
            is_flexible: false,
            momo_phone: None,
            wallet_balance: zero(),
            total_received: zero(),
            assigned_balance: BigDecimal::from(500),
            remaining_balance: BigDecimal::from(500),
            discount_percentage: BigDecimal::from(10),
            user_bonus_percentage: BigDecimal::from(2),
            commission_percentage: zero(),
            parent_merchant_id: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[actix_web::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn test_balance_rows() {
        let pool = pool();
        let mut pooled = pool.get().unwrap();
        let conn: &mut PgConnection = &mut pooled;

        conn.test_transaction::<_, Error, _>(|conn| {
            let m = merchant();
            diesel::insert_into(merchants::table).values(&m).execute(conn)?;

            let mut ledger = PgLedger { conn };
            let settings = ledger.settings()?;
            assert_eq!(settings.currency, "RWF");

            let u = user("250788000001");
            ledger.insert_user(&u)?;

            let created = ledger.ensure_merchant_user_balance(u.id, m.id)?;
            let again = ledger.ensure_merchant_user_balance(u.id, m.id)?;
            assert_eq!(created.id, again.id);

            let mut loaded = ledger.user_by_phone_for_update("250788000001")?.unwrap();
            loaded.global_balance = BigDecimal::from_str("42.50").unwrap();
            ledger.update_user_balances(&loaded)?;
            let reloaded = ledger.user_for_update(u.id)?.unwrap();
            assert_eq!(reloaded.global_balance, BigDecimal::from_str("42.50").unwrap());
            Ok(())
        });
    }

    #[actix_web::test]
    #[ignore = "requires a PostgreSQL DATABASE_URL"]
    async fn test_transaction_status_update_keeps_id() {
        let pool = pool();
        let mut pooled = pool.get().unwrap();
        let conn: &mut PgConnection = &mut pooled;

        conn.test_transaction::<_, Error, _>(|conn| {
            let mut ledger = PgLedger { conn };
            let now = chrono::Utc::now().naive_utc();
            let mut tx = Transaction {
                id: idgen::transaction_id(idgen::TxPrefix::Payment),
                kind: TxKind::Payment,
                top_up_type: None,
                user_id: None,
                merchant_id: None,
                category_id: None,
                payer_phone: Some("250788000002".to_string()),
                amount: BigDecimal::from(10),
                status: TxStatus::Pending,
                gateway_tx_id: Some(format!("gw-{}", idgen::next())),
                message: None,
                balance_before: None,
                balance_after: None,
                merchant_balance_before: None,
                merchant_balance_after: None,
                discount_amount: zero(),
                user_bonus_amount: zero(),
                admin_income_amount: zero(),
                commission_amount: zero(),
                created_at: now - chrono::Duration::minutes(10),
                updated_at: now,
            };
            ledger.insert_transaction(&tx)?;

            let stale = ledger.stale_pending(now, None, 10)?;
            assert!(stale.iter().any(|t| t.id == tx.id));
            let past = ledger.stale_pending(now, Some(&StaleCursor::of(&tx)), 10)?;
            assert!(past.iter().all(|t| t.id != tx.id));

            let original_id = tx.id.clone();
            tx.status = TxStatus::Success;
            ledger.update_transaction(&original_id, &tx)?;
            let by_gateway = ledger
                .transaction_by_gateway_id_for_update(tx.gateway_tx_id.as_deref().unwrap())?
                .unwrap();
            assert_eq!(by_gateway.id, original_id);
            assert_eq!(by_gateway.status, TxStatus::Success);
            Ok(())
        });
    }
}
