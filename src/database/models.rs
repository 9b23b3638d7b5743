use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};

// status-like columns are stored as their upper-case text form
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value {other}", stringify!($name))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                <str as ToSql<Text, Pg>>::to_sql(self.as_str(), out)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let text = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                text.parse().map_err(Into::into)
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Suspended,
}
text_enum!(UserStatus { Active => "ACTIVE", Suspended => "SUSPENDED" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MerchantStatus {
    Active,
    Inactive,
}
text_enum!(MerchantStatus { Active => "ACTIVE", Inactive => "INACTIVE" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxKind {
    Payment,
    TopUp,
}
text_enum!(TxKind { Payment => "PAYMENT", TopUp => "TOP_UP" });

/// Transaction state machine: PENDING -> {SUCCESS, FAILED}.
///
/// Instant payments and cash/loan top-ups are created directly in SUCCESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}
text_enum!(TxStatus {
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopUpType {
    Cash,
    Loan,
    Momo,
}
text_enum!(TopUpType { Cash => "CASH", Loan => "LOAN", Momo => "MOMO" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Pending,
    PartiallyPaid,
    Completed,
}
text_enum!(LoanStatus {
    Pending => "PENDING",
    PartiallyPaid => "PARTIALLY_PAID",
    Completed => "COMPLETED",
});

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::users)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub phone: String,
    #[serde(skip_serializing)]
    pub pin_hash: Option<String>,
    pub global_balance: BigDecimal,
    /// Top-ups credited without a funding merchant.
    pub total_topped_up: BigDecimal,
    pub status: UserStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::merchants)]
#[serde(rename_all = "camelCase")]
pub struct Merchant {
    pub id: i64,
    pub name: String,
    pub status: MerchantStatus,
    pub is_flexible: bool,
    pub momo_phone: Option<String>,
    pub wallet_balance: BigDecimal,
    pub total_received: BigDecimal,
    pub assigned_balance: BigDecimal,
    pub remaining_balance: BigDecimal,
    pub discount_percentage: BigDecimal,
    pub user_bonus_percentage: BigDecimal,
    pub commission_percentage: BigDecimal,
    pub parent_merchant_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

impl Merchant {
    pub fn is_active(&self) -> bool {
        self.status == MerchantStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::categories)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

/// What one merchant topped one user up with. Bookkeeping only: spend is
/// always deducted from `User::global_balance`.
#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::merchant_user_balances)]
#[serde(rename_all = "camelCase")]
pub struct MerchantUserBalance {
    pub id: i64,
    pub user_id: i64,
    pub merchant_id: i64,
    pub balance: BigDecimal,
    pub total_topped_up: BigDecimal,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::loans)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: i64,
    pub user_id: i64,
    pub merchant_id: i64,
    pub transaction_id: String,
    pub loan_amount: BigDecimal,
    pub paid_amount: BigDecimal,
    pub remaining_amount: BigDecimal,
    pub status: LoanStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Loan {
    /// A loan still gates spending of the funds it provided while at least
    /// one unit of currency is owed.
    pub fn is_outstanding(&self) -> bool {
        self.status != LoanStatus::Completed && self.remaining_amount >= BigDecimal::from(1)
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::transactions)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub kind: TxKind,
    pub top_up_type: Option<TopUpType>,
    pub user_id: Option<i64>,
    pub merchant_id: Option<i64>,
    pub category_id: Option<i64>,
    pub payer_phone: Option<String>,
    pub amount: BigDecimal,
    pub status: TxStatus,
    pub gateway_tx_id: Option<String>,
    pub message: Option<String>,
    pub balance_before: Option<BigDecimal>,
    pub balance_after: Option<BigDecimal>,
    pub merchant_balance_before: Option<BigDecimal>,
    pub merchant_balance_after: Option<BigDecimal>,
    pub discount_amount: BigDecimal,
    pub user_bonus_amount: BigDecimal,
    pub admin_income_amount: BigDecimal,
    pub commission_amount: BigDecimal,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Queryable, Insertable, Serialize)]
#[diesel(table_name = crate::schema::platform_settings)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSettings {
    #[serde(skip_serializing)]
    pub id: i32,
    pub currency: String,
    /// Receives gateway payments made to non-flexible merchants.
    pub platform_phone: Option<String>,
    pub commission_phone: Option<String>,
}

pub const SETTINGS_ROW_ID: i32 = 1;

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            id: SETTINGS_ROW_ID,
            currency: "RWF".to_string(),
            platform_phone: None,
            commission_phone: None,
        }
    }
}
