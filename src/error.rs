use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use bigdecimal::BigDecimal;
use serde::Serialize;
use thiserror::Error;

/// Every failure the ledger service can report to a caller.
///
/// Local validation failures (credentials, balances, configuration) are never
/// retried. Gateway failures carry the provider's message verbatim so support
/// can diagnose them without access to the gateway's logs.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid credential")]
    InvalidCredential,

    #[error("user account is not active")]
    UserInactive,

    #[error("merchant {0} is not active")]
    MerchantInactive(i64),

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: BigDecimal, requested: BigDecimal },

    #[error("user has no top-up relationship with merchant {0}")]
    NoMerchantRelationship(i64),

    #[error("merchant {0} balance is too low, the merchant must be topped up by the operator")]
    MerchantBalanceLow(i64),

    #[error("invalid phone number format: {0}")]
    InvalidPhoneFormat(String),

    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("payment gateway rejected the request (status {status}): {detail}")]
    GatewayRejected { status: u16, detail: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("{0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{what} {id}"))
    }

    fn code(&self) -> &'static str {
        match self {
            Error::InvalidCredential => "INVALID_CREDENTIAL",
            Error::UserInactive => "USER_INACTIVE",
            Error::MerchantInactive(_) => "MERCHANT_INACTIVE",
            Error::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Error::NoMerchantRelationship(_) => "NO_MERCHANT_RELATIONSHIP",
            Error::MerchantBalanceLow(_) => "MERCHANT_BALANCE_LOW",
            Error::InvalidPhoneFormat(_) => "INVALID_PHONE_FORMAT",
            Error::GatewayUnavailable(_) => "GATEWAY_UNAVAILABLE",
            Error::GatewayRejected { .. } => "GATEWAY_REJECTED",
            Error::Configuration(_) => "CONFIGURATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::BadParameter(_) => "BAD_PARAMETER",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Storage(_) | Error::Pool(_) | Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidCredential => StatusCode::UNAUTHORIZED,
            Error::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::UserInactive
            | Error::MerchantInactive(_)
            | Error::NoMerchantRelationship(_)
            | Error::MerchantBalanceLow(_) => StatusCode::CONFLICT,
            Error::InvalidPhoneFormat(_) | Error::BadParameter(_) | Error::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::GatewayRejected { .. } => StatusCode::BAD_GATEWAY,
            Error::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Storage(_) | Error::Pool(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            Error::Storage(_) | Error::Pool(_) | Error::Internal(_) => {
                tracing::error!(error = %self, "internal server error");
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message,
            },
        })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
