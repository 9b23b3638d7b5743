use std::str::FromStr;

use actix_request_identifier::RequestId;
use actix_web::{get, post, web, HttpResponse};
use bigdecimal::{BigDecimal, Signed};
use serde::Deserialize;
use tracing::instrument;

use crate::database::models::TopUpType;
use crate::database::Store;
use crate::engine::{Account, GatewayPayment, InstantPayment, Payer, PaymentService, TopUp};
use crate::error::{Error, Result};
use crate::fees::round_cents;
use crate::responses;

pub type AppService = PaymentService<Store>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(pay_handler)
        .service(gateway_payment_handler)
        .service(top_up_handler)
        .service(transaction_status_handler)
        .service(repayment_handler)
        .service(balance_handler)
        .service(gateway_callback_handler);
}

/// Amounts travel as decimal strings with at most two decimal places.
fn parse_amount(field: &str, raw: &str) -> Result<BigDecimal> {
    let value = BigDecimal::from_str(raw.trim()).map_err(|_| Error::BadParameter(field.to_string()))?;
    if !value.is_positive() {
        return Err(Error::BadParameter(format!("{field} must be positive")));
    }
    if round_cents(&value) != value {
        return Err(Error::BadParameter(format!("{field} has more than two decimal places")));
    }
    Ok(value)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInput {
    user_id: i64,
    pin: String,
    merchant_id: i64,
    category_id: i64,
    amount: String,
}

#[post("/payments")]
#[instrument(skip(service, input), fields(request_id = request_id.as_str()))]
pub async fn pay_handler(
    service: web::Data<AppService>,
    request_id: RequestId,
    input: web::Json<PaymentInput>,
) -> Result<HttpResponse> {
    let input = input.into_inner();
    let payment = InstantPayment {
        amount: parse_amount("amount", &input.amount)?,
        user_id: input.user_id,
        pin: input.pin,
        merchant_id: input.merchant_id,
        category_id: input.category_id,
    };
    let view = service.pay(payment).await?;
    Ok(responses::created_transaction_http_response(&view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPaymentInput {
    merchant_id: i64,
    category_id: i64,
    amount: String,
    user_id: Option<i64>,
    payer_phone: Option<String>,
}

#[post("/payments/gateway")]
#[instrument(skip(service), fields(request_id = request_id.as_str()))]
pub async fn gateway_payment_handler(
    service: web::Data<AppService>,
    request_id: RequestId,
    input: web::Json<GatewayPaymentInput>,
) -> Result<HttpResponse> {
    let input = input.into_inner();
    let payer = match (input.user_id, input.payer_phone) {
        (Some(user_id), _) => Payer::User(user_id),
        (None, Some(phone)) if !phone.trim().is_empty() => Payer::Phone(phone),
        _ => return Err(Error::BadParameter("userId or payerPhone".to_string())),
    };
    let payment = GatewayPayment {
        merchant_id: input.merchant_id,
        category_id: input.category_id,
        amount: parse_amount("amount", &input.amount)?,
        payer,
    };
    let view = service.pay_via_gateway(payment).await?;
    Ok(responses::created_transaction_http_response(&view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpInput {
    user_id: Option<i64>,
    phone: Option<String>,
    merchant_id: Option<i64>,
    amount: String,
    #[serde(rename = "type")]
    kind: TopUpType,
}

#[post("/top-ups")]
#[instrument(skip(service), fields(request_id = request_id.as_str()))]
pub async fn top_up_handler(
    service: web::Data<AppService>,
    request_id: RequestId,
    input: web::Json<TopUpInput>,
) -> Result<HttpResponse> {
    let input = input.into_inner();
    let account = match (input.user_id, input.phone) {
        (Some(user_id), _) => Account::User(user_id),
        (None, Some(phone)) if !phone.trim().is_empty() => Account::Phone(phone),
        _ => return Err(Error::BadParameter("userId or phone".to_string())),
    };
    let top_up = TopUp {
        account,
        merchant_id: input.merchant_id,
        amount: parse_amount("amount", &input.amount)?,
        kind: input.kind,
    };
    let view = service.top_up(top_up).await?;
    Ok(responses::created_transaction_http_response(&view))
}

#[get("/transactions/{id}")]
#[instrument(skip(service), fields(request_id = request_id.as_str()))]
pub async fn transaction_status_handler(
    service: web::Data<AppService>,
    request_id: RequestId,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let view = service.check_status(id.as_str()).await?;
    Ok(responses::transaction_http_response(&view))
}

#[derive(Debug, Deserialize)]
pub struct RepaymentInput {
    amount: String,
}

#[post("/loans/{id}/repayments")]
#[instrument(skip(service), fields(request_id = request_id.as_str()))]
pub async fn repayment_handler(
    service: web::Data<AppService>,
    request_id: RequestId,
    loan_id: web::Path<i64>,
    input: web::Json<RepaymentInput>,
) -> Result<HttpResponse> {
    let amount = parse_amount("amount", &input.amount)?;
    let loan = service.repay_loan(loan_id.into_inner(), amount).await?;
    Ok(responses::loan_http_response(&loan))
}

#[get("/balance/{user_id}")]
#[instrument(skip(service), fields(request_id = request_id.as_str()))]
pub async fn balance_handler(
    service: web::Data<AppService>,
    request_id: RequestId,
    user_id: web::Path<i64>,
) -> Result<HttpResponse> {
    let balance = service.balance(user_id.into_inner()).await?;
    Ok(responses::balance_http_response(&balance))
}

/// Only the id is read from the provider's notification; the outcome is
/// always re-queried.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCallbackInput {
    #[serde(alias = "externalId", alias = "transactionId", alias = "refid")]
    gateway_tx_id: String,
}

#[post("/webhooks/gateway")]
#[instrument(skip(service), fields(request_id = request_id.as_str()))]
pub async fn gateway_callback_handler(
    service: web::Data<AppService>,
    request_id: RequestId,
    input: web::Json<GatewayCallbackInput>,
) -> Result<HttpResponse> {
    let view = service.gateway_callback(&input.gateway_tx_id).await?;
    Ok(responses::transaction_http_response(&view))
}
