use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::Serialize;

use crate::database::models::{Loan, TxStatus};
use crate::engine::{BalanceView, TransactionView};

/// 201 for a settled transaction, 202 while the gateway still has to confirm it.
pub fn created_transaction_http_response(view: &TransactionView) -> HttpResponse {
    let status = match view.transaction.status {
        TxStatus::Pending => StatusCode::ACCEPTED,
        _ => StatusCode::CREATED,
    };
    HttpResponse::build(status).json(view)
}

pub fn transaction_http_response(view: &TransactionView) -> HttpResponse {
    ok_json(view)
}

pub fn balance_http_response(balance: &BalanceView) -> HttpResponse {
    ok_json(balance)
}

pub fn loan_http_response(loan: &Loan) -> HttpResponse {
    ok_json(loan)
}

fn ok_json<T: Serialize>(body: &T) -> HttpResponse {
    HttpResponse::Ok().json(body)
}
