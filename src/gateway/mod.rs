//! Gateway Client: the external mobile-money provider.
//!
//! No business logic lives here. Responses are normalized at this boundary
//! into [`Initiated`], [`GatewayStatus`] and [`BulkStatusItem`] so that
//! engines never see the provider's varying JSON shapes.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use thiserror::Error;

use crate::error::Error;

pub mod decode;
pub mod http;

pub use http::HttpGateway;

/// One leg of a multi-party transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub amount: BigDecimal,
    pub phone: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub amount: BigDecimal,
    pub currency: String,
    pub payer_phone: String,
    pub transfers: Vec<Transfer>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Initiated {
    pub http_status: u16,
    pub gateway_tx_id: Option<String>,
    pub status_desc: Option<String>,
}

impl Initiated {
    /// The gateway id, if the provider accepted the instruction.
    pub fn accepted_id(&self) -> Option<&str> {
        match (self.http_status, self.gateway_tx_id.as_deref()) {
            (201, Some(id)) if !id.is_empty() => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failed(Option<String>),
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkStatusItem {
    pub external_id: String,
    pub status: GatewayStatus,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Network failure or timeout: the provider never answered.
    #[error("{0}")]
    Unavailable(String),

    #[error("status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("undecodable response (status {status}): {detail}")]
    Decode { status: u16, detail: String },
}

impl GatewayError {
    /// The provider's own words, kept verbatim for support.
    pub fn provider_message(&self) -> &str {
        match self {
            GatewayError::Unavailable(detail) => detail,
            GatewayError::Rejected { body, .. } => body,
            GatewayError::Decode { detail, .. } => detail,
        }
    }
}

impl From<GatewayError> for Error {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(detail) => Error::GatewayUnavailable(detail),
            GatewayError::Rejected { status, body } => Error::GatewayRejected { status, detail: body },
            GatewayError::Decode { status, detail } => Error::GatewayRejected { status, detail },
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError>;

    async fn check_status(&self, gateway_tx_id: &str) -> Result<GatewayStatus, GatewayError>;

    async fn bulk_status(&self, gateway_tx_ids: &[String]) -> Result<Vec<BulkStatusItem>, GatewayError>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted gateway for engine tests.
    pub struct FakeGateway {
        initiate_result: Mutex<Result<Initiated, GatewayError>>,
        statuses: Mutex<HashMap<String, Result<GatewayStatus, GatewayError>>>,
        bulk_error: Mutex<Option<GatewayError>>,
        bulk_error_once: Mutex<Option<GatewayError>>,
        pub initiated: Mutex<Vec<InitiateRequest>>,
        pub status_calls: AtomicUsize,
        pub bulk_calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeGateway {
        pub fn accepting(gateway_tx_id: &str) -> Self {
            Self {
                initiate_result: Mutex::new(Ok(Initiated {
                    http_status: 201,
                    gateway_tx_id: Some(gateway_tx_id.to_string()),
                    status_desc: Some("Accepted".to_string()),
                })),
                statuses: Mutex::new(HashMap::new()),
                bulk_error: Mutex::new(None),
                bulk_error_once: Mutex::new(None),
                initiated: Mutex::new(Vec::new()),
                status_calls: AtomicUsize::new(0),
                bulk_calls: Mutex::new(Vec::new()),
            }
        }

        pub fn initiate_returns(&self, result: Result<Initiated, GatewayError>) {
            *self.initiate_result.lock().unwrap() = result;
        }

        pub fn status_of(&self, gateway_tx_id: &str, result: Result<GatewayStatus, GatewayError>) {
            self.statuses
                .lock()
                .unwrap()
                .insert(gateway_tx_id.to_string(), result);
        }

        pub fn fail_bulk(&self, err: GatewayError) {
            *self.bulk_error.lock().unwrap() = Some(err);
        }

        pub fn fail_bulk_once(&self, err: GatewayError) {
            *self.bulk_error_once.lock().unwrap() = Some(err);
        }

        pub fn status_calls(&self) -> usize {
            self.status_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Gateway for FakeGateway {
        async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError> {
            self.initiated.lock().unwrap().push(request.clone());
            self.initiate_result.lock().unwrap().clone()
        }

        async fn check_status(&self, gateway_tx_id: &str) -> Result<GatewayStatus, GatewayError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .unwrap()
                .get(gateway_tx_id)
                .cloned()
                .unwrap_or(Ok(GatewayStatus::Pending))
        }

        async fn bulk_status(&self, gateway_tx_ids: &[String]) -> Result<Vec<BulkStatusItem>, GatewayError> {
            self.bulk_calls.lock().unwrap().push(gateway_tx_ids.to_vec());
            if let Some(err) = self.bulk_error_once.lock().unwrap().take() {
                return Err(err);
            }
            if let Some(err) = self.bulk_error.lock().unwrap().clone() {
                return Err(err);
            }
            let statuses = self.statuses.lock().unwrap();
            Ok(gateway_tx_ids
                .iter()
                .map(|id| BulkStatusItem {
                    external_id: id.clone(),
                    status: match statuses.get(id) {
                        Some(Ok(status)) => status.clone(),
                        _ => GatewayStatus::Pending,
                    },
                })
                .collect())
        }
    }
}
