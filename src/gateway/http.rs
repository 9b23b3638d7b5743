//! HTTP client for the mobile-money gateway.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | POST   | `/initiate` | Start a multi-party transfer |
//! | GET    | `/status/{gatewayTxId}` | Status of one transfer |
//! | GET    | `/bulk-status?ids=a,b,c` | Status of many transfers |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;

use super::decode::{as_code, Envelope, RawBulkItem, RawInitiated, RawStatus};
use super::{BulkStatusItem, Gateway, GatewayError, GatewayStatus, InitiateRequest, Initiated};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| Error::Configuration("gateway api key is not a valid header value".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build gateway client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Sends a request and decodes a 2xx body; other statuses are rejections
    /// carrying the raw body.
    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<(u16, T), GatewayError> {
        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let decoded = serde_json::from_str::<Envelope<T>>(&body).map_err(|e| GatewayError::Decode {
            status: status.as_u16(),
            detail: format!("{e}: {body}"),
        })?;
        Ok((status.as_u16(), decoded.into_inner()))
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Unavailable(format!("gateway timed out: {e}"))
    } else {
        GatewayError::Unavailable(format!("gateway unreachable: {e}"))
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError> {
        let (status, raw) = self
            .call::<RawInitiated>(self.http.post(self.url("initiate")).json(request))
            .await?;
        Ok(Initiated {
            http_status: raw.http_status.as_ref().and_then(as_code).unwrap_or(status),
            status_desc: raw.description(),
            gateway_tx_id: raw.id(),
        })
    }

    async fn check_status(&self, gateway_tx_id: &str) -> Result<GatewayStatus, GatewayError> {
        let (_, raw) = self
            .call::<RawStatus>(self.http.get(self.url(&format!("status/{gateway_tx_id}"))))
            .await?;
        Ok(raw.classify())
    }

    async fn bulk_status(&self, gateway_tx_ids: &[String]) -> Result<Vec<BulkStatusItem>, GatewayError> {
        let ids = gateway_tx_ids.join(",");
        let (_, raw) = self
            .call::<Vec<RawBulkItem>>(self.http.get(self.url("bulk-status")).query(&[("ids", ids)]))
            .await?;
        Ok(raw.into_iter().filter_map(RawBulkItem::into_item).collect())
    }
}
