//! Decoding of the gateway's loosely-shaped JSON.
//!
//! Bodies arrive either flat or wrapped in a `data` envelope, and status
//! fields come as numbers, numeric strings, words or booleans.

use serde::Deserialize;
use serde_json::Value;

use super::{BulkStatusItem, GatewayStatus};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Wrapped { data: T },
    Flat(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Flat(inner) => inner,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInitiated {
    #[serde(default)]
    pub http_status: Option<Value>,
    #[serde(default)]
    pub gateway_tx_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub refid: Option<String>,
    #[serde(default)]
    pub status_desc: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// The first non-empty id among the names the provider uses for it.
fn first_id(candidates: [Option<String>; 3]) -> Option<String> {
    candidates.into_iter().flatten().find(|id| !id.is_empty())
}

impl RawInitiated {
    pub fn id(&self) -> Option<String> {
        first_id([self.gateway_tx_id.clone(), self.transaction_id.clone(), self.refid.clone()])
    }

    pub fn description(&self) -> Option<String> {
        self.status_desc.clone().or_else(|| self.message.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatus {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub success: Option<Value>,
    #[serde(default)]
    pub status_desc: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBulkItem {
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub gateway_tx_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(flatten)]
    pub status: RawStatus,
}

/// Reads an HTTP-like code from a number or a numeric string.
pub fn as_code(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn classify_code(code: u16) -> Option<bool> {
    match code {
        200 | 201 => Some(true),
        400..=599 => Some(false),
        _ => None,
    }
}

impl RawStatus {
    /// Collapses the equivalent success/failure signals into one status.
    /// The `status` field wins over the `success` flag; nothing recognizable
    /// means the payment is still pending.
    pub fn classify(&self) -> GatewayStatus {
        let from_status = self.status.as_ref().and_then(|status| match status {
            Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
                "SUCCESS" | "SUCCESSFUL" => Some(Some(true)),
                "FAILED" | "FAILURE" => Some(Some(false)),
                "PENDING" | "PROCESSING" => Some(None),
                other => other.parse().ok().map(classify_code),
            },
            other => as_code(other).map(classify_code),
        });
        let outcome = match from_status {
            Some(outcome) => outcome,
            None => self.success.as_ref().and_then(as_flag),
        };
        match outcome {
            Some(true) => GatewayStatus::Success,
            Some(false) => GatewayStatus::Failed(self.status_desc.clone().or_else(|| self.message.clone())),
            None => GatewayStatus::Pending,
        }
    }
}

impl RawBulkItem {
    /// `None` for an item that names no transaction.
    pub fn into_item(self) -> Option<BulkStatusItem> {
        let external_id = first_id([self.external_id, self.gateway_tx_id, self.transaction_id])?;
        Some(BulkStatusItem {
            status: self.status.classify(),
            external_id,
        })
    }
}
