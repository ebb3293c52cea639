//! Wire types exchanged with the collaboration server.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Body of a webhook or store request.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub payload: Option<WebhookPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub document_name: Option<String>,
    #[serde(default)]
    pub request_parameters: Option<Map<String, Value>>,
    /// Current document state sent with `change` events.
    #[serde(default)]
    pub document: Option<Value>,
    /// Encoded state sent to the store endpoint, `{"data": [..]}`.
    #[serde(default)]
    pub state: Option<Value>,
}

impl WebhookBody {
    /// Parse a request body. An empty body reads as `{}`.
    pub fn from_slice(body: &[u8]) -> Result<Self, GatewayError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|_| invalid_payload())
    }
}

/// A webhook body with every field the webhook endpoint requires.
#[derive(Debug)]
pub struct EventRequest {
    pub event: String,
    pub document_name: String,
    pub request_parameters: Map<String, Value>,
    pub payload: WebhookPayload,
}

impl TryFrom<WebhookBody> for EventRequest {
    type Error = GatewayError;

    fn try_from(body: WebhookBody) -> Result<Self, Self::Error> {
        let event = body.event.ok_or_else(invalid_payload)?;
        let mut payload = body.payload.ok_or_else(invalid_payload)?;
        let request_parameters = payload
            .request_parameters
            .take()
            .ok_or_else(invalid_payload)?;
        let document_name = payload.document_name.take().ok_or_else(invalid_payload)?;
        Ok(Self {
            event,
            document_name,
            request_parameters,
            payload,
        })
    }
}

/// A store body with the decoded state bytes.
#[derive(Debug)]
pub struct StoreRequest {
    pub document_name: String,
    pub request_parameters: Map<String, Value>,
    pub state: Vec<u8>,
}

impl TryFrom<WebhookBody> for StoreRequest {
    type Error = GatewayError;

    fn try_from(body: WebhookBody) -> Result<Self, Self::Error> {
        let payload = body.payload.ok_or_else(invalid_payload)?;
        let data = payload
            .state
            .as_ref()
            .and_then(|state| state.get("data"))
            .ok_or_else(invalid_payload)?;
        let request_parameters = payload.request_parameters.ok_or_else(invalid_payload)?;
        let document_name = payload.document_name.ok_or_else(invalid_payload)?;
        Ok(Self {
            document_name,
            request_parameters,
            state: byte_array(data)?,
        })
    }
}

/// Response of the fetch endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct FetchResponse {
    pub data: Vec<u8>,
}

/// Decode a JSON array of integers in `0..=255`.
pub fn byte_array(value: &Value) -> Result<Vec<u8>, GatewayError> {
    let items = value
        .as_array()
        .ok_or_else(|| GatewayError::Validation("Expected an array of bytes".to_string()))?;
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| {
                    GatewayError::Validation(format!("Invalid byte value {}", item))
                })
        })
        .collect()
}

/// Decode document state.
///
/// A byte array or `{"data": [..]}` is decoded as bytes. Any other object is
/// an opaque document and is stored as its compact JSON encoding.
pub fn state_bytes(value: &Value) -> Result<Vec<u8>, GatewayError> {
    match value {
        Value::Object(map) => match map.get("data") {
            Some(data) => byte_array(data),
            None => serde_json::to_vec(value)
                .map_err(|e| GatewayError::Internal(format!("Failed to encode document: {}", e))),
        },
        other => byte_array(other),
    }
}

fn invalid_payload() -> GatewayError {
    GatewayError::Validation("Invalid payload".to_string())
}
