//! Webhook signature verification.
//!
//! Hocuspocus signs every request with `X-Hocuspocus-Signature-256:
//! sha256=<hex>`, an HMAC-SHA256 keyed with the shared secret. What gets
//! signed depends on the HTTP method:
//!
//! - `GET`: the JSON object `{"documentName": ..., "queryParams": {...}}`,
//!   with query keys in sorted order and `{}` when there are none.
//! - everything else: the raw request body.

use axum::http::{HeaderMap, Method};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::error::GatewayError;

pub const SIGNATURE_HEADER: &str = "X-Hocuspocus-Signature-256";

type HmacSha256 = Hmac<Sha256>;

/// The parts of a request that take part in signature verification.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a Method,
    pub body: &'a [u8],
    pub query: &'a BTreeMap<String, String>,
    pub document_name: Option<&'a str>,
    pub signature: Option<&'a str>,
}

impl<'a> SignedRequest<'a> {
    /// Read the signature header from `headers`.
    ///
    /// A header that is not valid UTF-8 is passed through as malformed so
    /// verification reports it as such.
    pub fn signature_from(headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(SIGNATURE_HEADER)
            .map(|value| value.to_str().unwrap_or(""))
    }
}

#[derive(Serialize)]
struct QueryCanonical<'a> {
    #[serde(rename = "documentName")]
    document_name: Option<&'a str>,
    #[serde(rename = "queryParams")]
    query_params: &'a BTreeMap<String, String>,
}

/// Verifies webhook signatures against the shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a request.
    ///
    /// Returns `Err(Protocol)` when the header is missing or malformed and
    /// `Ok(false)` when it is well formed but does not match.
    pub fn verify(&self, request: &SignedRequest<'_>) -> Result<bool, GatewayError> {
        let header = request
            .signature
            .ok_or_else(|| GatewayError::Protocol("Header not set".to_string()))?;
        let expected = parse_signature_header(header)?;

        let content = canonical_content(request)?;
        let mut mac = self.mac()?;
        mac.update(&content);
        Ok(mac.verify_slice(&expected).is_ok())
    }

    /// Compute the header value the collaboration server would send.
    pub fn sign(&self, request: &SignedRequest<'_>) -> Result<String, GatewayError> {
        let content = canonical_content(request)?;
        let mut mac = self.mac()?;
        mac.update(&content);
        Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self) -> Result<HmacSha256, GatewayError> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| GatewayError::Internal(format!("HMAC key error: {}", e)))
    }
}

/// Split `sha256=<hex>` and decode the digest.
fn parse_signature_header(header: &str) -> Result<Vec<u8>, GatewayError> {
    let parts: Vec<&str> = header.split('=').collect();
    let [algorithm, digest] = parts.as_slice() else {
        return Err(GatewayError::Protocol(
            "Invalid signature format".to_string(),
        ));
    };

    if *algorithm != "sha256" || digest.is_empty() {
        return Err(GatewayError::Protocol(
            "Invalid signature format".to_string(),
        ));
    }

    hex::decode(digest).map_err(|_| GatewayError::Protocol("Invalid signature format".to_string()))
}

/// The bytes that were signed for this request.
pub fn canonical_content(request: &SignedRequest<'_>) -> Result<Vec<u8>, GatewayError> {
    if *request.method == Method::GET {
        serde_json::to_vec(&QueryCanonical {
            document_name: request.document_name,
            query_params: request.query,
        })
        .map_err(|e| GatewayError::Internal(format!("Failed to canonicalize query: {}", e)))
    } else {
        Ok(request.body.to_vec())
    }
}
