//! Wire types for the HookTunnel relay protocol.
//!
//! Every message is JSON with camelCase field names. Byte payloads travel as
//! base64 strings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Relay protocol routes
pub const REGISTER_PATH: &str = "/register";
pub const STREAM_PATH: &str = "/stream";
pub const RESPONSE_PATH: &str = "/response";

/// Public ingress prefix for webhook deliveries
pub const HOOK_PATH: &str = "/hook";

/// Header mapping, one value per key
pub type Headers = HashMap<String, String>;

/// Registration request from a tunnel client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub local_url: String,
    /// Caller-supplied identifier; empty or absent means "generate one"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
}

/// Registration response from the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub webhook_id: String,
    pub webhook_url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One inbound webhook occurrence pushed down a client's stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub request_id: String,
    pub webhook_id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
}

/// The client's report of having executed a delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub request_id: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl DeliveryResult {
    /// Result carrying only a status and a plain-text explanation
    pub fn failure(request_id: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status_code,
            headers: Headers::new(),
            body: message.into().into_bytes(),
        }
    }
}

/// Acknowledgement of a reported result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
