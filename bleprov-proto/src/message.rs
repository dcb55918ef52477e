//! JSON messages carried over the WiFi configuration characteristic
//!
//! Requests: `{"ssid":"<network>","pw":"<password>"}` (pw optional).
//! Responses: `{"ip":"<address>"}` on success, `{"ip":""}` while the address
//! is still pending, or `{"err":"<reason>"}`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a request body could not be turned into credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// Not JSON at all
    BadFormat,
    /// JSON, but `ssid` is missing or not a string
    BadSsid,
}

impl From<RequestError> for FailureReason {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::BadFormat => FailureReason::BadFormat,
            RequestError::BadSsid => FailureReason::BadSsid,
        }
    }
}

/// Network credentials sent by the companion app
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequest {
    pub ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pw: Option<String>,
}

impl fmt::Debug for CredentialRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRequest")
            .field("ssid", &self.ssid)
            .field("pw", &self.pw.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialRequest {
    /// Parse a complete message (terminator already stripped).
    ///
    /// A non-string `pw` is treated as absent.
    pub fn parse(message: &[u8]) -> Result<Self, RequestError> {
        let value: serde_json::Value =
            serde_json::from_slice(message).map_err(|_| RequestError::BadFormat)?;
        let ssid = value
            .get("ssid")
            .and_then(|v| v.as_str())
            .ok_or(RequestError::BadSsid)?;
        let pw = value.get("pw").and_then(|v| v.as_str()).map(str::to_string);
        Ok(CredentialRequest { ssid: ssid.to_string(), pw })
    }

    /// Newline-terminated JSON line, ready to be written to the characteristic
    pub fn to_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(self)?;
        line.push(crate::ble::TERMINATOR);
        Ok(line)
    }
}

/// Failure codes reported back to the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    BadFormat,
    BadSsid,
    CommandFailed,
    ConnectionFailed,
    LinkLost,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::BadFormat => "bad fmt",
            FailureReason::BadSsid => "bad ssid",
            FailureReason::CommandFailed => "cmd fail",
            FailureReason::ConnectionFailed => "conn fail",
            FailureReason::LinkLost => "BLE lost",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response object; serializes with exactly one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvisionResponse {
    Ip { ip: String },
    Err { err: String },
}

impl ProvisionResponse {
    pub fn connected(ip: impl Into<String>) -> Self {
        ProvisionResponse::Ip { ip: ip.into() }
    }

    /// Empty address: association accepted but no lease yet, or nothing to do
    pub fn pending() -> Self {
        ProvisionResponse::Ip { ip: String::new() }
    }

    pub fn failed(reason: FailureReason) -> Self {
        ProvisionResponse::Err { err: reason.as_str().to_string() }
    }

    /// Compact JSON, no trailing newline
    pub fn to_json(&self) -> String {
        // string-only fields never fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode a reassembled response (trailing terminator allowed)
    pub fn from_bytes(data: &[u8]) -> std::io::Result<Self> {
        let data = data.strip_suffix(b"\n").unwrap_or(data);
        serde_json::from_slice(data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
