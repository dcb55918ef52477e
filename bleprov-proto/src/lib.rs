//! bleprov wire protocol - ATT PDUs, attribute UUIDs, advertising payloads and
//! the JSON messages exchanged over the WiFi configuration characteristic.
//!
//! This crate does no I/O. The server and the companion client both build on
//! it so the two ends agree on identifiers and message shapes.

pub mod adv;
pub mod att;
pub mod ble;
pub mod message;
pub mod uuid;

pub use att::{ErrorCode, MalformedPdu, Request, Response};
pub use message::{CredentialRequest, FailureReason, ProvisionResponse, RequestError};
pub use uuid::Uuid;
