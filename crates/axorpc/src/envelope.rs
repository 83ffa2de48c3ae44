//! # Pipeline Envelope
//!
//! The outer message wrapper pipeline stages exchange: a coarse message
//! kind plus the RPC payload. The kind mirrors the payload's own
//! discriminator and exists so stages can classify traffic without
//! inspecting the payload.

use serde::Deserialize;
use serde::Serialize;

use crate::payload::RpcPayload;

/// Coarse classification of a pipeline message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "REQUEST")]
    Request,
    #[serde(rename = "RESPONSE")]
    Response,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "EVENT")]
    Event,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

/// A pipeline message: kind plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: RpcPayload,
}

impl Envelope {
    pub fn new(kind: MessageType, payload: RpcPayload) -> Self {
        Self { kind, payload }
    }

    /// Wraps a payload under the message kind that matches it.
    pub fn wrap(payload: RpcPayload) -> Self {
        let kind = match &payload {
            RpcPayload::Call { .. } => MessageType::Request,
            RpcPayload::Success { .. } => MessageType::Response,
            RpcPayload::Error { .. } => MessageType::Error,
            RpcPayload::Event { .. } => MessageType::Event,
        };
        Self { kind, payload }
    }
}
