//! # Message Body
//!
//! The representations a message takes as it moves through the pipeline:
//! a decoded value on the handler side, JSON text or raw bytes on the wire
//! side. Converter stages map between them.

use serde_json::Value;

/// A pipeline message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// A decoded object, ready for a protocol handler.
    Value(Value),
    /// JSON text.
    Text(String),
    /// Raw bytes: JSON bytes, MessagePack bytes, or a framed wire message.
    Bytes(Vec<u8>),
}

impl Body {
    /// Short name of the representation, for error reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}
