//! # RPC Payloads
//!
//! The payload taxonomy carried inside pipeline envelopes: a method call,
//! its success or error response, and unsolicited event emissions.
//!
//! ## Invariants
//! - Success and Error responses carry the id of the call that triggered
//!   them; a response whose id matches no pending call is discarded by the
//!   receiver.
//! - Events carry no id. They are unsolicited and routed by address alone.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Dispatch failure codes returned to the caller inside an Error payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcErrorCode {
    /// No constructor is registered under the requested class name.
    ClassNotFound,
    /// The namespace has no callable under the requested method name.
    MethodNotFound,
    /// The invoked method raised; the error payload carries the value.
    Exception,
}

impl std::fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClassNotFound => write!(f, "ClassNotFound"),
            Self::MethodNotFound => write!(f, "MethodNotFound"),
            Self::Exception => write!(f, "Exception"),
        }
    }
}

/// The RPC payload taxonomy. The `type` discriminator takes the wire
/// values `POST`, `SUCCESS`, `ERROR` and `EVENT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RpcPayload {
    /// A method call on a named instance.
    #[serde(rename = "POST")]
    Call {
        /// Correlation id linking the call to its eventual response.
        id: String,
        /// Namespace (instance name) the method lives under.
        path: String,
        method: String,
        params: Vec<Value>,
    },
    /// The successful response to a call.
    #[serde(rename = "SUCCESS")]
    Success { id: String, result: Value },
    /// The failed response to a call.
    ///
    /// The parser tolerates a missing id; such responses cannot be
    /// correlated and are discarded by the receiver.
    #[serde(rename = "ERROR")]
    Error {
        #[serde(default)]
        id: String,
        code: RpcErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exception: Option<Value>,
    },
    /// An unsolicited event emission.
    #[serde(rename = "EVENT")]
    Event { event: String, params: Vec<Value> },
}

impl RpcPayload {
    /// The correlation id, for payload kinds that carry one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Call { id, .. } | Self::Success { id, .. } => Some(id),
            Self::Error { id, .. } if !id.is_empty() => Some(id),
            Self::Error { .. } | Self::Event { .. } => None,
        }
    }
}
