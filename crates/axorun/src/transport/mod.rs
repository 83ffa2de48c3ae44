//! # Transport Boundary
//!
//! The contract every wire adapter satisfies, plus the concrete adapters
//! shipped here (an in-memory channel pair and TCP).
//!
//! A transport is a pipeline [`Node`] with `is_transport() == true` that:
//! - sets its readiness flag only once genuinely connected;
//! - on `receive`, frames the body with a routing header and physically
//!   transmits it toward the target's address space;
//! - delivers inbound raw data by extracting the header and, when the
//!   addressed target exists locally, forwarding
//!   `send(payload, header.source, header.target)`;
//! - supports idempotent `close()`.
//!
//! Multi-hop pub/sub adapters address peers by topic: a fixed namespace
//! prefix concatenated with the destination node name.

pub mod channel;
pub mod tcp;

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use axopipe::body::Body;
use axopipe::node::Node;

#[derive(Debug)]
pub enum Error {
    /// The endpoint could not be reached or the connection dropped.
    Connection(String),
    /// I/O failure on an established connection.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "Connection error: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Inbound path shared by the adapters: extract the header, check that the
/// addressed target exists locally, and forward the payload. Frames
/// without a valid header, and frames addressed elsewhere, are dropped.
pub(crate) async fn dispatch_inbound(node: &Arc<dyn Node>, raw: Body) {
    let Some((header, payload)) = node.core().extract_header(&raw, node) else {
        warn!(node = %node.name(), "frame without a valid header dropped");
        return;
    };
    if !node.has_target(&header.target) {
        debug!(node = %node.name(), target = %header.target, "no local target for inbound frame");
        return;
    }
    if let Err(e) = node.send(payload, &header.source, &header.target).await {
        warn!(node = %node.name(), error = %e, "inbound delivery failed");
    }
}
