//! # Converter Stages
//!
//! Nodes that map one body representation onto another without touching
//! routing: the transformed result is forwarded under the same source and
//! target. A failed transform surfaces as the node's error return and is
//! logged; it never panics and never stops the node from processing later
//! messages.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::body::Body;
use crate::node::Error;
use crate::node::Node;
use crate::node::NodeCore;
use crate::node::Result;
use crate::registry::SourceRegistry;

/// A pure body transform.
pub type Transform = Box<dyn Fn(Body) -> Result<Body> + Send + Sync>;

/// A pipeline stage applying a pure transform to each message body.
pub struct Converter {
    core: NodeCore,
    transform: Transform,
}

impl Converter {
    pub fn new(registry: &Arc<SourceRegistry>, transform: Transform) -> Arc<Self> {
        Arc::new(Self {
            core: NodeCore::new("", Arc::clone(registry)),
            transform,
        })
    }
}

#[async_trait]
impl Node for Converter {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    async fn receive(&self, body: Body, source: &str, target: &str) -> Result<()> {
        let converted = match (self.transform)(body) {
            Ok(converted) => converted,
            Err(e) => {
                warn!(node = %self.core.name(), error = %e, "conversion failed; message not forwarded");
                return Err(e);
            }
        };
        self.send(converted, source, target).await
    }
}

/// Value -> JSON text.
pub fn json_stringifier(registry: &Arc<SourceRegistry>) -> Arc<Converter> {
    Converter::new(
        registry,
        Box::new(|body| match body {
            Body::Value(value) => serde_json::to_string(&value)
                .map(Body::Text)
                .map_err(|e| Error::Convert(e.to_string())),
            other => Err(Error::UnexpectedBody { expected: "value", found: other.kind() }),
        }),
    )
}

/// Value -> JSON bytes.
pub fn json_to_bytes(registry: &Arc<SourceRegistry>) -> Arc<Converter> {
    Converter::new(
        registry,
        Box::new(|body| match body {
            Body::Value(value) => serde_json::to_vec(&value)
                .map(Body::Bytes)
                .map_err(|e| Error::Convert(e.to_string())),
            other => Err(Error::UnexpectedBody { expected: "value", found: other.kind() }),
        }),
    )
}

/// JSON text or JSON bytes -> Value.
pub fn json_parser(registry: &Arc<SourceRegistry>) -> Arc<Converter> {
    Converter::new(
        registry,
        Box::new(|body| {
            let parsed = match &body {
                Body::Text(text) => serde_json::from_str::<Value>(text),
                Body::Bytes(bytes) => serde_json::from_slice::<Value>(bytes),
                Body::Value(_) => {
                    return Err(Error::UnexpectedBody { expected: "text or bytes", found: body.kind() })
                }
            };
            parsed.map(Body::Value).map_err(|e| Error::Convert(e.to_string()))
        }),
    )
}

/// Value -> MessagePack bytes. Maps keep their field names on the wire.
pub fn msgpack_encoder(registry: &Arc<SourceRegistry>) -> Arc<Converter> {
    Converter::new(
        registry,
        Box::new(|body| match body {
            Body::Value(value) => rmp_serde::to_vec_named(&value)
                .map(Body::Bytes)
                .map_err(|e| Error::Convert(e.to_string())),
            other => Err(Error::UnexpectedBody { expected: "value", found: other.kind() }),
        }),
    )
}

/// MessagePack bytes -> Value.
pub fn msgpack_decoder(registry: &Arc<SourceRegistry>) -> Arc<Converter> {
    Converter::new(
        registry,
        Box::new(|body| match body {
            Body::Bytes(bytes) => rmp_serde::from_slice::<Value>(&bytes)
                .map(Body::Value)
                .map_err(|e| Error::Convert(e.to_string())),
            other => Err(Error::UnexpectedBody { expected: "bytes", found: other.kind() }),
        }),
    )
}
