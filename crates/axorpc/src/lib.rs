//! # Axorpc
//!
//! The RPC message protocol carried over the axopipe pipeline: the payload
//! taxonomy (call, success, error, event) and the envelope that pipeline
//! stages pass between each other.
//!
//! The wire shape after encoding (JSON text or MessagePack bytes) is a map
//! with a string discriminator field `type`; parsers are field-order
//! independent.

pub mod envelope;
pub mod payload;

pub use envelope::Envelope;
pub use envelope::MessageType;
pub use payload::RpcErrorCode;
pub use payload::RpcPayload;
