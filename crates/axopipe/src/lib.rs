//! # Axopipe
//!
//! A graph of composable message-processing stages. Nodes frame, convert
//! and route message bodies; transports at the edges move framed bodies
//! across the wire. The RPC protocol engine in `axorun` is built on top.

pub mod body;
pub mod convert;
pub mod filter;
pub mod frame;
pub mod node;
pub mod registry;
pub mod switch;
