//! # Source Registry
//!
//! Reverse-routing table mapping every name seen as a message *source* to
//! the node through which it is reachable. Populated opportunistically the
//! first time a header naming that source is extracted, so reply traffic
//! finds its way back out through the transport it arrived on without a
//! static topology.
//!
//! The registry is owned by the pipeline assembly that creates it; nodes
//! hold a shared handle. Dropping the assembly (or calling [`clear`])
//! tears the table down with it.
//!
//! [`clear`]: SourceRegistry::clear

use std::sync::Arc;

use dashmap::DashMap;

use crate::node::Node;

/// Maps source names to the nodes that own them.
#[derive(Default)]
pub struct SourceRegistry {
    sources: DashMap<String, Arc<dyn Node>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `source` as reachable through `owner`. Last write wins.
    pub fn register(&self, source: &str, owner: Arc<dyn Node>) {
        self.sources.insert(source.to_string(), owner);
    }

    /// The node through which `source` is reachable, when known.
    pub fn lookup(&self, source: &str) -> Option<Arc<dyn Node>> {
        self.sources.get(source).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    /// Drops every recorded source. Called when the owning assembly closes.
    pub fn clear(&self) {
        self.sources.clear();
    }
}
