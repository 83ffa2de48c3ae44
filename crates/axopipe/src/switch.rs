//! # Switch
//!
//! Routes an inbound message to one of several registered destinations by
//! target address. Routing is best-effort: a message whose target cannot
//! be resolved is dropped, not errored.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::body::Body;
use crate::node::Node;
use crate::node::NodeCore;
use crate::node::Result;
use crate::node::Unpipe;
use crate::registry::SourceRegistry;

/// Custom resolver consulted before the registered target table.
pub type Resolver = Box<dyn Fn(&str) -> Option<Arc<dyn Node>> + Send + Sync>;

pub struct Switch {
    core: NodeCore,
    targets: Arc<DashMap<String, Arc<dyn Node>>>,
    resolver: Option<Resolver>,
}

impl Switch {
    pub fn new(registry: &Arc<SourceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            core: NodeCore::new("", Arc::clone(registry)),
            targets: Arc::new(DashMap::new()),
            resolver: None,
        })
    }

    pub fn with_resolver(registry: &Arc<SourceRegistry>, resolver: Resolver) -> Arc<Self> {
        Arc::new(Self {
            core: NodeCore::new("", Arc::clone(registry)),
            targets: Arc::new(DashMap::new()),
            resolver: Some(resolver),
        })
    }

    /// Registers a destination under its own name, or under `identifier`
    /// when given. The returned closure removes the registration; calling
    /// it a second time is a no-op.
    pub fn set_target(&self, target: Arc<dyn Node>, identifier: Option<&str>) -> Unpipe {
        let name = identifier
            .map(str::to_string)
            .unwrap_or_else(|| target.name().to_string());
        self.targets.insert(name.clone(), target);
        let targets = Arc::clone(&self.targets);
        Box::new(move || {
            targets.remove(&name);
        })
    }

    pub fn set_targets(&self, targets: Vec<Arc<dyn Node>>) {
        for target in targets {
            self.set_target(target, None);
        }
    }

    /// Searches the registered targets for one through which `name` is
    /// reachable, skipping transports (the node-graph traversal rule).
    fn find_in_targets(&self, name: &str) -> Option<Arc<dyn Node>> {
        let mut visited = HashSet::new();
        self.targets.iter().find_map(|entry| {
            let node = entry.value();
            if !node.is_transport() && node.target_exists(name, &mut visited) {
                Some(Arc::clone(node))
            } else {
                None
            }
        })
    }

    /// Resolution order: custom resolver, registered targets, then the
    /// generic source-registry/edge fallback.
    fn resolve(&self, target: &str) -> Option<Arc<dyn Node>> {
        if let Some(resolver) = &self.resolver {
            if let Some(node) = resolver(target) {
                return Some(node);
            }
        }
        self.find_in_targets(target)
            .or_else(|| self.resolve_target(target, &mut HashSet::new()))
    }
}

#[async_trait]
impl Node for Switch {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    async fn receive(&self, body: Body, source: &str, target: &str) -> Result<()> {
        match self.resolve(target) {
            Some(node) => node.receive(body, source, target).await,
            None => {
                debug!(node = %self.core.name(), %target, "no destination resolved; message dropped");
                Ok(())
            }
        }
    }
}
