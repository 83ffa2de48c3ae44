//! # Filter
//!
//! Forwards only the messages its predicate accepts.

use std::sync::Arc;

use async_trait::async_trait;

use crate::body::Body;
use crate::node::Node;
use crate::node::NodeCore;
use crate::node::Result;
use crate::registry::SourceRegistry;

pub type Predicate = Box<dyn Fn(&Body) -> bool + Send + Sync>;

pub struct Filter {
    core: NodeCore,
    predicate: Predicate,
}

impl Filter {
    pub fn new(name: &str, registry: &Arc<SourceRegistry>, predicate: Predicate) -> Arc<Self> {
        Arc::new(Self {
            core: NodeCore::new(name, Arc::clone(registry)),
            predicate,
        })
    }
}

#[async_trait]
impl Node for Filter {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    async fn receive(&self, body: Body, source: &str, target: &str) -> Result<()> {
        if (self.predicate)(&body) {
            self.send(body, source, target).await
        } else {
            Ok(())
        }
    }
}
