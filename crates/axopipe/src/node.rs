//! # Pipeline Node
//!
//! The base abstraction of the pipeline: a named, addressable processing
//! stage that can be wired to downstream stages and that receives,
//! transforms and forwards message bodies.
//!
//! ## Invariants
//! - Edge ids are unique per node; removing one edge never disturbs other
//!   edges to the same or other targets.
//! - The per-node sequence counter is strictly increasing; it is only
//!   meaningful within that node's own outgoing stream.
//! - Fan-out delivery isolates per-edge failures: every downstream edge
//!   gets its attempt before any failure is reported, as one aggregated
//!   error.

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::watch;
use uuid::Uuid;

use crate::body::Body;
use crate::frame;
use crate::frame::Header;
use crate::registry::SourceRegistry;

#[derive(Debug)]
pub enum Error {
    /// One or more downstream deliveries failed; every edge had its attempt.
    Fanout(Vec<Error>),
    /// A converter stage could not transform the message body.
    Convert(String),
    /// The body had the wrong representation for this stage.
    UnexpectedBody {
        expected: &'static str,
        found: &'static str,
    },
    /// Header framing failed.
    Frame(frame::Error),
    /// Transport-level failure.
    Transport(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fanout(errors) => write!(f, "Delivery failed on {} downstream edges", errors.len()),
            Self::Convert(msg) => write!(f, "Conversion error: {}", msg),
            Self::UnexpectedBody { expected, found } => {
                write!(f, "Unexpected body: expected {}, found {}", expected, found)
            }
            Self::Frame(e) => write!(f, "Framing error: {}", e),
            Self::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<frame::Error> for Error {
    fn from(e: frame::Error) -> Self {
        Self::Frame(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Removes the edge (or registration) its creation returned. Safe to call
/// more than once; later calls are no-ops.
pub type Unpipe = Box<dyn Fn() + Send + Sync>;

/// Shared state embedded by every pipeline node.
pub struct NodeCore {
    name: String,
    registry: Arc<SourceRegistry>,
    edges: Arc<DashMap<Uuid, Arc<dyn Node>>>,
    seq: AtomicU64,
    ready: watch::Sender<bool>,
}

impl NodeCore {
    /// Creates a core with the given name, or a generated one when empty.
    pub fn new(name: &str, registry: Arc<SourceRegistry>) -> Self {
        let name = if name.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            name.to_string()
        };
        let (ready, _) = watch::channel(false);
        Self {
            name,
            registry,
            edges: Arc::new(DashMap::new()),
            seq: AtomicU64::new(0),
            ready,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Marks the node ready, waking every [`ready`] waiter.
    ///
    /// [`ready`]: NodeCore::ready
    pub fn set_ready(&self) {
        self.ready.send_replace(true);
    }

    /// Suspends until the node is ready. A node that never becomes ready
    /// (not wired to a live transport) suspends forever.
    pub async fn ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Next value of the per-node sequence counter.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds a downstream edge. The returned closure removes exactly that
    /// edge and only that edge.
    pub fn pipe(&self, target: Arc<dyn Node>) -> Unpipe {
        let id = Uuid::new_v4();
        self.edges.insert(id, target);
        let edges = Arc::clone(&self.edges);
        Box::new(move || {
            edges.remove(&id);
        })
    }

    /// Snapshot of the current downstream targets.
    pub fn downstream(&self) -> Vec<Arc<dyn Node>> {
        self.edges.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Delivers `body` to every downstream edge concurrently and waits for
    /// all of them. Per-edge failures are collected and reported together
    /// once every edge has had its attempt.
    pub async fn send(&self, body: Body, source: &str, target: &str) -> Result<()> {
        let targets = self.downstream();
        let attempts = targets
            .iter()
            .map(|node| node.receive(body.clone(), source, target));
        let failures: Vec<Error> = join_all(attempts)
            .await
            .into_iter()
            .filter_map(|result| result.err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Fanout(failures))
        }
    }

    /// Frames `body` with a routing header stamped from this node's clock
    /// and sequence counter.
    pub fn prepend_header(&self, source: &str, target: &str, body: &Body) -> Result<Body> {
        let header = Header::new(source, target, self.next_seq());
        frame::prepend_header(&header, body).map_err(Error::from)
    }

    /// Extracts a routing header from raw wire data, registering the
    /// header's source as reachable through `owner` on success.
    pub fn extract_header(&self, raw: &Body, owner: &Arc<dyn Node>) -> Option<(Header, Body)> {
        let (header, remainder) = frame::extract_header(raw)?;
        self.registry.register(&header.source, Arc::clone(owner));
        Some((header, remainder))
    }
}

/// A named, addressable pipeline stage.
///
/// Implementors embed a [`NodeCore`] and expose it through [`core`]; the
/// provided methods cover wiring, fan-out delivery and address resolution.
///
/// [`core`]: Node::core
#[async_trait]
pub trait Node: Send + Sync {
    /// The shared node state.
    fn core(&self) -> &NodeCore;

    /// Processes an inbound message. The default discards it.
    async fn receive(&self, body: Body, source: &str, target: &str) -> Result<()> {
        let _ = (body, source, target);
        Ok(())
    }

    /// Whether this node fronts a physical connection. Transport nodes are
    /// leaves for address resolution: traversal never crosses the wire.
    fn is_transport(&self) -> bool {
        false
    }

    /// Releases any underlying resources. Must be idempotent.
    async fn close(&self) {}

    /// The node's name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Adds a downstream edge to `target`; the returned closure removes it.
    fn pipe(&self, target: Arc<dyn Node>) -> Unpipe {
        self.core().pipe(target)
    }

    /// Delivers `body` to every downstream edge. See [`NodeCore::send`].
    async fn send(&self, body: Body, source: &str, target: &str) -> Result<()> {
        self.core().send(body, source, target).await
    }

    /// Suspends until the node is ready.
    async fn ready(&self) {
        self.core().ready().await;
    }

    /// Whether `name` resolves to this node, to a registered source, or to
    /// any node reachable through non-transport downstream edges.
    ///
    /// `visited` guarantees termination on cyclic graphs; nodes reachable
    /// through several paths are examined once.
    fn target_exists(&self, name: &str, visited: &mut HashSet<String>) -> bool {
        if !visited.insert(self.name().to_string()) {
            return false;
        }
        if self.name() == name {
            return true;
        }
        if self.core().registry().contains(name) {
            return true;
        }
        self.core()
            .downstream()
            .iter()
            .any(|node| !node.is_transport() && node.target_exists(name, visited))
    }

    /// Convenience wrapper over [`target_exists`] with a fresh visited set.
    ///
    /// [`target_exists`]: Node::target_exists
    fn has_target(&self, name: &str) -> bool {
        self.target_exists(name, &mut HashSet::new())
    }

    /// Resolves `name` to the next hop through which it is reachable:
    /// a registered source's owner, or the first non-transport downstream
    /// edge whose subgraph contains the name.
    fn resolve_target(&self, name: &str, visited: &mut HashSet<String>) -> Option<Arc<dyn Node>> {
        if let Some(node) = self.core().registry().lookup(name) {
            return Some(node);
        }
        if !visited.insert(self.name().to_string()) {
            return None;
        }
        self.core()
            .downstream()
            .into_iter()
            .find(|node| !node.is_transport() && node.target_exists(name, visited))
    }
}
