//! # Channel Transport
//!
//! In-memory duplex transport: two connected endpoints exchanging framed
//! bodies over unbounded channels. Used by tests and same-process wiring;
//! frames cross endpoint boundaries exactly as they would cross a wire.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use axopipe::body::Body;
use axopipe::node;
use axopipe::node::Node;
use axopipe::node::NodeCore;
use axopipe::registry::SourceRegistry;

use crate::transport::dispatch_inbound;

pub struct ChannelTransport {
    core: NodeCore,
    tx: mpsc::UnboundedSender<Body>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ChannelTransport {
    /// Creates a connected pair. Frames sent through one endpoint arrive
    /// at the other with their routing header intact. Each endpoint lives
    /// in its own assembly and uses that assembly's source registry.
    pub fn pair(
        name_a: &str,
        registry_a: &Arc<SourceRegistry>,
        name_b: &str,
        registry_b: &Arc<SourceRegistry>,
    ) -> (Arc<Self>, Arc<Self>) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = Self::spawn(name_a, registry_a, tx_a, rx_b);
        let b = Self::spawn(name_b, registry_b, tx_b, rx_a);
        (a, b)
    }

    fn spawn(
        name: &str,
        registry: &Arc<SourceRegistry>,
        tx: mpsc::UnboundedSender<Body>,
        rx: mpsc::UnboundedReceiver<Body>,
    ) -> Arc<Self> {
        let transport = Arc::new(Self {
            core: NodeCore::new(name, Arc::clone(registry)),
            tx,
            pump: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let handle = tokio::spawn(Self::pump(Arc::clone(&transport), rx));
        if let Ok(mut slot) = transport.pump.lock() {
            *slot = Some(handle);
        }
        // An in-memory pair is connected the moment it exists.
        transport.core.set_ready();
        transport
    }

    async fn pump(transport: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Body>) {
        let node: Arc<dyn Node> = transport;
        while let Some(raw) = rx.recv().await {
            dispatch_inbound(&node, raw).await;
        }
    }
}

#[async_trait]
impl Node for ChannelTransport {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn is_transport(&self) -> bool {
        true
    }

    /// Frames and transmits to the peer endpoint.
    async fn receive(&self, body: Body, source: &str, target: &str) -> node::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(node::Error::Transport("transport closed".into()));
        }
        let framed = self.core.prepend_header(source, target, &body)?;
        self.tx
            .send(framed)
            .map_err(|_| node::Error::Transport("peer endpoint closed".into()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.pump.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}
