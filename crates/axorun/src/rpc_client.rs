//! # RPC Client Facade
//!
//! Wires a transport, codec stages and the client handler into a runnable
//! pipeline:
//!
//! ```text
//! transport -> decoder -> handler -> encoder -> transport
//! ```
//!
//! Proxies bound through the facade resolve against its default target
//! unless the caller names a remote explicitly.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use dashmap::DashMap;

use axopipe::convert;
use axopipe::node::Node;
use axopipe::node::Unpipe;
use axopipe::registry::SourceRegistry;

use crate::client::ClientHandler;
use crate::client::Proxy;
use crate::client::DEFAULT_TARGET;
use crate::manage::MANAGE_NAMESPACE;
use crate::rpc_server::DEFAULT_PORT;
use crate::transport;
use crate::transport::tcp::TcpClientTransport;

pub struct RpcClientOptions {
    /// Name this endpoint uses as a message source. Empty generates one.
    pub name: String,
    /// Target used when a proxy names no remote.
    pub default_target: String,
    /// Encode traffic as MessagePack rather than JSON.
    pub use_msgpack: bool,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            default_target: DEFAULT_TARGET.to_string(),
            use_msgpack: true,
        }
    }
}

pub struct RpcClient {
    registry: Arc<SourceRegistry>,
    handler: Arc<ClientHandler>,
    decoder: Arc<dyn Node>,
    encoder: Arc<dyn Node>,
    default_target: String,
    transports: DashMap<String, Arc<dyn Node>>,
    detach: Mutex<Vec<Unpipe>>,
    closed: AtomicBool,
}

impl RpcClient {
    /// Builds the processing pipeline. A transport attaches afterwards via
    /// [`attach_transport`] or [`connect`].
    ///
    /// [`attach_transport`]: RpcClient::attach_transport
    /// [`connect`]: RpcClient::connect
    pub fn new(options: RpcClientOptions) -> Arc<Self> {
        let registry = Arc::new(SourceRegistry::new());
        let decoder: Arc<dyn Node> = if options.use_msgpack {
            convert::msgpack_decoder(&registry)
        } else {
            convert::json_parser(&registry)
        };
        let handler = ClientHandler::new(&options.name, &registry);
        let encoder: Arc<dyn Node> = if options.use_msgpack {
            convert::msgpack_encoder(&registry)
        } else {
            convert::json_to_bytes(&registry)
        };

        decoder.pipe(handler.clone());
        handler.pipe(encoder.clone());

        Arc::new(Self {
            registry,
            handler,
            decoder,
            encoder,
            default_target: options.default_target,
            transports: DashMap::new(),
            detach: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// The name this endpoint stamps as a message source.
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    /// Attaches a transport: inbound traffic flows into the decoder, and
    /// encoded outbound traffic flows into the transport.
    pub fn attach_transport(&self, transport: Arc<dyn Node>) {
        let inbound = transport.pipe(Arc::clone(&self.decoder));
        let outbound = self.encoder.pipe(Arc::clone(&transport));
        if let Ok(mut detach) = self.detach.lock() {
            detach.push(inbound);
            detach.push(outbound);
        }
        self.transports.insert(transport.name().to_string(), transport);
    }

    /// Connects the default TCP transport. `None` targets the default
    /// endpoint on localhost.
    pub async fn connect(&self, addr: Option<&str>) -> transport::Result<Arc<TcpClientTransport>> {
        let default_addr = format!("127.0.0.1:{}", DEFAULT_PORT);
        let addr = addr.unwrap_or(&default_addr);
        let transport = TcpClientTransport::connect("", &self.registry, addr).await?;
        self.attach_transport(transport.clone());
        Ok(transport)
    }

    /// The source registry owned by this assembly.
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn handler(&self) -> &Arc<ClientHandler> {
        &self.handler
    }

    /// Binds a proxy for the named remote instance, against `target` or
    /// the facade's default. Waits for the transport to be ready first.
    pub async fn proxy(&self, name: &str, target: Option<&str>) -> Proxy {
        self.ready().await;
        let target = target.unwrap_or(&self.default_target);
        self.handler.proxy(name, Some(target))
    }

    /// Proxy for the server-side instance registry.
    pub async fn manage(&self) -> Proxy {
        self.proxy(MANAGE_NAMESPACE, None).await
    }

    /// Suspends until every attached transport is ready.
    pub async fn ready(&self) {
        let transports: Vec<Arc<dyn Node>> =
            self.transports.iter().map(|entry| entry.value().clone()).collect();
        for transport in transports {
            transport.ready().await;
        }
    }

    /// Closes the transport and rejects every outstanding call. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transports: Vec<Arc<dyn Node>> =
            self.transports.iter().map(|entry| entry.value().clone()).collect();
        for transport in transports {
            transport.close().await;
        }
        self.transports.clear();
        if let Ok(mut detach) = self.detach.lock() {
            for unpipe in detach.drain(..) {
                unpipe();
            }
        }
        self.handler.close().await;
        self.registry.clear();
    }
}
