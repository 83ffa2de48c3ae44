//! # RPC Server Facade
//!
//! Wires transports, codec stages, the server handler and the reply switch
//! into a runnable pipeline:
//!
//! ```text
//! transport -> decoder -> handler -> encoder -> switch -> transports
//! ```
//!
//! The switch learns every attached transport as a destination; replies
//! and forwarded events find the right transport through it (directly, or
//! through the source registry for addresses learned from inbound
//! traffic).

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use dashmap::DashMap;
use serde_json::Value;

use axopipe::convert;
use axopipe::node::Node;
use axopipe::node::Unpipe;
use axopipe::registry::SourceRegistry;
use axopipe::switch::Switch;

use crate::logger::LogService;
use crate::manage::Constructor;
use crate::manage::ManageRpc;
use crate::server::ServerHandler;
use crate::service::Method;
use crate::service::MethodMap;
use crate::service::Service;
use crate::transport;
use crate::transport::tcp::TcpServerTransport;

/// Default network endpoint when no transport configuration is supplied.
pub const DEFAULT_PORT: u16 = 3000;

pub struct RpcServerOptions {
    /// Name the server answers to on the wire.
    pub name: String,
    /// Encode traffic as MessagePack rather than JSON.
    pub use_msgpack: bool,
    /// Remotely callable logging surface, exposed under `"logger"`.
    pub logger: Option<Arc<LogService>>,
}

impl Default for RpcServerOptions {
    fn default() -> Self {
        Self {
            name: "*".to_string(),
            use_msgpack: true,
            logger: None,
        }
    }
}

pub struct RpcServer {
    registry: Arc<SourceRegistry>,
    handler: Arc<ServerHandler>,
    decoder: Arc<dyn Node>,
    switch: Arc<Switch>,
    transports: DashMap<String, Arc<dyn Node>>,
    detach: Mutex<Vec<Unpipe>>,
    closed: AtomicBool,
}

impl RpcServer {
    /// Builds the processing pipeline. Transports attach afterwards via
    /// [`attach_transport`] or [`listen`].
    ///
    /// [`attach_transport`]: RpcServer::attach_transport
    /// [`listen`]: RpcServer::listen
    pub fn new(options: RpcServerOptions) -> Arc<Self> {
        let registry = Arc::new(SourceRegistry::new());
        let decoder: Arc<dyn Node> = if options.use_msgpack {
            convert::msgpack_decoder(&registry)
        } else {
            convert::json_parser(&registry)
        };
        let handler = ServerHandler::new(&options.name, &registry, options.logger);
        let encoder: Arc<dyn Node> = if options.use_msgpack {
            convert::msgpack_encoder(&registry)
        } else {
            convert::json_to_bytes(&registry)
        };
        let switch = Switch::new(&registry);

        decoder.pipe(handler.clone());
        handler.pipe(encoder.clone());
        encoder.pipe(switch.clone());

        Arc::new(Self {
            registry,
            handler,
            decoder,
            switch,
            transports: DashMap::new(),
            detach: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Attaches a transport: inbound traffic flows into the decoder, and
    /// the reply switch learns the transport as a destination.
    pub fn attach_transport(&self, transport: Arc<dyn Node>) {
        let unpipe = transport.pipe(Arc::clone(&self.decoder));
        let unregister = self.switch.set_target(Arc::clone(&transport), None);
        if let Ok(mut detach) = self.detach.lock() {
            detach.push(unpipe);
            detach.push(unregister);
        }
        self.transports.insert(transport.name().to_string(), transport);
    }

    /// Binds the default TCP transport. `None` uses [`DEFAULT_PORT`].
    pub async fn listen(&self, port: Option<u16>) -> transport::Result<Arc<TcpServerTransport>> {
        let transport =
            TcpServerTransport::listen("", &self.registry, port.unwrap_or(DEFAULT_PORT)).await?;
        self.attach_transport(transport.clone());
        Ok(transport)
    }

    /// The source registry owned by this assembly. Transports constructed
    /// outside the facade must be built against it.
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn handler(&self) -> &Arc<ServerHandler> {
        &self.handler
    }

    pub fn manage(&self) -> &Arc<ManageRpc> {
        self.handler.manage()
    }

    pub fn expose_instance(&self, service: Arc<dyn Service>, name: &str) {
        self.manage().expose_instance(service, name);
    }

    pub fn expose_class(&self, name: &str, constructor: Constructor) {
        self.manage().expose_class(name, constructor);
    }

    pub fn expose_object(&self, map: MethodMap, name: &str) {
        self.manage().expose_object(map, name);
    }

    pub fn expose(&self, name: &str, method: Method) {
        self.manage().expose(name, method);
    }

    pub fn create_rpc_instance(
        &self,
        class_name: &str,
        instance_name: Option<&str>,
        args: Vec<Value>,
    ) -> std::result::Result<Option<String>, Value> {
        self.manage().create_rpc_instance(class_name, instance_name, args)
    }

    /// Suspends until every attached transport is ready.
    pub async fn ready(&self) {
        let transports: Vec<Arc<dyn Node>> =
            self.transports.iter().map(|entry| entry.value().clone()).collect();
        for transport in transports {
            transport.ready().await;
        }
    }

    /// Closes every transport and tears down the routing state. Idempotent.
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
