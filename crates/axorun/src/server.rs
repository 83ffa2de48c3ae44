//! # Server Handler
//!
//! Dispatches inbound calls to exposed methods and bridges server-side
//! events to subscribing clients.
//!
//! ## Invariants
//! - Exceptions from user code never propagate into the pipeline; they
//!   come back to the caller as Exception-coded Error payloads.
//! - One `{instance, event, source}` triple owns at most one live
//!   forwarding registration; repeat subscriptions reuse it.

use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use axopipe::body::Body;
use axopipe::node;
use axopipe::node::Node;
use axopipe::node::NodeCore;
use axopipe::registry::SourceRegistry;
use axorpc::Envelope;
use axorpc::MessageType;
use axorpc::RpcErrorCode;
use axorpc::RpcPayload;

use crate::emitter::Emitter;
use crate::logger::LogService;
use crate::manage::ManageRpc;

/// Key identifying one event-forwarding registration.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct BridgeKey {
    instance: String,
    event: String,
    source: String,
}

/// A live forwarding registration: relays every local emission of one
/// event on one instance to one remote subscriber.
struct EventBridge {
    listener_id: u64,
}

pub struct ServerHandler {
    core: NodeCore,
    me: Weak<ServerHandler>,
    manage: Arc<ManageRpc>,
    bridges: DashMap<BridgeKey, EventBridge>,
}

impl ServerHandler {
    pub fn new(
        name: &str,
        registry: &Arc<SourceRegistry>,
        logger: Option<Arc<LogService>>,
    ) -> Arc<Self> {
        info!(name, "server handler starting");
        Arc::new_cyclic(|me| Self {
            core: NodeCore::new(name, Arc::clone(registry)),
            me: me.clone(),
            manage: ManageRpc::new(logger),
            bridges: DashMap::new(),
        })
    }

    /// The instance registry backing this handler.
    pub fn manage(&self) -> &Arc<ManageRpc> {
        &self.manage
    }

    /// Sends an Event payload to `target`, outside any call correlation.
    pub async fn send_event(&self, target: &str, event: &str, params: Vec<Value>) -> node::Result<()> {
        let payload = RpcPayload::Event {
            event: event.to_string(),
            params,
        };
        self.send_payload(payload, MessageType::Event, target).await
    }

    async fn receive_payload(&self, payload: RpcPayload, source: &str) {
        let RpcPayload::Call { id, path, method, params } = payload else {
            return;
        };
        let Some(callable) = self.manage.lookup(&path, &method) else {
            self.handle_missing(id, &path, &method, &params, source).await;
            return;
        };

        debug!(%path, %method, %source, "dispatching call");
        let (reply, kind) = match callable(params).await {
            Ok(result) => (RpcPayload::Success { id, result }, MessageType::Response),
            Err(exception) => (
                RpcPayload::Error {
                    id,
                    code: RpcErrorCode::Exception,
                    exception: Some(exception),
                },
                MessageType::Error,
            ),
        };
        if let Err(e) = self.send_payload(reply, kind, source).await {
            warn!(error = %e, "failed to send reply");
        }
    }

    /// A call to a method the namespace does not have: either the `on`
    /// subscription special case, or a MethodNotFound error.
    async fn handle_missing(
        &self,
        id: String,
        path: &str,
        method: &str,
        params: &[Value],
        source: &str,
    ) {
        if method == "on" {
            if let Some(event) = params.first().and_then(Value::as_str) {
                if let Some(service) = self.manage.instance(path) {
                    if let Some(emitter) = service.emitter() {
                        let ack = self.subscribe(path, event, source, emitter);
                        let reply = RpcPayload::Success { id, result: ack };
                        if let Err(e) = self.send_payload(reply, MessageType::Response, source).await {
                            warn!(error = %e, "failed to send subscription ack");
                        }
                        return;
                    }
                }
            }
        }
        debug!(%path, %method, "method not found");
        let reply = RpcPayload::Error {
            id,
            code: RpcErrorCode::MethodNotFound,
            exception: None,
        };
        if let Err(e) = self.send_payload(reply, MessageType::Error, source).await {
            warn!(error = %e, "failed to send error reply");
        }
    }

    /// Creates or reuses the event bridge for `{instance, event, source}`.
    /// Returns the acknowledgement value carried in the Success reply.
    fn subscribe(&self, instance: &str, event: &str, source: &str, emitter: &Emitter) -> Value {
        let key = BridgeKey {
            instance: instance.to_string(),
            event: event.to_string(),
            source: source.to_string(),
        };
        match self.bridges.entry(key) {
            Entry::Occupied(_) => Value::String("ok - already exists".into()),
            Entry::Vacant(slot) => {
                let handler = self.me.clone();
                let event_name = event.to_string();
                let target = source.to_string();
                let listener_id = emitter.on(
                    event,
                    Arc::new(move |params| {
                        let Some(handler) = handler.upgrade() else {
                            return;
                        };
                        let event_name = event_name.clone();
                        let target = target.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handler.send_event(&target, &event_name, params).await {
                                warn!(error = %e, "failed to forward event");
                            }
                        });
                    }),
                );
                slot.insert(EventBridge { listener_id });
                Value::String("ok".into())
            }
        }
    }

    async fn send_payload(
        &self,
        payload: RpcPayload,
        kind: MessageType,
        target: &str,
    ) -> node::Result<()> {
        let envelope = Envelope::new(kind, payload);
        let value =
            serde_json::to_value(&envelope).map_err(|e| node::Error::Convert(e.to_string()))?;
        self.send(Body::Value(value), self.name(), target).await
    }
}

#[async_trait]
impl Node for ServerHandler {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    async fn receive(&self, body: Body, source: &str, target: &str) -> node::Result<()> {
        let Body::Value(value) = body else {
            return Err(node::Error::UnexpectedBody {
                expected: "value",
                found: body.kind(),
            });
        };
        let envelope = match serde_json::from_value::<Envelope>(value) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "malformed envelope discarded");
                return Ok(());
            }
        };
        debug!(node = %self.name(), kind = ?envelope.kind, %source, %target, "received message");
        self.receive_payload(envelope.payload, source).await;
        Ok(())
    }

    /// Tears down every event bridge. Idempotent.
    async fn close(&self) {
        for entry in self.bridges.iter() {
            let key = entry.key();
            if let Some(service) = self.manage.instance(&key.instance) {
                if let Some(emitter) = service.emitter() {
                    emitter.off(&key.event, entry.value().listener_id);
                }
            }
        }
        self.bridges.clear();
    }
}
