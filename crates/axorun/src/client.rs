//! # Client Handler
//!
//! Builds call payloads, correlates responses with pending calls, and
//! relays inbound events to local listeners.
//!
//! ## Call lifecycle
//!
//! Pending (id registered, timeout armed) transitions to exactly one of
//! Resolved, Rejected or TimedOut. The pending entry and its timeout are
//! always cleared together; a response whose id matches nothing (late or
//! duplicate delivery) is discarded without effect.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

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
use crate::emitter::Listener;

/// How long a call may stay unanswered before it is rejected locally.
pub const CALL_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Target used when the caller names no remote.
pub const DEFAULT_TARGET: &str = "*";

#[derive(Debug)]
pub enum Error {
    /// The call payload could not be sent. No pending entry was created.
    Send(node::Error),
    /// No response arrived within [`CALL_TIMEOUT`].
    CallTimeout,
    /// The server answered with an Error payload.
    Rejected {
        code: RpcErrorCode,
        exception: Option<Value>,
    },
    /// The response payload had an unrecognized shape.
    InvalidResponse(String),
    /// The handler went away before the call settled.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send(e) => write!(f, "Send error: {}", e),
            Self::CallTimeout => write!(f, "Call timeout"),
            Self::Rejected { code, .. } => write!(f, "Call rejected: {}", code),
            Self::InvalidResponse(kind) => write!(f, "Invalid response type: {}", kind),
            Self::Closed => write!(f, "Client handler closed"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Correlates outbound calls with inbound responses.
pub struct ClientHandler {
    core: NodeCore,
    me: Weak<ClientHandler>,
    emitter: Emitter,
    pending: DashMap<String, oneshot::Sender<Result<Value>>>,
    timeouts: DashMap<String, JoinHandle<()>>,
}

impl ClientHandler {
    pub fn new(name: &str, registry: &Arc<SourceRegistry>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            core: NodeCore::new(name, Arc::clone(registry)),
            me: me.clone(),
            emitter: Emitter::new(),
            pending: DashMap::new(),
            timeouts: DashMap::new(),
        })
    }

    /// The relay local event listeners attach to. Inbound Event payloads
    /// are dispatched here.
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Calls `method` on the remote instance `path`, resolving with the
    /// carried result or rejecting with the carried error.
    ///
    /// The pending entry is registered only after the send completes; a
    /// send failure surfaces directly and leaves no bookkeeping behind.
    pub async fn call(
        &self,
        remote: Option<&str>,
        path: &str,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let payload = RpcPayload::Call {
            id: id.clone(),
            path: path.to_string(),
            method: method.to_string(),
            params,
        };
        let target = remote.unwrap_or(DEFAULT_TARGET);
        self.send_payload(payload, MessageType::Request, target)
            .await
            .map_err(Error::Send)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        self.arm_timeout(id);

        rx.await.unwrap_or(Err(Error::Closed))
    }

    /// Binds a capability handle to the named remote instance.
    pub fn proxy(&self, name: &str, remote: Option<&str>) -> Proxy {
        Proxy {
            handler: self.me.clone(),
            name: name.to_string(),
            remote: remote.map(str::to_string),
        }
    }

    fn arm_timeout(&self, id: String) {
        let handler = self.me.clone();
        let timeout_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(CALL_TIMEOUT).await;
            let Some(handler) = handler.upgrade() else {
                return;
            };
            handler.timeouts.remove(&timeout_id);
            if let Some((_, tx)) = handler.pending.remove(&timeout_id) {
                let _ = tx.send(Err(Error::CallTimeout));
            }
        });
        self.timeouts.insert(id, handle);
    }

    /// Settles the pending call for `id`. Removes the entry and its
    /// timeout together; an unknown id is discarded without effect.
    fn settle(&self, id: &str, outcome: Result<Value>) {
        if let Some((_, handle)) = self.timeouts.remove(id) {
            handle.abort();
        }
        match self.pending.remove(id) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
            }
            None => debug!(%id, "response for unknown call discarded"),
        }
    }

    fn dispatch(&self, payload: RpcPayload) {
        match payload {
            RpcPayload::Event { event, params } => {
                let delivered = self.emitter.emit(&event, &params);
                debug!(%event, delivered, "event relayed to local listeners");
            }
            RpcPayload::Success { id, result } => self.settle(&id, Ok(result)),
            RpcPayload::Error { id, code, exception } if !id.is_empty() => {
                self.settle(&id, Err(Error::Rejected { code, exception }));
            }
            RpcPayload::Error { code, .. } => {
                warn!(%code, "uncorrelated error response discarded");
            }
            RpcPayload::Call { .. } => warn!("call payload received on the client side; discarded"),
        }
    }

    /// A response whose payload shape is unrecognized still rejects its
    /// pending call when a correlation id can be recovered from it.
    fn reject_unknown(&self, value: &Value) {
        let payload = value.get("payload");
        let kind = payload
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .unwrap_or("<unknown>");
        match payload.and_then(|p| p.get("id")).and_then(Value::as_str) {
            Some(id) => self.settle(id, Err(Error::InvalidResponse(kind.to_string()))),
            None => warn!(kind, "unrecognized payload shape discarded"),
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
impl Node for ClientHandler {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    async fn receive(&self, body: Body, _source: &str, _target: &str) -> node::Result<()> {
        let Body::Value(value) = body else {
            return Err(node::Error::UnexpectedBody {
                expected: "value",
                found: body.kind(),
            });
        };
        match serde_json::from_value::<Envelope>(value.clone()) {
            Ok(envelope) => self.dispatch(envelope.payload),
            Err(_) => self.reject_unknown(&value),
        }
        Ok(())
    }

    async fn close(&self) {
        for entry in self.timeouts.iter() {
            entry.value().abort();
        }
        self.timeouts.clear();
        let ids: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(Error::Closed));
            }
        }
    }
}

/// A capability handle bound to a named remote instance.
///
/// `invoke` forwards any method call; `on` covers the event-registration
/// vocabulary, registering a local relay and issuing the remote
/// subscription in one step. Typed wrappers layer over `invoke`.
#[derive(Clone)]
pub struct Proxy {
    handler: Weak<ClientHandler>,
    name: String,
    remote: Option<String>,
}

impl Proxy {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn handler(&self) -> Result<Arc<ClientHandler>> {
        self.handler.upgrade().ok_or(Error::Closed)
    }

    /// Calls `method` on the remote instance this proxy is bound to.
    pub async fn invoke(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.handler()?
            .call(self.remote.as_deref(), &self.name, method, params)
            .await
    }

    /// Registers `listener` for `event` locally and subscribes remotely.
    /// Returns the local listener id and the server's acknowledgement.
    pub async fn on(&self, event: &str, listener: Listener) -> Result<(u64, Value)> {
        let listener_id = self.handler()?.emitter().on(event, listener);
        let ack = self
            .invoke("on", vec![Value::String(event.to_string())])
            .await?;
        Ok((listener_id, ack))
    }

    /// Removes a local relay previously registered by [`Proxy::on`].
    pub fn off(&self, event: &str, listener_id: u64) -> bool {
        self.handler()
            .map(|handler| handler.emitter().off(event, listener_id))
            .unwrap_or(false)
    }
}
