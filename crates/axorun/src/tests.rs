//! Tests for the protocol engine: emitter, registry, handlers.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;

use axopipe::body::Body;
use axopipe::node::Node;
use axopipe::node::NodeCore;
use axopipe::registry::SourceRegistry;
use axorpc::Envelope;
use axorpc::MessageType;
use axorpc::RpcErrorCode;
use axorpc::RpcPayload;

use crate::client::ClientHandler;
use crate::client::Error as ClientError;
use crate::emitter::Emitter;
use crate::manage::ManageRpc;
use crate::manage::MANAGE_NAMESPACE;
use crate::server::ServerHandler;
use crate::service::sync_method;
use crate::service::MethodMap;
use crate::service::Service;

/// Test node that records everything it receives.
struct Collector {
    core: NodeCore,
    received: Mutex<Vec<Body>>,
}

impl Collector {
    fn new(registry: &Arc<SourceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            core: NodeCore::new("", Arc::clone(registry)),
            received: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<Body> {
        self.received.lock().unwrap().clone()
    }

    fn envelopes(&self) -> Vec<Envelope> {
        self.received()
            .into_iter()
            .filter_map(|body| match body {
                Body::Value(value) => serde_json::from_value(value).ok(),
                _ => None,
            })
            .collect()
    }

    async fn wait_for_envelopes(&self, count: usize) -> Vec<Envelope> {
        for _ in 0..200 {
            let envelopes = self.envelopes();
            if envelopes.len() >= count {
                return envelopes;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("Expected {} envelopes, got {:?}", count, self.envelopes());
    }
}

#[async_trait]
impl Node for Collector {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    async fn receive(&self, body: Body, _source: &str, _target: &str) -> axopipe::node::Result<()> {
        self.received.lock().unwrap().push(body);
        Ok(())
    }
}

/// Test node that fails every delivery.
struct FailingNode {
    core: NodeCore,
}

#[async_trait]
impl Node for FailingNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    async fn receive(&self, _body: Body, _source: &str, _target: &str) -> axopipe::node::Result<()> {
        Err(axopipe::node::Error::Transport("deliberate failure".into()))
    }
}

/// Calculator fixture with an event emitter.
struct CalcService {
    base: i64,
    emitter: Emitter,
}

impl CalcService {
    fn new(base: i64) -> Arc<Self> {
        Arc::new(Self {
            base,
            emitter: Emitter::new(),
        })
    }
}

impl Service for CalcService {
    fn methods(self: Arc<Self>) -> MethodMap {
        let add = Arc::clone(&self);
        MethodMap::new()
            .with_sync("add", move |params| {
                let a = params.first().and_then(Value::as_i64).ok_or(json!("add: bad arguments"))?;
                let b = params.get(1).and_then(Value::as_i64).ok_or(json!("add: bad arguments"))?;
                Ok(json!(add.base + a + b))
            })
            .with_sync("fail", |_params| Err(json!("deliberate failure")))
            .with_sync("trigger", move |params| {
                self.emitter.emit("tick", &params);
                Ok(Value::Null)
            })
    }

    fn emitter(&self) -> Option<&Emitter> {
        Some(&self.emitter)
    }
}

fn registry() -> Arc<SourceRegistry> {
    Arc::new(SourceRegistry::new())
}

fn call_body(id: &str, path: &str, method: &str, params: Vec<Value>) -> Body {
    let envelope = Envelope::new(
        MessageType::Request,
        RpcPayload::Call {
            id: id.to_string(),
            path: path.to_string(),
            method: method.to_string(),
            params,
        },
    );
    Body::Value(serde_json::to_value(&envelope).unwrap())
}

// --- Emitter ---

#[test]
fn test_emitter_on_emit_off() {
    let emitter = Emitter::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let id = emitter.on("tick", Arc::new(move |params| sink.lock().unwrap().push(params)));

    assert_eq!(emitter.emit("tick", &[json!(1)]), 1);
    assert_eq!(emitter.emit("other", &[]), 0);
    assert_eq!(seen.lock().unwrap().len(), 1);

    assert!(emitter.off("tick", id));
    assert!(!emitter.off("tick", id));
    assert_eq!(emitter.emit("tick", &[json!(2)]), 0);
    assert_eq!(emitter.listener_count("tick"), 0);
}

// --- Method maps and the registry ---

#[tokio::test]
async fn test_method_map_sync_invocation() {
    let map = MethodMap::new().with_sync("double", |params| {
        let n = params.first().and_then(Value::as_i64).ok_or(json!("bad arguments"))?;
        Ok(json!(n * 2))
    });

    let method = map.get("double").expect("method missing");
    assert_eq!(method(vec![json!(21)]).await, Ok(json!(42)));
    assert!(map.get("missing").is_none());
}

#[tokio::test]
async fn test_manage_exposes_itself() {
    let manage = ManageRpc::new(None);
    assert!(manage.lookup(MANAGE_NAMESPACE, "createRpcInstance").is_some());
}

#[tokio::test]
async fn test_expose_instance_replaces_namespace() {
    let manage = ManageRpc::new(None);
    manage.expose_instance(CalcService::new(0), "calc");
    assert!(manage.lookup("calc", "add").is_some());

    // Re-exposing under the same name replaces the whole map.
    manage.expose_object(MethodMap::new().with_sync("only", |_| Ok(Value::Null)), "calc");
    assert!(manage.lookup("calc", "add").is_none());
    assert!(manage.lookup("calc", "only").is_some());
}

#[tokio::test]
async fn test_expose_single_callable() {
    let manage = ManageRpc::new(None);
    manage.expose("ping", sync_method(|_params| Ok(json!("pong"))));

    let method = manage.lookup("ping", "ping").expect("callable missing");
    assert_eq!(method(vec![]).await, Ok(json!("pong")));
}

#[tokio::test]
async fn test_create_rpc_instance() {
    let manage = ManageRpc::new(None);
    manage.expose_class(
        "Calc",
        Arc::new(|args| {
            let base = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(CalcService::new(base) as Arc<dyn Service>)
        }),
    );

    let id = manage
        .create_rpc_instance("Calc", Some("c1"), vec![json!(10)])
        .expect("constructor failed")
        .expect("class not found");
    assert_eq!(id, "c1");
    assert!(manage.lookup("c1", "add").is_some());
    assert!(manage.created_instance("c1").is_some());

    // Unknown classes yield the empty indicator, not an error.
    let missing = manage
        .create_rpc_instance("Ghost", None, vec![])
        .expect("unknown class must not fail");
    assert!(missing.is_none());

    // Generated ids are exposed too.
    let generated = manage
        .create_rpc_instance("Calc", None, vec![])
        .expect("constructor failed")
        .expect("class not found");
    assert!(manage.lookup(&generated, "add").is_some());
}

// --- Client handler ---

#[tokio::test]
async fn test_late_response_is_discarded() {
    let registry = registry();
    let handler = ClientHandler::new("client", &registry);

    let envelope = Envelope::new(
        MessageType::Response,
        RpcPayload::Success { id: "nobody-waits".into(), result: json!(1) },
    );
    handler
        .receive(Body::Value(serde_json::to_value(&envelope).unwrap()), "server", "client")
        .await
        .expect("late response must not error");
}

#[tokio::test]
async fn test_inbound_event_reaches_local_listeners() {
    let registry = registry();
    let handler = ClientHandler::new("client", &registry);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    handler.emitter().on("tick", Arc::new(move |params| sink.lock().unwrap().push(params)));

    let envelope = Envelope::new(
        MessageType::Event,
        RpcPayload::Event { event: "tick".into(), params: vec![json!(1), json!(2)] },
    );
    handler
        .receive(Body::Value(serde_json::to_value(&envelope).unwrap()), "server", "client")
        .await
        .expect("receive failed");

    assert_eq!(*seen.lock().unwrap(), vec![vec![json!(1), json!(2)]]);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_call_times_out() {
    let registry = registry();
    let handler = ClientHandler::new("client", &registry);
    // No downstream edges: the send succeeds trivially and nothing answers.

    let err = handler
        .call(None, "calc", "add", vec![json!(1)])
        .await
        .expect_err("expected timeout");
    assert!(matches!(err, ClientError::CallTimeout));
}

#[tokio::test]
async fn test_send_failure_reports_directly() {
    let registry = registry();
    let handler = ClientHandler::new("client", &registry);
    let failing = Arc::new(FailingNode { core: NodeCore::new("", Arc::clone(&registry)) });
    handler.pipe(failing);

    let err = handler
        .call(None, "calc", "add", vec![json!(1)])
        .await
        .expect_err("expected send failure");
    assert!(matches!(err, ClientError::Send(_)));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_use_distinct_ids() {
    let registry = registry();
    let handler = ClientHandler::new("client", &registry);
    let outbound = Collector::new(&registry);
    handler.pipe(outbound.clone());

    let h1 = Arc::clone(&handler);
    let h2 = Arc::clone(&handler);
    let first = tokio::spawn(async move { h1.call(None, "calc", "add", vec![]).await });
    let second = tokio::spawn(async move { h2.call(None, "calc", "add", vec![]).await });
    let _ = first.await;
    let _ = second.await;

    let ids: Vec<String> = outbound
        .envelopes()
        .into_iter()
        .filter_map(|envelope| envelope.payload.id().map(str::to_string))
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn test_unrecognized_response_shape_rejects_pending_call() {
    let registry = registry();
    let handler = ClientHandler::new("client", &registry);
    let outbound = Collector::new(&registry);
    handler.pipe(outbound.clone());

    let caller = Arc::clone(&handler);
    let call = tokio::spawn(async move { caller.call(None, "calc", "add", vec![]).await });

    // Recover the generated correlation id from the outbound frame, then
    // answer with a payload shape the protocol does not know.
    let sent = outbound.wait_for_envelopes(1).await;
    let id = sent[0].payload.id().expect("call must carry an id").to_string();
    let bogus = json!({
        "type": "RESPONSE",
        "payload": { "type": "SOMETHING_ELSE", "id": id },
    });
    handler
        .receive(Body::Value(bogus), "server", "client")
        .await
        .expect("receive failed");

    let err = call.await.expect("task failed").expect_err("expected rejection");
    match err {
        ClientError::InvalidResponse(kind) => assert_eq!(kind, "SOMETHING_ELSE"),
        other => panic!("Expected InvalidResponse, got {:?}", other),
    }
}

// --- Server handler ---

#[tokio::test]
async fn test_dispatch_success() {
    let registry = registry();
    let handler = ServerHandler::new("server", &registry, None);
    let outbound = Collector::new(&registry);
    handler.pipe(outbound.clone());
    handler.manage().expose_instance(CalcService::new(0), "calc");

    handler
        .receive(call_body("c-1", "calc", "add", vec![json!(5), json!(6)]), "client", "server")
        .await
        .expect("receive failed");

    let envelopes = outbound.wait_for_envelopes(1).await;
    assert_eq!(envelopes[0].kind, MessageType::Response);
    assert_eq!(
        envelopes[0].payload,
        RpcPayload::Success { id: "c-1".into(), result: json!(11) }
    );
}

#[tokio::test]
async fn test_dispatch_method_not_found() {
    let registry = registry();
    let handler = ServerHandler::new("server", &registry, None);
    let outbound = Collector::new(&registry);
    handler.pipe(outbound.clone());

    handler
        .receive(call_body("c-2", "ghost", "add", vec![]), "client", "server")
        .await
        .expect("receive failed");

    let envelopes = outbound.wait_for_envelopes(1).await;
    match &envelopes[0].payload {
        RpcPayload::Error { code, .. } => assert_eq!(*code, RpcErrorCode::MethodNotFound),
        other => panic!("Expected Error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dispatch_wraps_exceptions_and_stays_responsive() {
    let registry = registry();
    let handler = ServerHandler::new("server", &registry, None);
    let outbound = Collector::new(&registry);
    handler.pipe(outbound.clone());
    handler.manage().expose_instance(CalcService::new(0), "calc");

    handler
        .receive(call_body("c-3", "calc", "fail", vec![]), "client", "server")
        .await
        .expect("receive failed");

    let envelopes = outbound.wait_for_envelopes(1).await;
    assert_eq!(
        envelopes[0].payload,
        RpcPayload::Error {
            id: "c-3".into(),
            code: RpcErrorCode::Exception,
            exception: Some(json!("deliberate failure")),
        }
    );

    // The handler keeps dispatching after a user exception.
    handler
        .receive(call_body("c-4", "calc", "add", vec![json!(2), json!(3)]), "client", "server")
        .await
        .expect("receive failed");
    let envelopes = outbound.wait_for_envelopes(2).await;
    assert_eq!(
        envelopes[1].payload,
        RpcPayload::Success { id: "c-4".into(), result: json!(5) }
    );
}

#[tokio::test]
async fn test_duplicate_subscription_reuses_the_bridge() {
    let registry = registry();
    let handler = ServerHandler::new("server", &registry, None);
    let outbound = Collector::new(&registry);
    handler.pipe(outbound.clone());

    let calc = CalcService::new(0);
    handler.manage().expose_instance(calc.clone(), "calc");

    handler
        .receive(call_body("s-1", "calc", "on", vec![json!("tick")]), "client", "server")
        .await
        .expect("receive failed");
    handler
        .receive(call_body("s-2", "calc", "on", vec![json!("tick")]), "client", "server")
        .await
        .expect("receive failed");

    let envelopes = outbound.wait_for_envelopes(2).await;
    assert_eq!(
        envelopes[0].payload,
        RpcPayload::Success { id: "s-1".into(), result: json!("ok") }
    );
    assert_eq!(
        envelopes[1].payload,
        RpcPayload::Success { id: "s-2".into(), result: json!("ok - already exists") }
    );
    // One live forwarding registration, not two.
    assert_eq!(calc.emitter.listener_count("tick"), 1);

    // A single emission forwards exactly one Event payload.
    calc.emitter.emit("tick", &[json!(7)]);
    let envelopes = outbound.wait_for_envelopes(3).await;
    assert_eq!(envelopes.len(), 3);
    assert_eq!(
        envelopes[2].payload,
        RpcPayload::Event { event: "tick".into(), params: vec![json!(7)] }
    );
}

#[tokio::test]
async fn test_subscription_to_instance_without_emitter_fails() {
    let registry = registry();
    let handler = ServerHandler::new("server", &registry, None);
    let outbound = Collector::new(&registry);
    handler.pipe(outbound.clone());
    handler
        .manage()
        .expose_object(MethodMap::new().with_sync("noop", |_| Ok(Value::Null)), "plain");

    handler
        .receive(call_body("s-3", "plain", "on", vec![json!("tick")]), "client", "server")
        .await
        .expect("receive failed");

    let envelopes = outbound.wait_for_envelopes(1).await;
    match &envelopes[0].payload {
        RpcPayload::Error { code, .. } => assert_eq!(*code, RpcErrorCode::MethodNotFound),
        other => panic!("Expected Error, got {:?}", other),
    }
}
