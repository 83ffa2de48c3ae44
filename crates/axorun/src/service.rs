//! # Service Exposure
//!
//! Explicit capability exposure: a service states the methods it offers as
//! a name-to-callable map, and optionally the emitter its events are
//! published on. This is the registration surface the instance registry
//! consumes; nothing is discovered by introspection.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::emitter::Emitter;

/// The outcome of an exposed method: a result value, or the raised
/// exception value that the dispatcher wraps into an Error payload.
pub type MethodResult = std::result::Result<Value, Value>;

/// An exposed callable.
pub type Method = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync>;

/// An explicit mapping from method name to callable.
#[derive(Clone, Default)]
pub struct MethodMap {
    methods: HashMap<String, Method>,
}

impl MethodMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callable under `name`, replacing any prior entry.
    pub fn insert(&mut self, name: &str, method: Method) {
        self.methods.insert(name.to_string(), method);
    }

    /// Builder-style registration of an async callable.
    pub fn with(mut self, name: &str, method: Method) -> Self {
        self.insert(name, method);
        self
    }

    /// Builder-style registration of a synchronous callable.
    pub fn with_sync<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        self.with(name, sync_method(f))
    }

    pub fn get(&self, name: &str) -> Option<Method> {
        self.methods.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Wraps a synchronous function as an exposed callable.
pub fn sync_method<F>(f: F) -> Method
where
    F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |params| -> BoxFuture<'static, MethodResult> {
        let f = Arc::clone(&f);
        Box::pin(async move { f(params) })
    })
}

/// A type whose instances can be exposed for remote dispatch.
pub trait Service: Send + Sync + 'static {
    /// The full callable surface of this instance.
    fn methods(self: Arc<Self>) -> MethodMap;

    /// The emitter this instance publishes events on. Instances without
    /// one cannot be subscribed to.
    fn emitter(&self) -> Option<&Emitter> {
        None
    }
}
