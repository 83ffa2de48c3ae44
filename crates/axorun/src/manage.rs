//! # Instance Registry
//!
//! Manages the namespaces, classes and created instances a server exposes
//! for remote dispatch.
//!
//! ## Invariants
//! - Exposing under an existing name replaces that namespace's method map;
//!   last write wins.
//! - A created instance is exposed before its id becomes visible anywhere:
//!   there is no window where the id exists but is not callable.

use std::sync::Arc;
use std::sync::Weak;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use crate::logger::LogService;
use crate::service::Method;
use crate::service::MethodMap;
use crate::service::MethodResult;
use crate::service::Service;

/// Constructs a service instance from call parameters. The error value is
/// returned to the remote caller as an exception.
pub type Constructor =
    Arc<dyn Fn(Vec<Value>) -> std::result::Result<Arc<dyn Service>, Value> + Send + Sync>;

/// Namespace under which the manager's own operations are reachable.
pub const MANAGE_NAMESPACE: &str = "manageRpc";

/// Namespace under which a supplied logger is reachable.
pub const LOGGER_NAMESPACE: &str = "logger";

pub struct ManageRpc {
    namespaces: DashMap<String, MethodMap>,
    instances: DashMap<String, Arc<dyn Service>>,
    classes: DashMap<String, Constructor>,
    created: DashMap<String, Arc<dyn Service>>,
}

impl ManageRpc {
    /// Creates the registry. The manager's wire-safe operations are
    /// exposed under [`MANAGE_NAMESPACE`]; a supplied logger is exposed
    /// under [`LOGGER_NAMESPACE`].
    pub fn new(logger: Option<Arc<LogService>>) -> Arc<Self> {
        let manage = Arc::new(Self {
            namespaces: DashMap::new(),
            instances: DashMap::new(),
            classes: DashMap::new(),
            created: DashMap::new(),
        });
        manage.expose_management(Arc::downgrade(&manage));
        if let Some(logger) = logger {
            manage.expose_instance(logger, LOGGER_NAMESPACE);
        }
        manage
    }

    /// Registers the management operations that can cross the wire.
    /// The object-taking operations (exposing local instances) cannot be
    /// serialized and stay local-only.
    fn expose_management(&self, manage: Weak<Self>) {
        let map = MethodMap::new().with(
            "createRpcInstance",
            Arc::new(move |params: Vec<Value>| -> BoxFuture<'static, MethodResult> {
                let manage = manage.clone();
                Box::pin(async move {
                    let Some(manage) = manage.upgrade() else {
                        return Ok(Value::String(String::new()));
                    };
                    let mut params = params.into_iter();
                    let class_name = match params.next() {
                        Some(Value::String(name)) => name,
                        _ => return Err(Value::String("createRpcInstance: missing class name".into())),
                    };
                    let instance_name = match params.next() {
                        Some(Value::String(name)) if !name.is_empty() => Some(name),
                        _ => None,
                    };
                    let args: Vec<Value> = params.collect();
                    let id = manage
                        .create_rpc_instance(&class_name, instance_name.as_deref(), args)?
                        .unwrap_or_default();
                    Ok(Value::String(id))
                })
            }),
        );
        self.namespaces.insert(MANAGE_NAMESPACE.to_string(), map);
    }

    /// The callable registered for `method` under the namespace `path`.
    pub fn lookup(&self, path: &str, method: &str) -> Option<Method> {
        self.namespaces.get(path).and_then(|map| map.get(method))
    }

    /// The exposed instance registered under `name`, when there is one.
    pub fn instance(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.instances.get(name).map(|entry| entry.value().clone())
    }

    /// Exposes `service` under `name`, recording its full method map.
    /// Replaces any prior namespace of the same name.
    pub fn expose_instance(&self, service: Arc<dyn Service>, name: &str) {
        let map = Arc::clone(&service).methods();
        self.namespaces.insert(name.to_string(), map);
        self.instances.insert(name.to_string(), service);
    }

    /// Registers `constructor` for later instantiation under `name` (the
    /// class's own name, or an alias).
    pub fn expose_class(&self, name: &str, constructor: Constructor) {
        self.classes.insert(name.to_string(), constructor);
    }

    /// Exposes an ad hoc method map under `name`.
    pub fn expose_object(&self, map: MethodMap, name: &str) {
        self.namespaces.insert(name.to_string(), map);
    }

    /// Exposes a single callable under a namespace of its own name.
    pub fn expose(&self, name: &str, method: Method) {
        let mut map = self
            .namespaces
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        map.insert(name, method);
        self.namespaces.insert(name.to_string(), map);
    }

    /// Constructs a registered class and exposes the instance under
    /// `instance_name` or a generated id. The instance is callable before
    /// its id is recorded or returned. An unknown class yields `Ok(None)`;
    /// a constructor failure propagates as the exception value.
    pub fn create_rpc_instance(
        &self,
        class_name: &str,
        instance_name: Option<&str>,
        args: Vec<Value>,
    ) -> std::result::Result<Option<String>, Value> {
        let Some(constructor) = self.classes.get(class_name).map(|entry| entry.value().clone())
        else {
            return Ok(None);
        };
        let service = constructor(args)?;
        let id = instance_name
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.expose_instance(Arc::clone(&service), &id);
        self.created.insert(id.clone(), service);
        Ok(Some(id))
    }

    /// The created instance recorded under `id`.
    pub fn created_instance(&self, id: &str) -> Option<Arc<dyn Service>> {
        self.created.get(id).map(|entry| entry.value().clone())
    }
}
