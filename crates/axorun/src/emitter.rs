//! # Event Emitter
//!
//! In-process event registry: named events, each with a list of listeners.
//! Services publish their events through an emitter; the client handler
//! relays inbound remote events through one.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// A registered event listener.
pub type Listener = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

#[derive(Default)]
pub struct Emitter {
    next_id: AtomicU64,
    listeners: DashMap<String, Vec<(u64, Listener)>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for `event`. The returned id removes it again
    /// through [`off`].
    ///
    /// [`off`]: Emitter::off
    pub fn on(&self, event: &str, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Removes a listener. Returns whether it was present.
    pub fn off(&self, event: &str, id: u64) -> bool {
        let Some(mut entry) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(listener_id, _)| *listener_id != id);
        before != entry.len()
    }

    /// Calls every listener registered for `event` with `params`. Returns
    /// the number of listeners invoked.
    pub fn emit(&self, event: &str, params: &[Value]) -> usize {
        let snapshot: Vec<Listener> = match self.listeners.get(event) {
            Some(entry) => entry.iter().map(|(_, listener)| Arc::clone(listener)).collect(),
            None => return 0,
        };
        for listener in &snapshot {
            listener(params.to_vec());
        }
        snapshot.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map(|entry| entry.len()).unwrap_or(0)
    }
}
