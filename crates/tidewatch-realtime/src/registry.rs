//! Named-event listener registry.
//!
//! The registry is owned by the client, not the transport, so listeners
//! outlive any number of reconnects.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::error;

/// Callback handle. Clones share identity.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&Value) + Send + Sync>);

impl Listener {
    /// Wrap a callback.
    pub fn new(f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, data: &Value) {
        (self.0)(data);
    }

    /// Whether both handles refer to the same callback.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Listener")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Map from event name to an ordered set of listeners.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event`. Returns `false` if it was already there.
    pub fn add(&self, event: &str, listener: Listener) -> bool {
        let mut map = self.listeners.lock();
        let entry = map.entry(event.to_owned()).or_default();
        if entry.iter().any(|l| l.same(&listener)) {
            return false;
        }
        entry.push(listener);
        true
    }

    /// Unregister `listener` from `event`. Returns `false` if it was not there.
    pub fn remove(&self, event: &str, listener: &Listener) -> bool {
        let mut map = self.listeners.lock();
        let Some(entry) = map.get_mut(event) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|l| !l.same(listener));
        let removed = entry.len() != before;
        if entry.is_empty() {
            let _ = map.remove(event);
        }
        removed
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.lock().get(event).map_or(0, Vec::len)
    }

    /// Deliver `data` to every listener of `event` in registration order.
    ///
    /// Listeners run outside the lock, so they may register or remove
    /// listeners themselves. A panicking listener is logged and skipped.
    /// Returns how many listeners ran to completion.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        let snapshot = match self.listeners.lock().get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut completed = 0;
        for listener in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.call(data))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    error!(event, panic = panic_message(&*panic), "event listener panicked");
                }
            }
        }
        completed
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
