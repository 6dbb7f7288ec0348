// Handler registries and the outbound target set
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;

use crate::channel::PostTarget;

/// Error type handlers report failures with
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback for fire-and-forget events
pub type EventHandler = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

/// Callback answering a request. `Ok(None)` means "nothing to say" and is
/// answered with an `unhandled` status.
pub type RequestHandler =
    Arc<dyn Fn(Value) -> Result<Option<Value>, HandlerError> + Send + Sync>;

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    fn next() -> Self {
        Self(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// `event name -> handlers`, in registration order. Several handlers per
/// name are all invoked.
#[derive(Default)]
pub(crate) struct EventHandlers {
    handlers: DashMap<String, Vec<(HandlerId, EventHandler)>>,
}

impl EventHandlers {
    pub fn add(&self, event_name: &str, handler: EventHandler) -> HandlerId {
        let id = HandlerId::next();
        self.handlers
            .entry(event_name.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes one handler, or every handler for the name when `id` is `None`.
    /// Returns how many handlers were removed.
    pub fn remove(&self, event_name: &str, id: Option<HandlerId>) -> usize {
        match id {
            None => self
                .handlers
                .remove(event_name)
                .map(|(_, v)| v.len())
                .unwrap_or(0),
            Some(id) => {
                let removed = match self.handlers.get_mut(event_name) {
                    Some(mut list) => {
                        let before = list.len();
                        list.retain(|(h, _)| *h != id);
                        before - list.len()
                    }
                    None => 0,
                };
                self.handlers.remove_if(event_name, |_, list| list.is_empty());
                removed
            }
        }
    }

    /// Snapshot of the handlers for a name. Cloned out so callbacks may
    /// register or remove handlers while running.
    pub fn snapshot(&self, event_name: &str) -> Vec<EventHandler> {
        self.handlers
            .get(event_name)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}

#[derive(Clone)]
struct RequestEntry {
    id: HandlerId,
    once: bool,
    handler: RequestHandler,
}

/// `request name -> handler`. A second registration replaces the first.
#[derive(Default)]
pub(crate) struct RequestHandlers {
    handlers: DashMap<String, RequestEntry>,
}

impl RequestHandlers {
    pub fn set(&self, event_name: &str, handler: RequestHandler) -> HandlerId {
        self.insert(event_name, handler, false)
    }

    /// Registers a handler that is unregistered after its first invocation.
    pub fn set_once(&self, event_name: &str, handler: RequestHandler) -> HandlerId {
        self.insert(event_name, handler, true)
    }

    fn insert(&self, event_name: &str, handler: RequestHandler, once: bool) -> HandlerId {
        let id = HandlerId::next();
        self.handlers
            .insert(event_name.to_string(), RequestEntry { id, once, handler });
        id
    }

    pub fn remove(&self, event_name: &str) -> bool {
        self.handlers.remove(event_name).is_some()
    }

    /// Handler to run for `event_name`. A one-shot handler is unregistered
    /// here, before it runs.
    pub fn take_for_call(&self, event_name: &str) -> Option<RequestHandler> {
        let entry = self.handlers.get(event_name)?.value().clone();
        if entry.once {
            // A replacement registered in the meantime must survive.
            self.handlers
                .remove_if(event_name, |_, current| current.id == entry.id);
        }
        Some(entry.handler)
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}

/// Windows outbound envelopes are broadcast to. Membership is by handle
/// identity; adding a handle twice is a no-op.
#[derive(Default)]
pub(crate) struct TargetSet {
    targets: RwLock<Vec<Arc<dyn PostTarget>>>,
}

impl TargetSet {
    pub fn add(&self, target: Arc<dyn PostTarget>) -> bool {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        if targets.iter().any(|t| same_target(t, &target)) {
            return false;
        }
        targets.push(target);
        true
    }

    pub fn remove(&self, target: &Arc<dyn PostTarget>) -> bool {
        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        let before = targets.len();
        targets.retain(|t| !same_target(t, target));
        targets.len() != before
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn PostTarget>> {
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.targets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn clear(&self) {
        self.targets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

// Compare data pointers only; vtable pointers of the same type may differ
// across codegen units.
fn same_target(a: &Arc<dyn PostTarget>, b: &Arc<dyn PostTarget>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
