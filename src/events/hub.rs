use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lock;

/// An event that can be routed through an [`EventHub`].
///
/// The kind is the routing key: handlers subscribe to a kind and receive every
/// published event whose `kind()` equals it.
pub trait Event: Send + Sync + 'static {
    type Kind: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Handle returned by every subscribe call, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscription<E> {
    id: SubscriptionId,
    handler: Handler<E>,
    once: bool,
    fired: AtomicBool,
}

/// Synchronous, in-order publish/subscribe registry.
///
/// Handlers run on the publishing caller's thread, in subscription order.
/// `publish` takes a snapshot of the kind's handler list before delivering,
/// so a handler may subscribe or unsubscribe (itself or others) without
/// affecting the pass already in progress: every handler in the snapshot is
/// still invoked, except `subscribe_once` handlers that already fired.
pub struct EventHub<E: Event> {
    handlers: Mutex<HashMap<E::Kind, Vec<Arc<Subscription<E>>>>>,
}

impl<E: Event> EventHub<E> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for every event of `kind`.
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(kind, Arc::new(handler), false)
    }

    /// Register a handler that is removed right before its first delivery.
    pub fn subscribe_once<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(kind, Arc::new(handler), true)
    }

    fn insert(&self, kind: E::Kind, handler: Handler<E>, once: bool) -> SubscriptionId {
        let id = SubscriptionId::new();
        let subscription = Arc::new(Subscription {
            id,
            handler,
            once,
            fired: AtomicBool::new(false),
        });
        lock(&self.handlers).entry(kind).or_default().push(subscription);
        id
    }

    /// Remove one subscription. Returns false if the handle is unknown
    /// (already removed, or a fired once-handler).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = lock(&self.handlers);
        let mut emptied = None;
        let mut removed = false;
        for (kind, list) in handlers.iter_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                removed = true;
                if list.is_empty() {
                    emptied = Some(kind.clone());
                }
                break;
            }
        }
        if let Some(kind) = emptied {
            handlers.remove(&kind);
        }
        removed
    }

    /// Remove every handler of `kind`, or every handler of every kind.
    pub fn unsubscribe_all(&self, kind: Option<&E::Kind>) {
        let mut handlers = lock(&self.handlers);
        match kind {
            Some(kind) => {
                handlers.remove(kind);
            }
            None => handlers.clear(),
        }
    }

    /// Deliver `event` to the handlers of its kind.
    ///
    /// Returns whether any handler was actually called. A once-handler that
    /// another publisher got to first does not count.
    pub fn publish(&self, event: &E) -> bool {
        let snapshot = {
            let handlers = lock(&self.handlers);
            match handlers.get(&event.kind()) {
                Some(list) if !list.is_empty() => list.clone(),
                _ => return false,
            }
        };

        let mut delivered = false;
        for subscription in &snapshot {
            if subscription.once {
                if subscription.fired.swap(true, Ordering::AcqRel) {
                    continue;
                }
                self.unsubscribe(subscription.id);
            }
            delivered = true;
            (subscription.handler)(event);
        }
        delivered
    }

    pub fn handler_count(&self, kind: &E::Kind) -> usize {
        lock(&self.handlers).get(kind).map_or(0, Vec::len)
    }

    pub fn has_handlers(&self, kind: &E::Kind) -> bool {
        self.handler_count(kind) > 0
    }
}

impl<E: Event> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = lock(&self.handlers);
        let mut map = f.debug_map();
        for (kind, list) in handlers.iter() {
            map.entry(kind, &list.len());
        }
        map.finish()
    }
}
