//! Event registry mapping an event tag to its ordered subscribers

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
};
use tracing::{error, warn};

type Handler<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// Identifies a subscription so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registry<K, E> {
    next_id: u64,
    handlers: HashMap<K, Vec<(SubscriptionId, Handler<E>)>>,
}

/// Subscribers are invoked in registration order. A failing or panicking
/// subscriber is logged and skipped; the remaining ones still run.
pub struct EventBus<K, E> {
    registry: Mutex<Registry<K, E>>,
}

impl<K, E> EventBus<K, E>
where
    K: Eq + Hash + Copy + Debug,
{
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_id: 0,
                handlers: HashMap::new(),
            }),
        }
    }

    pub fn on<F>(&self, kind: K, handler: F) -> SubscriptionId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut registry = match self.registry.lock() {
            Ok(registry) => registry,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscriber; returns false if it was not registered
    pub fn off(&self, kind: K, id: SubscriptionId) -> bool {
        let Ok(mut registry) = self.registry.lock() else {
            return false;
        };
        let Some(list) = registry.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        list.len() != before
    }

    /// Invoke every subscriber of `kind`; returns how many succeeded
    pub fn emit(&self, kind: K, event: &E) -> usize {
        // Snapshot so handlers may subscribe or unsubscribe while running
        let handlers: Vec<Handler<E>> = match self.registry.lock() {
            Ok(registry) => registry
                .handlers
                .get(&kind)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default(),
            Err(e) => {
                error!("Event registry poisoned while emitting {:?}: {}", kind, e);
                return 0;
            }
        };

        let mut succeeded = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => warn!("Event handler for {:?} failed: {:#}", kind, e),
                Err(_) => error!("Event handler for {:?} panicked", kind),
            }
        }
        succeeded
    }

    pub fn subscriber_count(&self, kind: K) -> usize {
        self.registry
            .lock()
            .map(|r| r.handlers.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.handlers.clear();
        }
    }
}

impl<K, E> Default for EventBus<K, E>
where
    K: Eq + Hash + Copy + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
