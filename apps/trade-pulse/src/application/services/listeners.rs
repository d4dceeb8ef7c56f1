//! Listener Registry
//!
//! Ordered list of callbacks. Every registered listener is invoked for every
//! notification, in registration order, and a failing listener never stops
//! the ones after it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::infrastructure::metrics;

/// Handle returned on registration, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

/// Ordered registry of listeners for notifications of type `T`.
pub struct ListenerRegistry<T: ?Sized> {
    kind: &'static str,
    listeners: RwLock<Vec<(ListenerId, Listener<T>)>>,
}

impl<T: ?Sized> ListenerRegistry<T> {
    /// Create an empty registry. `kind` labels log lines and metrics.
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Append a listener.
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered here.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Invoke every listener with `value`.
    ///
    /// Listeners run outside the registry lock, so they may register or
    /// remove listeners themselves. Errors and panics are logged and
    /// swallowed. Returns the number of listeners that failed.
    pub fn notify(&self, value: &T) -> usize {
        let snapshot: Vec<Listener<T>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut failures = 0;
        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    metrics::record_listener_failure(self.kind);
                    tracing::error!(kind = self.kind, error = %e, "Listener failed");
                }
                Err(_) => {
                    failures += 1;
                    metrics::record_listener_failure(self.kind);
                    tracing::error!(kind = self.kind, "Listener panicked");
                }
            }
        }
        failures
    }
}

impl<T: ?Sized> std::fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}
