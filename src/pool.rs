//! Fan-out of live updates to a dynamic set of subscribers
//!
//! A pool is generic over its payload, so each topic (camera, config) gets
//! its own strongly typed pool. `update` runs every subscriber callback
//! synchronously before returning. Callbacks run outside the registration
//! lock, so a callback may delete its own subscription (the usual reaction
//! to a dead socket) without deadlocking the pool.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

type Callback<T> = Arc<dyn Fn(&T, &Subscription<T>) + Send + Sync>;

struct PoolInner<T> {
    subscribers: Mutex<HashMap<Uuid, Callback<T>>>,
}

/// Broadcast pool for one payload type
pub struct BroadcastPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for BroadcastPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for BroadcastPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BroadcastPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastPool")
            .field("subscribers", &self.count())
            .finish()
    }
}

impl<T> BroadcastPool<T> {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a subscriber.
    ///
    /// The callback receives every payload passed to [`update`](Self::update)
    /// along with its own subscription handle. It must not block: hand the
    /// payload to a channel or task and return.
    pub fn create<F>(&self, callback: F) -> Subscription<T>
    where
        F: Fn(&T, &Subscription<T>) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.inner.subscribers.lock().insert(id, Arc::new(callback));
        tracing::debug!("Pool subscriber {} created", id);

        Subscription {
            id,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `payload` to every registered subscriber exactly once.
    ///
    /// Returns the number of callbacks invoked.
    pub fn update(&self, payload: &T) -> usize {
        let subscribers: Vec<(Uuid, Callback<T>)> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in &subscribers {
            let handle = Subscription {
                id: *id,
                pool: Arc::downgrade(&self.inner),
            };
            callback(payload, &handle);
        }

        subscribers.len()
    }

    /// Number of registered subscribers
    pub fn count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Log and return the number of registered subscribers
    pub fn log_count(&self) -> usize {
        let count = self.count();
        tracing::info!("Number of pool subscribers: {}", count);
        count
    }
}

/// Handle to one registered subscriber
pub struct Subscription<T> {
    id: Uuid,
    pool: Weak<PoolInner<T>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            pool: Weak::clone(&self.pool),
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl<T> Subscription<T> {
    /// Remove this subscriber from its pool.
    ///
    /// Returns `true` if the subscriber was still registered. Deleting twice,
    /// or after the pool is gone, is a no-op.
    pub fn delete(&self) -> bool {
        let Some(pool) = self.pool.upgrade() else {
            return false;
        };

        let removed = pool.subscribers.lock().remove(&self.id).is_some();
        if removed {
            tracing::debug!("Pool subscriber {} deleted", self.id);
        }
        removed
    }

    /// Whether this subscriber is still registered
    pub fn is_active(&self) -> bool {
        self.pool
            .upgrade()
            .map(|pool| pool.subscribers.lock().contains_key(&self.id))
            .unwrap_or(false)
    }
}
