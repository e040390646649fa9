//! Keyed broadcast subscriptions.
//!
//! Each registry maps a caller-chosen key to a handler. Registering an
//! existing key replaces its handler. The returned [`Subscription`] token only
//! removes the registration it created, so a stale token cannot drop a newer
//! handler that reused the key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use webrcon_core::message::CommandResponse;

/// Callback invoked with each routed message.
pub type MessageHandler = Arc<dyn Fn(&CommandResponse) + Send + Sync>;

struct SubscriptionEntry {
    token: u64,
    handler: MessageHandler,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, SubscriptionEntry>,
    next_token: u64,
}

/// One broadcast channel's subscribers.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` under `key`, replacing any previous handler.
    pub fn register<F>(&self, key: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&CommandResponse) + Send + Sync + 'static,
    {
        let key = key.into();
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = inner.next_token;
        inner.entries.insert(
            key.clone(),
            SubscriptionEntry {
                token,
                handler: Arc::new(handler),
            },
        );
        Subscription {
            key,
            token,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every handler with `message`. Returns how many ran.
    ///
    /// Handlers run after the registry lock is released, so they may
    /// subscribe or unsubscribe.
    pub fn dispatch(&self, message: &CommandResponse) -> usize {
        let handlers: Vec<MessageHandler> = self
            .lock()
            .entries
            .values()
            .map(|e| Arc::clone(&e.handler))
            .collect();
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }

    /// Remove whatever is registered under `key`.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unregister capability returned by [`SubscriptionRegistry::register`].
///
/// Dropping it leaves the handler registered.
#[derive(Debug)]
pub struct Subscription {
    key: String,
    token: u64,
    registry: Weak<Mutex<RegistryInner>>,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Remove this registration. Returns `false` if it was already removed,
    /// replaced by a newer registration under the same key, or cleared.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut inner = registry.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.entries.get(&self.key) {
            Some(entry) if entry.token == self.token => {
                inner.entries.remove(&self.key);
                true
            }
            _ => false,
        }
    }
}
