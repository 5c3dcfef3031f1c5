//! Listener registry for session events
//!
//! Each consumer gets its own queue. The [`Subscription`] handle is the
//! disposer: dropping it, or calling [`Subscription::unsubscribe`], removes the
//! listener so no further events are queued for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

struct Listeners<E> {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<E>>,
}

/// Fan-out of events to independent consumers
pub struct Subscribers<E> {
    inner: Arc<Mutex<Listeners<E>>>,
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                senders: HashMap::new(),
            })),
        }
    }
}

impl<E: Clone> Subscribers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = match self.inner.lock() {
            Ok(mut listeners) => {
                let id = listeners.next_id;
                listeners.next_id += 1;
                listeners.senders.insert(id, tx);
                id
            }
            Err(_) => {
                tracing::error!("Subscriber registry poisoned");
                u64::MAX
            }
        };

        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Queue `event` for every listener, returning how many received it
    pub fn emit(&self, event: E) -> usize {
        let Ok(mut listeners) = self.inner.lock() else {
            return 0;
        };
        // Receivers dropped without going through the handle are pruned here
        listeners
            .senders
            .retain(|_, tx| tx.send(event.clone()).is_ok());
        listeners.senders.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|l| l.senders.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One consumer's handle and event queue
pub struct Subscription<E> {
    id: u64,
    registry: Weak<Mutex<Listeners<E>>>,
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> Subscription<E> {
    /// Next event; `None` once the source has shut down
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Next already-queued event, if any
    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut listeners) = registry.lock() {
                listeners.senders.remove(&self.id);
            }
        }
    }
}
