//! Per-registry observer list
//!
//! Listeners are compared by `Arc` identity. Notification always iterates a
//! copied snapshot, so a listener may add or remove listeners (including
//! itself) from inside a callback.

use crate::error::{RegistryError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct ListenerSet<L: ?Sized> {
    registry: &'static str,
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new(registry: &'static str) -> Self {
        Self {
            registry,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener; the same instance twice is a programmer error
    pub fn add(&self, listener: Arc<L>) -> Result<()> {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|existing| same(existing, &listener)) {
            return Err(RegistryError::duplicate_listener(self.registry));
        }
        listeners.push(listener);
        Ok(())
    }

    /// Remove a listener, returning whether it was registered
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|existing| !same(existing, listener));
        listeners.len() != before
    }

    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Marker: Send + Sync {}
    struct P;
    impl Marker for P {}

    #[test]
    fn test_duplicate_add_fails() {
        let set: ListenerSet<dyn Marker> = ListenerSet::new("test");
        let marker: Arc<dyn Marker> = Arc::new(P);
        set.add(marker.clone()).unwrap();
        assert!(matches!(
            set.add(marker.clone()),
            Err(RegistryError::DuplicateListener { registry: "test" })
        ));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let set: ListenerSet<dyn Marker> = ListenerSet::new("test");
        let registered: Arc<dyn Marker> = Arc::new(P);
        let stranger: Arc<dyn Marker> = Arc::new(P);
        set.add(registered.clone()).unwrap();
        assert!(!set.remove(&stranger));
        assert!(set.remove(&registered));
        assert!(set.is_empty());
    }
}
