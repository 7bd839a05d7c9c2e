//! Shared core of the actor and agent registries
//!
//! A [`View`] owns the keyed entries, the serialization gate and two listener
//! sets. Regular listeners hear about transitions the view applied. Discard
//! listeners hear about terminal events for keys the view never held, which
//! is how a watcher learns that something it waits for failed before it was
//! ever announced.
//!
//! Event processing is serialized by `gate`, held across mutate + notify so
//! every observer sees the same order. `entries` is never held while
//! listeners run, so callbacks may read the registry or unregister themselves.

use crate::error::{RegistryError, Result};
use crate::listeners::ListenerSet;
use crate::sync::{StateHolder, ViewEvent, ViewListener};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;
use types::{Endpoint, RegisteredActor, RegisteredAgent};

/// A registry entry: keyed, and owned by the endpoint that announced it
pub(crate) trait Entry: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Ord + Display + Send + Sync;

    fn key(&self) -> &Self::Key;

    fn endpoint(&self) -> &Endpoint;
}

impl Entry for RegisteredActor {
    type Key = types::ActorKey;

    fn key(&self) -> &Self::Key {
        &self.key
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Entry for RegisteredAgent {
    type Key = types::AgentKey;

    fn key(&self) -> &Self::Key {
        &self.key
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

pub(crate) struct View<E: Entry, L: ?Sized> {
    name: &'static str,
    gate: Mutex<()>,
    entries: RwLock<HashMap<E::Key, E>>,
    listeners: ListenerSet<L>,
    discard_listeners: ListenerSet<L>,
}

impl<E: Entry, L: ?Sized> View<E, L> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            gate: Mutex::new(()),
            entries: RwLock::new(HashMap::new()),
            listeners: ListenerSet::new(name),
            discard_listeners: ListenerSet::new(name),
        }
    }

    /// Hold while mutating and notifying
    pub(crate) fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }

    pub(crate) fn listeners(&self) -> &ListenerSet<L> {
        &self.listeners
    }

    pub(crate) fn discard_listeners(&self) -> &ListenerSet<L> {
        &self.discard_listeners
    }

    /// Replace every entry without notifying anyone
    pub(crate) fn reset(&self, entries: impl IntoIterator<Item = E>) {
        let _serial = self.gate();
        let fresh: HashMap<_, _> = entries
            .into_iter()
            .map(|entry| (entry.key().clone(), entry))
            .collect();
        debug!(registry = self.name, entries = fresh.len(), "Registry state reset");
        *self.entries.write() = fresh;
    }

    /// Point-in-time snapshot ordered by key
    pub(crate) fn all(&self) -> Vec<E> {
        let mut entries: Vec<E> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key().cmp(b.key()));
        entries
    }

    pub(crate) fn get(&self, key: &E::Key) -> Option<E> {
        self.entries.read().get(key).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Insert unless the key is already present; first writer wins
    pub(crate) fn insert(&self, entry: E) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(entry.key()) {
            return false;
        }
        entries.insert(entry.key().clone(), entry);
        true
    }

    /// Run `f` on the entry for `key`, if any, under the write lock
    pub(crate) fn update<R>(&self, key: &E::Key, f: impl FnOnce(Option<&mut E>) -> R) -> R {
        f(self.entries.write().get_mut(key))
    }

    pub(crate) fn remove(&self, key: &E::Key) -> Option<E> {
        self.entries.write().remove(key)
    }

    /// Remove every entry announced by `endpoint`, returning their keys in order
    pub(crate) fn drain_endpoint(&self, endpoint: &Endpoint) -> Vec<E::Key> {
        let mut entries = self.entries.write();
        let mut keys: Vec<E::Key> = entries
            .values()
            .filter(|entry| entry.endpoint() == endpoint)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        for key in &keys {
            entries.remove(key);
        }
        keys
    }

    pub(crate) fn notify(&self, f: impl Fn(&L)) {
        for listener in self.listeners.snapshot() {
            f(listener.as_ref());
        }
    }

    pub(crate) fn notify_discarded(&self, f: impl Fn(&L)) {
        for listener in self.discard_listeners.snapshot() {
            f(listener.as_ref());
        }
    }

    pub(crate) fn snapshot(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.all()).map_err(|e| RegistryError::snapshot(self.name, e))
    }

    pub(crate) fn restore(&self, state: &[u8]) -> Result<()> {
        let entries: Vec<E> =
            serde_json::from_slice(state).map_err(|e| RegistryError::snapshot(self.name, e))?;
        self.reset(entries);
        Ok(())
    }
}

/// A registry that can be replicated through state transfer and membership
pub(crate) trait Replicated: Send + Sync + 'static {
    type Entry: Entry;
    type Listener: ?Sized;

    /// Name under which the snapshot travels
    const STATE_NAME: &'static str;

    fn view(&self) -> &View<Self::Entry, Self::Listener>;

    fn on_endpoint_disconnected(&self, endpoint: &Endpoint) -> usize;
}

/// [`StateHolder`] over any replicated registry
pub(crate) struct Snapshots<R>(pub(crate) Arc<R>);

impl<R: Replicated> StateHolder for Snapshots<R> {
    fn state_name(&self) -> &'static str {
        R::STATE_NAME
    }

    fn get_state(&self) -> Result<Vec<u8>> {
        self.0.view().snapshot()
    }

    fn set_state(&self, state: &[u8]) -> Result<()> {
        self.0.view().restore(state)
    }
}

/// Fails the entries of members leaving the view
pub(crate) struct Departures<R>(pub(crate) Arc<R>);

impl<R: Replicated> ViewListener for Departures<R> {
    fn on_view_event(&self, event: &ViewEvent) {
        if let Some(endpoint) = event.left() {
            self.0.on_endpoint_disconnected(endpoint);
        }
    }
}
