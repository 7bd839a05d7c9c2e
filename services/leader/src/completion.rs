//! Single-assignment completion cells
//!
//! A [`Completion`] is resolved or rejected at most once; later attempts are
//! ignored and report `false`. Any number of clones may wait on it, before
//! or after it completes.

use crate::error::HandleError;
use std::sync::Arc;
use tokio::sync::watch;

type Outcome<T> = Option<Result<T, HandleError>>;

pub struct Completion<T> {
    slot: Arc<watch::Sender<Outcome<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone + Send + Sync> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Completion<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Returns whether this call completed the cell
    pub fn resolve(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Returns whether this call completed the cell
    pub fn reject(&self, error: HandleError) -> bool {
        self.complete(Err(error))
    }

    fn complete(&self, outcome: Result<T, HandleError>) -> bool {
        self.slot.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub fn is_complete(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Outcome so far without waiting
    pub fn peek(&self) -> Option<Result<T, HandleError>> {
        (*self.slot.borrow()).clone()
    }

    pub async fn wait(&self) -> Result<T, HandleError> {
        let mut updates = self.slot.subscribe();
        let outcome = match updates.wait_for(|slot| slot.is_some()).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(HandleError::Abandoned))
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Completion").field(&*self.slot.borrow()).finish()
    }
}
