//! Observable component state.

use crate::lifecycle::Lifecycle;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// A value a UI can render and subscribe to.
///
/// Writes are dropped once the owning component has unmounted, so late async
/// completions cannot touch state that no longer belongs to anyone.
pub struct StateCell<T> {
    tx: Arc<watch::Sender<T>>,
    lifecycle: Lifecycle,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<T: Clone> StateCell<T> {
    pub fn new(initial: T, lifecycle: Lifecycle) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            lifecycle,
        }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Replace the value. Returns `false` if the component has unmounted.
    pub fn set(&self, value: T) -> bool {
        self.update(|current| *current = value)
    }

    /// Modify in place. Returns `false` if the component has unmounted.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        self.update_if(|current| {
            f(current);
            true
        })
    }

    /// Modify in place; subscribers are notified only when `f` returns true.
    ///
    /// `f` runs under the cell's lock, so a check and write inside it are
    /// atomic with respect to other writers.
    pub fn update_if(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        let written = self.lifecycle.while_mounted(|| self.tx.send_if_modified(f));
        written.unwrap_or_else(|| {
            tracing::trace!("State write after unmount dropped");
            false
        })
    }

    /// Guard that applies `reset` when dropped, unless disarmed first.
    ///
    /// Used to undo a transient flag such as `loading` when the future that
    /// set it is dropped before finishing.
    pub(crate) fn reset_on_drop(&self, reset: fn(&mut T) -> bool) -> ResetOnDrop<'_, T> {
        ResetOnDrop {
            cell: self,
            reset,
            armed: true,
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for StateCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCell")
            .field("value", &*self.tx.borrow())
            .field("mounted", &self.lifecycle.is_mounted())
            .finish()
    }
}

pub(crate) struct ResetOnDrop<'a, T: Clone> {
    cell: &'a StateCell<T>,
    reset: fn(&mut T) -> bool,
    armed: bool,
}

impl<T: Clone> ResetOnDrop<'_, T> {
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: Clone> Drop for ResetOnDrop<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.cell.update_if(self.reset);
        }
    }
}

/// Loading / data / error triple for one async call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncState<T> {
    pub loading: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> Default for AsyncState<T> {
    fn default() -> Self {
        Self {
            loading: false,
            data: None,
            error: None,
        }
    }
}
