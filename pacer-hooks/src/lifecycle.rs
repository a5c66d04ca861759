//! Mount state shared by every hook of one component.

use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// Handle to a component's lifetime.
///
/// Starts mounted. `unmount` is one-way: it stops state writes, cancels
/// pending debounce timers and abandons hook work still in flight. Clones
/// observe the same lifetime.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    token: CancellationToken,
    /// Held shared by state writes, exclusively by `unmount`.
    gate: Arc<RwLock<()>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_mounted(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Waits for state writes already in progress, then cancels the token.
    pub fn unmount(&self) {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        if self.is_mounted() {
            tracing::debug!("Component unmounted");
        }
        self.token.cancel();
    }

    /// Run `f` only while mounted; `unmount` cannot complete while `f` runs.
    pub(crate) fn while_mounted<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.is_mounted().then(f)
    }

    /// Token cancelled at unmount, for work that should stop with the component.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once the component unmounts.
    pub async fn unmounted(&self) {
        self.token.cancelled().await
    }
}
