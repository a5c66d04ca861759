//! Mount-safe async execution.

use crate::lifecycle::Lifecycle;
use crate::state::{AsyncState, StateCell};
use pacer_core::{HookConfig, PacerResult};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// What happened to one `execute` call.
#[derive(Debug)]
pub enum ExecuteOutcome<T> {
    /// The call ran to completion while mounted.
    Completed(PacerResult<T>),
    /// Arrived within the minimum gap of the previous call; nothing ran.
    Throttled,
    /// The component unmounted before or during the call.
    Unmounted,
}

impl<T> ExecuteOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn into_result(self) -> Option<PacerResult<T>> {
        match self {
            Self::Completed(result) => Some(result),
            Self::Throttled | Self::Unmounted => None,
        }
    }
}

/// Runs async calls on behalf of a component and mirrors them into an
/// [`AsyncState`].
///
/// State is written only while the component is mounted; unmounting abandons
/// the call in flight. Calls closer together than `min_gap` are skipped.
pub struct SafeExecutor<T> {
    lifecycle: Lifecycle,
    state: StateCell<AsyncState<T>>,
    min_gap: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl<T: Clone + Send + Sync + 'static> SafeExecutor<T> {
    pub fn new(lifecycle: Lifecycle, min_gap: Duration) -> Self {
        Self {
            state: StateCell::new(AsyncState::default(), lifecycle.clone()),
            lifecycle,
            min_gap,
            last_call: Mutex::new(None),
        }
    }

    pub fn from_config(lifecycle: Lifecycle, config: &HookConfig) -> Self {
        Self::new(lifecycle, config.min_call_gap())
    }

    pub fn state(&self) -> AsyncState<T> {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<AsyncState<T>> {
        self.state.subscribe()
    }

    pub async fn execute<F, Fut>(&self, call: F) -> ExecuteOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PacerResult<T>>,
    {
        if !self.lifecycle.is_mounted() {
            return ExecuteOutcome::Unmounted;
        }
        if !self.claim_slot() {
            tracing::debug!(min_gap_ms = self.min_gap.as_millis() as u64, "Call skipped, too soon");
            return ExecuteOutcome::Throttled;
        }

        self.state.update(|s| {
            s.loading = true;
            s.error = None;
        });
        let loading = self
            .state
            .reset_on_drop(|s| std::mem::replace(&mut s.loading, false));

        let token = self.lifecycle.token();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return ExecuteOutcome::Unmounted,
            result = call() => result,
        };
        loading.disarm();

        let written = self.state.update(|s| {
            s.loading = false;
            match &result {
                Ok(data) => {
                    s.data = Some(data.clone());
                    s.error = None;
                }
                Err(err) => s.error = Some(err.user_message()),
            }
        });
        if !written {
            return ExecuteOutcome::Unmounted;
        }
        ExecuteOutcome::Completed(result)
    }

    /// Record this call's start unless the previous one was too recent.
    fn claim_slot(&self) -> bool {
        let mut last = self.last_call.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(previous) = *last {
            if now.saturating_duration_since(previous) < self.min_gap {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SafeExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeExecutor")
            .field("state", &self.state)
            .field("min_gap", &self.min_gap)
            .finish_non_exhaustive()
    }
}
