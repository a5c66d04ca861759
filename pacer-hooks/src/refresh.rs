//! Focus-triggered refresh with a minimum interval.

use crate::lifecycle::Lifecycle;
use crate::state::StateCell;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pacer_core::{HookConfig, PacerResult};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, PacerResult<()>> + Send + Sync>;

/// What a trigger did.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The refresh function ran.
    Refreshed(PacerResult<()>),
    /// Too soon after the last refresh, or one is already running.
    Skipped,
    Unmounted,
}

impl RefreshOutcome {
    pub fn is_refreshed(&self) -> bool {
        matches!(self, Self::Refreshed(_))
    }
}

#[derive(Debug, Default)]
struct RefreshClock {
    last_started: Option<Instant>,
    running: bool,
}

/// Wraps a refresh function so screen-focus events trigger it at most once
/// per `min_interval`.
///
/// The interval is measured from the start of the last refresh. Refreshes
/// never overlap. `is_refreshing` is observable for spinners.
#[derive(Clone)]
pub struct FocusRefresh {
    refresh: RefreshFn,
    min_interval: Duration,
    clock: Arc<Mutex<RefreshClock>>,
    refreshing: StateCell<bool>,
    lifecycle: Lifecycle,
}

impl FocusRefresh {
    pub fn new<F, Fut>(lifecycle: Lifecycle, min_interval: Duration, refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PacerResult<()>> + Send + 'static,
    {
        Self {
            refresh: Arc::new(move || refresh().boxed()),
            min_interval,
            clock: Arc::new(Mutex::new(RefreshClock::default())),
            refreshing: StateCell::new(false, lifecycle.clone()),
            lifecycle,
        }
    }

    pub fn from_config<F, Fut>(lifecycle: Lifecycle, config: &HookConfig, refresh: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PacerResult<()>> + Send + 'static,
    {
        Self::new(lifecycle, config.min_refresh_interval(), refresh)
    }

    /// Screen gained focus: refresh unless the last one was too recent.
    pub async fn on_focus(&self) -> RefreshOutcome {
        self.run(false).await
    }

    /// Pull-to-refresh: ignore the interval, but still never overlap.
    pub async fn force_refresh(&self) -> RefreshOutcome {
        self.run(true).await
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.refreshing.subscribe()
    }

    async fn run(&self, force: bool) -> RefreshOutcome {
        if !self.lifecycle.is_mounted() {
            return RefreshOutcome::Unmounted;
        }
        if !self.try_start(force) {
            tracing::trace!(force, "Refresh skipped");
            return RefreshOutcome::Skipped;
        }

        let slot = RunningSlot { owner: self };
        self.refreshing.set(true);
        let token = self.lifecycle.token();
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => RefreshOutcome::Unmounted,
            result = (self.refresh)() => RefreshOutcome::Refreshed(result),
        };
        drop(slot);

        if let RefreshOutcome::Refreshed(Err(err)) = &outcome {
            tracing::warn!(error = %err, "Refresh failed");
        }
        outcome
    }

    fn try_start(&self, force: bool) -> bool {
        let mut clock = self.lock();
        if clock.running {
            return false;
        }
        let now = Instant::now();
        let due = match clock.last_started {
            Some(last) => force || now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        };
        if due {
            clock.last_started = Some(now);
            clock.running = true;
        }
        due
    }

    fn lock(&self) -> MutexGuard<'_, RefreshClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a refresh as finished when dropped, including when the caller drops
/// the trigger future before the refresh completes.
struct RunningSlot<'a> {
    owner: &'a FocusRefresh,
}

impl Drop for RunningSlot<'_> {
    fn drop(&mut self) {
        self.owner.lock().running = false;
        self.owner.refreshing.set(false);
    }
}

impl std::fmt::Debug for FocusRefresh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusRefresh")
            .field("min_interval", &self.min_interval)
            .field("clock", &*self.lock())
            .finish_non_exhaustive()
    }
}
