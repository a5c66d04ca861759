//! Last-call-wins debouncing.

use crate::lifecycle::Lifecycle;
use crate::state::StateCell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Runs `sink` with the latest value once calls stop for `delay`.
///
/// Each call cancels the timer started by the previous one, so there is at
/// most one pending timer per debouncer. Unmounting cancels it too.
pub struct Debouncer<T> {
    delay: Duration,
    sink: Sink<T>,
    pending: Mutex<Option<JoinHandle<()>>>,
    lifecycle: Lifecycle,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(
        delay: Duration,
        lifecycle: Lifecycle,
        sink: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            delay,
            sink: Arc::new(sink),
            pending: Mutex::new(None),
            lifecycle,
        }
    }

    /// Restart the quiet period with `value` as the candidate.
    pub fn call(&self, value: T) {
        let mut pending = self.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        if !self.lifecycle.is_mounted() {
            return;
        }

        let sink = Arc::clone(&self.sink);
        let delay = self.delay;
        let token = self.lifecycle.token();
        *pending = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => sink(value),
            }
        }));
    }

    /// Drop the pending value without emitting it.
    pub fn cancel(&self) {
        if let Some(previous) = self.lock().take() {
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.lock().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }
}

impl<T> std::fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// A value that only settles after it stops changing.
///
/// `set` records raw input; `get` and subscribers see the debounced value.
pub struct DebouncedValue<T> {
    debouncer: Debouncer<T>,
    state: StateCell<T>,
}

impl<T: Clone + Send + Sync + 'static> DebouncedValue<T> {
    pub fn new(initial: T, delay: Duration, lifecycle: Lifecycle) -> Self {
        let state = StateCell::new(initial, lifecycle.clone());
        let sink_state = state.clone();
        let debouncer = Debouncer::new(delay, lifecycle, move |value| {
            sink_state.set(value);
        });
        Self { debouncer, state }
    }

    pub fn set(&self, value: T) {
        self.debouncer.call(value);
    }

    pub fn get(&self) -> T {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.state.subscribe()
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacer_test_utils::settle;

    const DELAY: Duration = Duration::from_millis(300);

    fn recording() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        (seen, move |v| sink_seen.lock().unwrap().push(v))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_emits_last_value_once() {
        let (seen, sink) = recording();
        let debouncer = Debouncer::new(DELAY, Lifecycle::new(), sink);

        for v in 1..=5 {
            debouncer.call(v);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(DELAY).await;
        settle().await;
        assert_eq!(*seen.lock().unwrap(), vec![5]);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_calls_each_emit() {
        let (seen, sink) = recording();
        let debouncer = Debouncer::new(DELAY, Lifecycle::new(), sink);

        debouncer.call(1);
        tokio::time::sleep(DELAY + Duration::from_millis(10)).await;
        debouncer.call(2);
        tokio::time::sleep(DELAY + Duration::from_millis(10)).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_value() {
        let (seen, sink) = recording();
        let debouncer = Debouncer::new(DELAY, Lifecycle::new(), sink);

        debouncer.call(1);
        assert!(debouncer.is_pending());
        debouncer.cancel();
        tokio::time::sleep(DELAY * 2).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_cancels_timer_and_ignores_calls() {
        let (seen, sink) = recording();
        let lifecycle = Lifecycle::new();
        let debouncer = Debouncer::new(DELAY, lifecycle.clone(), sink);

        debouncer.call(1);
        lifecycle.unmount();
        debouncer.call(2);
        tokio::time::sleep(DELAY * 2).await;

        assert!(seen.lock().unwrap().is_empty());
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_value_settles() {
        let value = DebouncedValue::new(String::new(), DELAY, Lifecycle::new());
        value.set("c".to_string());
        value.set("cl".to_string());
        value.set("clean".to_string());
        assert_eq!(value.get(), "");

        tokio::time::sleep(DELAY + Duration::from_millis(1)).await;
        assert_eq!(value.get(), "clean");
    }
}
