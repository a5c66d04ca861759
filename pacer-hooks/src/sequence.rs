//! One-at-a-time execution of a list of calls.

use crate::lifecycle::Lifecycle;
use crate::state::StateCell;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pacer_core::{HookConfig, Outcome, PacerResult};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A boxed zero-argument call, for lists of calls with different bodies.
pub type SequentialCall<T> = Box<dyn FnOnce() -> BoxFuture<'static, PacerResult<T>> + Send>;

/// Box a closure into a [`SequentialCall`].
pub fn sequential_call<T, F, Fut>(call: F) -> SequentialCall<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = PacerResult<T>> + Send + 'static,
{
    Box::new(move || call().boxed())
}

/// A failed call in a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallError {
    pub index: usize,
    pub message: String,
}

/// Everything a sequential run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceReport<T> {
    /// One outcome per call that ran, in call order
    pub results: Vec<Outcome<T>>,
    /// The failures among `results`
    pub errors: Vec<CallError>,
}

impl<T> Default for SequenceReport<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> SequenceReport<T> {
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run `calls` one after another with `delay` between consecutive calls.
///
/// A failing call is recorded and the run continues with the next one.
pub async fn run_sequential<T, F, Fut>(
    calls: impl IntoIterator<Item = F>,
    delay: Duration,
) -> SequenceReport<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = PacerResult<T>>,
{
    run_until(calls, delay, None).await
}

/// As [`run_sequential`], stopping before the next call once `cancel` fires.
async fn run_until<T, F, Fut>(
    calls: impl IntoIterator<Item = F>,
    delay: Duration,
    cancel: Option<&CancellationToken>,
) -> SequenceReport<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = PacerResult<T>>,
{
    let mut report = SequenceReport::default();

    for (index, call) in calls.into_iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(completed = index, "Sequence stopped early");
            break;
        }

        let outcome = Outcome::from_result(index, call().await, |err| err.user_message());
        if let Some(message) = outcome.error() {
            report.errors.push(CallError {
                index,
                message: message.to_string(),
            });
        }
        report.results.push(outcome);
    }

    report
}

/// Observable state of a [`SequentialCalls`] hook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceState<T> {
    pub loading: bool,
    pub results: Vec<Outcome<T>>,
    pub errors: Vec<CallError>,
}

impl<T> Default for SequenceState<T> {
    fn default() -> Self {
        Self {
            loading: false,
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Component-bound sequential runner.
///
/// Publishes the report into state when the run finishes. Unmounting stops
/// the run before its next call and suppresses the state write.
pub struct SequentialCalls<T> {
    lifecycle: Lifecycle,
    state: StateCell<SequenceState<T>>,
    delay: Duration,
}

impl<T: Clone + Send + Sync + 'static> SequentialCalls<T> {
    pub fn new(lifecycle: Lifecycle, delay: Duration) -> Self {
        Self {
            state: StateCell::new(SequenceState::default(), lifecycle.clone()),
            lifecycle,
            delay,
        }
    }

    pub fn from_config(lifecycle: Lifecycle, config: &HookConfig) -> Self {
        Self::new(lifecycle, config.sequential_delay())
    }

    pub fn state(&self) -> SequenceState<T> {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SequenceState<T>> {
        self.state.subscribe()
    }

    /// Run `calls`. Returns `None` if the component unmounted first.
    pub async fn execute<F, Fut>(&self, calls: impl IntoIterator<Item = F>) -> Option<SequenceReport<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PacerResult<T>>,
    {
        if !self.state.update(|s| s.loading = true) {
            return None;
        }
        let loading = self
            .state
            .reset_on_drop(|s| std::mem::replace(&mut s.loading, false));

        let token = self.lifecycle.token();
        let report = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            report = run_until(calls, self.delay, Some(&token)) => report,
        };
        loading.disarm();

        let written = self.state.update(|s| {
            s.loading = false;
            s.results = report.results.clone();
            s.errors = report.errors.clone();
        });
        written.then_some(report)
    }
}
