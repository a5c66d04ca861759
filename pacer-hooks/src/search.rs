//! Debounced search with stale-result suppression.

use crate::debounce::Debouncer;
use crate::lifecycle::Lifecycle;
use crate::state::StateCell;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use pacer_core::{HookConfig, PacerResult};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

type SearchFn<T> = Arc<dyn Fn(String) -> BoxFuture<'static, PacerResult<T>> + Send + Sync>;

/// What a search box renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchState<T> {
    /// Raw input, updated on every keystroke
    pub term: String,
    pub loading: bool,
    pub results: Option<T>,
    pub error: Option<String>,
}

impl<T> Default for SearchState<T> {
    fn default() -> Self {
        Self {
            term: String::new(),
            loading: false,
            results: None,
            error: None,
        }
    }
}

/// Search box driver: input is debounced, then handed to the search function.
///
/// Every dispatch gets a generation number. Only the latest generation may
/// write results, so a slow early search cannot overwrite a faster later one.
/// Blank input clears the results without searching.
pub struct DebouncedSearch<T> {
    state: StateCell<SearchState<T>>,
    debouncer: Debouncer<String>,
    generation: Arc<AtomicU64>,
}

impl<T: Clone + Send + Sync + 'static> DebouncedSearch<T> {
    pub fn new<F, Fut>(lifecycle: Lifecycle, delay: Duration, search: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PacerResult<T>> + Send + 'static,
    {
        let state = StateCell::new(SearchState::default(), lifecycle.clone());
        let generation = Arc::new(AtomicU64::new(0));
        let dispatcher = Dispatcher {
            state: state.clone(),
            generation: Arc::clone(&generation),
            search: Arc::new(move |term| search(term).boxed()),
            lifecycle: lifecycle.clone(),
        };
        let debouncer = Debouncer::new(delay, lifecycle, move |term| dispatcher.dispatch(term));

        Self {
            state,
            debouncer,
            generation,
        }
    }

    pub fn from_config<F, Fut>(lifecycle: Lifecycle, config: &HookConfig, search: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PacerResult<T>> + Send + 'static,
    {
        Self::new(lifecycle, config.debounce(), search)
    }

    /// Record new input and restart the debounce window.
    pub fn set_term(&self, term: impl Into<String>) {
        let term = term.into();
        let input = term.clone();
        self.state.update(|s| s.term = input);
        self.debouncer.call(term);
    }

    pub fn state(&self) -> SearchState<T> {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState<T>> {
        self.state.subscribe()
    }

    /// Number of debounced terms dispatched so far, blank ones included.
    pub fn dispatched(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DebouncedSearch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedSearch")
            .field("state", &self.state)
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct Dispatcher<T> {
    state: StateCell<SearchState<T>>,
    generation: Arc<AtomicU64>,
    search: SearchFn<T>,
    lifecycle: Lifecycle,
}

impl<T: Clone + Send + Sync + 'static> Dispatcher<T> {
    fn dispatch(&self, term: String) {
        let blank = term.trim().is_empty();
        let mut generation = 0;
        let mounted = self.state.update(|s| {
            // Bumped under the state lock so completions compare against it atomically.
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            s.loading = !blank;
            s.error = None;
            if blank {
                s.results = None;
            }
        });
        if !mounted || blank {
            return;
        }

        tracing::debug!(term = %term, generation, "Dispatching search");
        let search = (self.search)(term);
        let state = self.state.clone();
        let latest = Arc::clone(&self.generation);
        let token = self.lifecycle.token();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                result = search => result,
            };

            state.update_if(|s| {
                if latest.load(Ordering::SeqCst) != generation {
                    tracing::trace!(generation, "Discarding stale search result");
                    return false;
                }
                s.loading = false;
                match result {
                    Ok(results) => {
                        s.results = Some(results);
                        s.error = None;
                    }
                    Err(err) => s.error = Some(err.user_message()),
                }
                true
            });
        });
    }
}
