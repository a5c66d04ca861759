//! PACER Hooks - Lifecycle-Aware Request Adapters
//!
//! Component-scoped wrappers for screens that call the throttler: input
//! debouncing, mount-safe execution, debounced search, sequential calls, and
//! focus refresh. Each adapter is bound to a [`Lifecycle`]; once it unmounts,
//! pending timers are cancelled and late results are dropped instead of being
//! written into state nobody owns.

mod debounce;
mod executor;
mod lifecycle;
mod refresh;
mod search;
mod sequence;
mod state;

pub use debounce::{DebouncedValue, Debouncer};
pub use executor::{ExecuteOutcome, SafeExecutor};
pub use lifecycle::Lifecycle;
pub use refresh::{FocusRefresh, RefreshOutcome};
pub use search::{DebouncedSearch, SearchState};
pub use sequence::{
    run_sequential, sequential_call, CallError, SequenceReport, SequenceState, SequentialCall,
    SequentialCalls,
};
pub use state::{AsyncState, StateCell};
