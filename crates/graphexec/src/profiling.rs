//! Process-wide cache and execution event counters.
//!
//! A deliberately small instrumentation surface: named monotonic counters that
//! the executor bumps on cache hits, misses, and evictions. Tests that need
//! isolation should prefer the per-executor counters on
//! [`GraphExecutor`](crate::executor::GraphExecutor).

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

static COUNTERS: Lazy<Mutex<HashMap<&'static str, u64>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Records a single occurrence of the named event.
pub fn cache_event(name: &'static str) {
    let mut counters = COUNTERS.lock().expect("profiling counters poisoned");
    *counters.entry(name).or_insert(0) += 1;
}

/// Returns the current value of the named counter, zero if never recorded.
pub fn counter_value(name: &str) -> u64 {
    let counters = COUNTERS.lock().expect("profiling counters poisoned");
    counters.get(name).copied().unwrap_or(0)
}

/// Clears every recorded counter.
pub fn reset() {
    let mut counters = COUNTERS.lock().expect("profiling counters poisoned");
    counters.clear();
}
