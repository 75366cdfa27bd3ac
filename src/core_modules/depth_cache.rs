// THEORY:
// The `depth_cache` module is the single-flight memoization primitive used
// for per-source computation results. Depth computation is accelerator-bound,
// so there is nothing to gain from running two computations at once — the
// cache therefore pairs its entry map with one process-wide binary limiter
// rather than per-key locks, matching the loader's simplification rationale.
// A caller that loses the race suspends on the limiter and, once inside,
// re-checks the map so it can adopt the winner's result instead of repeating
// the work.
//
// Failed computations are never cached: the error propagates to the caller
// inside the critical section and the next call for the same key retries
// from scratch. An entry only becomes visible to other callers after its
// computation fully succeeds, so lookups never observe partially-constructed
// state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::DepthError;

/// A keyed memoization cache enforcing at-most-one in-flight computation
/// process-wide. Entries are never evicted; growth is bounded only by the
/// number of distinct keys seen over the process lifetime.
pub struct SingleFlightCache<T> {
    entries: Mutex<HashMap<String, Arc<T>>>,
    /// Binary limiter serializing *all* computations, not per-key.
    limiter: tokio::sync::Mutex<()>,
}

impl<T> SingleFlightCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            limiter: tokio::sync::Mutex::new(()),
        }
    }

    /// Lock-free-ish lookup of an already-published entry (a map lock and a
    /// key lookup, nothing more).
    pub fn peek(&self, key: &str) -> Option<Arc<T>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Returns the cached entry for `key`, or runs `compute` to produce it.
    ///
    /// Concurrent callers for any key suspend until the current computation
    /// finishes, then re-check the cache before computing themselves. There
    /// is no cancellation: once `compute` starts it runs to completion or
    /// failure.
    pub async fn get_or_compute<'a, F>(&self, key: &str, compute: F) -> Result<Arc<T>, DepthError>
    where
        F: FnOnce() -> BoxFuture<'a, Result<T, DepthError>>,
    {
        if let Some(hit) = self.peek(key) {
            return Ok(hit);
        }
        let _guard = self.limiter.lock().await;
        // Absorb callers that raced in while we waited on the limiter.
        if let Some(hit) = self.peek(key) {
            debug!(%key, "cache entry published while waiting, adopting it");
            return Ok(hit);
        }
        let value = Arc::new(compute().await?);
        self.entries.lock().unwrap().insert(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl<T> Default for SingleFlightCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn computes_once_and_serves_the_cached_entry_afterwards() {
        let cache = SingleFlightCache::<u32>::new();
        let computations = AtomicUsize::new(0);

        let first = cache
            .get_or_compute("a", || {
                computations.fetch_add(1, Ordering::SeqCst);
                async { Ok(7u32) }.boxed()
            })
            .await
            .expect("compute");
        let second = cache
            .get_or_compute("a", || {
                computations.fetch_add(1, Ordering::SeqCst);
                async { Ok(9u32) }.boxed()
            })
            .await
            .expect("cached");

        assert_eq!(*first, 7);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_for_the_same_key_share_one_computation() {
        let cache = Arc::new(SingleFlightCache::<u32>::new());
        let computations = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let computations = computations.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute("shared", move || {
                            async move {
                                computations.fetch_add(1, Ordering::SeqCst);
                                tokio::time::sleep(Duration::from_millis(20)).await;
                                Ok(42u32)
                            }
                            .boxed()
                        })
                        .await
                        .expect("compute")
                })
            })
            .collect();

        let results = join_all(tasks).await;
        let first = results[0].as_ref().expect("join");
        for result in &results {
            let value = result.as_ref().expect("join");
            assert!(Arc::ptr_eq(first, value));
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached_and_the_next_call_retries() {
        let cache = SingleFlightCache::<u32>::new();

        let err = cache
            .get_or_compute("flaky", || {
                async {
                    Err(DepthError::DepthComputation {
                        source: "flaky".to_string(),
                        cause: "backend exploded".into(),
                    })
                }
                .boxed()
            })
            .await
            .expect_err("first call fails");
        assert!(matches!(err, DepthError::DepthComputation { .. }));
        assert!(cache.is_empty());

        let value = cache
            .get_or_compute("flaky", || async { Ok(5u32) }.boxed())
            .await
            .expect("retry succeeds");
        assert_eq!(*value, 5);
        assert_eq!(cache.len(), 1);
    }
}
