//! Keyed single-flight for identical submissions
//!
//! Concurrent submissions with the same (artist, track, release) strings run
//! the resolution pipeline once and every caller receives a clone of that
//! run's result. The listen type is not part of the key, so a "now playing"
//! update can absorb a concurrent real listen of the same track.
//!
//! A run lives only as long as someone waits for it. When the last waiter
//! goes away before the run finishes, the run is dropped with its entry and
//! the next submission for the key starts afresh.

use crate::error::CatalogResult;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoalesceKey {
    pub artist: String,
    pub track: String,
    pub release: String,
}

impl CoalesceKey {
    pub fn new(
        artist: impl Into<String>,
        track: impl Into<String>,
        release: impl Into<String>,
    ) -> Self {
        Self {
            artist: artist.into(),
            track: track.into(),
            release: release.into(),
        }
    }
}

type InFlight<T> = Shared<BoxFuture<'static, CatalogResult<T>>>;

struct Entry<T> {
    run: u64,
    shared: InFlight<T>,
    waiters: usize,
}

struct Runs<T> {
    next_run: u64,
    entries: HashMap<CoalesceKey, Entry<T>>,
}

type RunMap<T> = Arc<Mutex<Runs<T>>>;

fn lock<T>(map: &Mutex<Runs<T>>) -> MutexGuard<'_, Runs<T>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes the run's entry when the last waiter leaves before completion
struct Waiter<T> {
    map: RunMap<T>,
    key: CoalesceKey,
    run: u64,
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        let mut guard = lock(&self.map);
        let runs = &mut *guard;
        let Some(entry) = runs.entries.get_mut(&self.key) else {
            return;
        };
        if entry.run != self.run {
            return;
        }
        entry.waiters -= 1;
        if entry.waiters == 0 {
            runs.entries.remove(&self.key);
            debug!(
                artist = %self.key.artist,
                track = %self.key.track,
                "Abandoned submission dropped"
            );
        }
    }
}

pub struct SubmissionCoalescer<T> {
    in_flight: RunMap<T>,
}

impl<T> Default for SubmissionCoalescer<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(Runs {
                next_run: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<T> SubmissionCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` unless a run for `key` is already in flight, in which
    /// case wait for that run instead
    ///
    /// The run removes its own entry when it completes. If every caller
    /// drops its future first, the run is cancelled and nothing it had not
    /// yet done is applied.
    pub async fn run<F, Fut>(&self, key: CoalesceKey, start: F) -> CatalogResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CatalogResult<T>> + Send + 'static,
    {
        let (shared, _waiter) = {
            let mut guard = lock(&self.in_flight);
            let runs = &mut *guard;
            let (run, shared) = match runs.entries.get_mut(&key) {
                Some(existing) => {
                    debug!(artist = %key.artist, track = %key.track, "Joining in-flight submission");
                    existing.waiters += 1;
                    (existing.run, existing.shared.clone())
                }
                None => {
                    let run = runs.next_run;
                    runs.next_run += 1;

                    let map = Arc::clone(&self.in_flight);
                    let entry = key.clone();
                    let work = start();
                    let shared = async move {
                        let result = work.await;
                        let mut runs = lock(&map);
                        if runs.entries.get(&entry).is_some_and(|e| e.run == run) {
                            runs.entries.remove(&entry);
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    runs.entries.insert(
                        key.clone(),
                        Entry {
                            run,
                            shared: shared.clone(),
                            waiters: 1,
                        },
                    );
                    (run, shared)
                }
            };
            let waiter = Waiter {
                map: Arc::clone(&self.in_flight),
                key,
                run,
            };
            (shared, waiter)
        };

        shared.await
    }

    /// Number of keys currently being resolved
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).entries.len()
    }
}
