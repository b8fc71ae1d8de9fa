//! Single-flight artifact cache.
//!
//! Each key moves through `Missing -> Computing -> Ready(path)`. The first
//! caller for a missing key spawns the computation; later callers wait on
//! the same result instead of starting their own. Computations run in a
//! spawned task, so a caller that goes away does not cancel them.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::{DaemonError, ErrorCode, Result};

/// Observable state of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Missing,
    Computing,
    Ready(PathBuf),
}

/// Cloneable form of a computation failure, shared with every waiter.
#[derive(Debug, Clone)]
struct SharedFailure {
    code: ErrorCode,
    message: String,
}

impl From<SharedFailure> for DaemonError {
    fn from(failure: SharedFailure) -> Self {
        DaemonError::new(failure.code, failure.message)
    }
}

type Outcome = std::result::Result<PathBuf, SharedFailure>;

enum Slot {
    Computing(watch::Receiver<Option<Outcome>>),
    Ready(PathBuf),
}

type Slots = Arc<Mutex<HashMap<String, Slot>>>;

/// Per-key single-flight cache of derived artifact paths.
#[derive(Clone, Default)]
pub struct ArtifactCache {
    slots: Slots,
}

impl ArtifactCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state of `key`.
    pub fn state(&self, key: &str) -> CacheState {
        match lock(&self.slots).get(key) {
            None => CacheState::Missing,
            Some(Slot::Computing(_)) => CacheState::Computing,
            Some(Slot::Ready(path)) => CacheState::Ready(path.clone()),
        }
    }

    /// Returns the artifact for `key`, computing it at most once at a time.
    ///
    /// A `Ready` entry whose path has disappeared is treated as missing.
    /// Failures are not cached: the next call after a failure computes again.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PathBuf>> + Send + 'static,
    {
        let mut rx = {
            let mut slots = lock(&self.slots);
            match slots.get(key) {
                Some(Slot::Ready(path)) if path.exists() => return Ok(path.clone()),
                Some(Slot::Computing(rx)) => rx.clone(),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(key.to_string(), Slot::Computing(rx.clone()));

                    let leader = Leader {
                        slots: Arc::clone(&self.slots),
                        key: key.to_string(),
                        tx,
                        finished: false,
                    };
                    let work = compute();
                    tokio::spawn(async move {
                        let result = work.await;
                        leader.finish(result);
                    });
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(path)) => Ok(path),
            Some(Err(failure)) => Err(failure.into()),
            None => Err(DaemonError::internal(format!(
                "Derivation for {} ended without a result",
                key
            ))),
        }
    }
}

/// Publishes the result of the one in-flight computation for a key.
///
/// If the task dies before publishing, dropping the leader clears the slot
/// and closes the channel so waiters fail instead of hanging.
struct Leader {
    slots: Slots,
    key: String,
    tx: watch::Sender<Option<Outcome>>,
    finished: bool,
}

impl Leader {
    fn finish(mut self, result: Result<PathBuf>) {
        let outcome = result.map_err(|e| SharedFailure {
            code: e.code,
            message: e.message,
        });

        {
            let mut slots = lock(&self.slots);
            match &outcome {
                Ok(path) => {
                    slots.insert(self.key.clone(), Slot::Ready(path.clone()));
                }
                Err(_) => {
                    slots.remove(&self.key);
                }
            }
        }

        self.tx.send_replace(Some(outcome));
        self.finished = true;
    }
}

impl Drop for Leader {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.slots).remove(&self.key);
        }
    }
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<String, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
