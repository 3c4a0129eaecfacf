//! Keyed one-shot delayed jobs, used for permission retries.
//!
//! At most one job is pending per key: scheduling again under the same key replaces (and aborts)
//! the earlier one.

use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::ignore_poison::IgnorePoison;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait JobScheduler: Send + Sync {
    /// Runs `job` once after `delay`, replacing any job pending under `key`.
    fn schedule_once(&self, key: &str, delay: Duration, job: Job);

    /// Drops the job pending under `key`. Returns false if there was none.
    fn cancel(&self, key: &str) -> bool;

    fn cancel_all(&self);

    fn is_pending(&self, key: &str) -> bool;
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(30 * 60))
    }
}

struct PendingJob {
    generation: u64,
    abort: AbortHandle,
}

/// Runs jobs as tokio tasks that sleep, then fire.
pub struct TokioJobScheduler {
    runtime: Handle,
    pending: Arc<Mutex<HashMap<String, PendingJob>>>,
    next_generation: AtomicU64,
}

impl TokioJobScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock_ignore_poison().len()
    }
}

impl JobScheduler for TokioJobScheduler {
    fn schedule_once(&self, key: &str, delay: Duration, job: Job) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let task_key = key.to_string();

        // Hold the lock across spawn and insert, so the task can't fire before it's registered
        let mut jobs = self.pending.lock_ignore_poison();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let still_current = {
                let mut jobs = pending.lock_ignore_poison();
                match jobs.get(&task_key) {
                    Some(entry) if entry.generation == generation => {
                        jobs.remove(&task_key);
                        true
                    }
                    _ => false,
                }
            };
            if still_current {
                debug!("Running scheduled job {}", task_key);
                job();
            }
        });

        if let Some(previous) = jobs.insert(
            key.to_string(),
            PendingJob {
                generation,
                abort: task.abort_handle(),
            },
        ) {
            debug!("Replacing scheduled job {}", key);
            previous.abort.abort();
        }
    }

    fn cancel(&self, key: &str) -> bool {
        match self.pending.lock_ignore_poison().remove(key) {
            Some(entry) => {
                entry.abort.abort();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        for (_, entry) in self.pending.lock_ignore_poison().drain() {
            entry.abort.abort();
        }
    }

    fn is_pending(&self, key: &str) -> bool {
        self.pending.lock_ignore_poison().contains_key(key)
    }
}
