//! In-flight message task registry
//!
//! Tracks one handle per dispatched event so finished work can be reclaimed.
//! Nothing is ever awaited through the registry; it bounds how many units run
//! at once and how many may be pending in total.

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

static TASK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique key of a dispatched task.
///
/// Combines the sender id, a microsecond timestamp and a process-wide
/// sequence number, so two events from one sender in the same instant still
/// get distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey(String);

impl TaskKey {
    /// Fresh key for an event from `sender_id`.
    #[must_use]
    pub fn for_sender(sender_id: &str) -> Self {
        let micros = Utc::now().timestamp_micros();
        let seq = TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{sender_id}_{micros}_{seq}"))
    }

    /// Key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returned by [`TaskRegistry::submit`] when the pending bound is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task registry full: {pending} units pending")]
pub struct RegistryFull {
    /// Units registered when the submit was rejected
    pub pending: usize,
}

/// Handle of one in-flight unit of work.
struct PendingTask {
    done: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PendingTask {
    fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire) || self.handle.is_finished()
    }
}

/// Registry of in-flight message tasks.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskKey, PendingTask>>,
    permits: Arc<Semaphore>,
    max_pending: usize,
    completed: Arc<Notify>,
    shutdown: CancellationToken,
}

impl TaskRegistry {
    /// Create a registry running at most `max_concurrent` units at once
    /// (minimum 1). Units beyond that bound wait for a free slot; at most
    /// `max_pending` units (running or waiting, minimum `max_concurrent`) are
    /// registered at a time.
    #[must_use]
    pub fn new(max_concurrent: usize, max_pending: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            tasks: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_pending: max_pending.max(max_concurrent),
            completed: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskKey, PendingTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `work` on the runtime and register it under `key`.
    ///
    /// Finished handles are swept first, so the map stays small even when no
    /// reaper runs. The map lock is held until the handle is inserted, so a
    /// completion signal always finds the handle it refers to.
    ///
    /// # Errors
    ///
    /// Returns `RegistryFull` without spawning if `max_pending` units are
    /// still registered after the sweep.
    pub fn submit<F>(&self, key: TaskKey, work: F) -> Result<(), RegistryFull>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.lock();
        let reclaimed = sweep_locked(&mut tasks);
        if reclaimed > 0 {
            debug!(reclaimed, "Reclaimed finished tasks on submit");
        }
        if tasks.len() >= self.max_pending {
            return Err(RegistryFull {
                pending: tasks.len(),
            });
        }

        let done = Arc::new(AtomicBool::new(false));
        let permits = Arc::clone(&self.permits);
        let completed = Arc::clone(&self.completed);
        let flag = Arc::clone(&done);
        let shutdown = self.shutdown.clone();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                () = shutdown.cancelled() => None,
            };
            if permit.is_some() {
                work.await;
            } else {
                debug!(task_key = %task_key, "Task dropped before start (shutdown)");
            }
            drop(permit);
            flag.store(true, Ordering::Release);
            completed.notify_one();
        });

        tasks.insert(key, PendingTask { done, handle });
        Ok(())
    }

    /// Remove every finished handle; returns how many were removed.
    pub fn sweep(&self) -> usize {
        sweep_locked(&mut self.lock())
    }

    /// Number of registered handles not yet swept.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Token cancelled on shutdown; typing waits listen to it.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel pending waits and stop the reaper.
    pub fn shutdown(&self) {
        info!(active = self.active_count(), "Shutting down task registry");
        self.shutdown.cancel();
    }

    /// Spawn a background loop that sweeps whenever a task completes.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = registry.completed.notified() => {
                        let reclaimed = registry.sweep();
                        if reclaimed > 0 {
                            debug!(reclaimed, "Reaper reclaimed finished tasks");
                        }
                    }
                    () = registry.shutdown.cancelled() => break,
                }
            }
        })
    }
}

fn sweep_locked(tasks: &mut HashMap<TaskKey, PendingTask>) -> usize {
    let before = tasks.len();
    tasks.retain(|_, task| !task.is_complete());
    before - tasks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_keys_are_unique_for_same_sender() {
        let keys: HashSet<TaskKey> = (0..1000).map(|_| TaskKey::for_sender("U1")).collect();
        assert_eq!(keys.len(), 1000);
        assert!(keys.iter().all(|k| k.as_str().starts_with("U1_")));
    }

    #[tokio::test]
    async fn test_sweep_keeps_running_tasks() {
        let registry = TaskRegistry::new(8, 64);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        registry
            .submit(TaskKey::for_sender("slow"), async move {
                let _ = release_rx.await;
            })
            .expect("registered");
        registry
            .submit(TaskKey::for_sender("fast"), async {})
            .expect("registered");

        wait_until(|| registry.sweep() == 1).await;
        assert_eq!(registry.active_count(), 1, "running task must survive sweep");

        let _ = release_tx.send(());
        wait_until(|| registry.sweep() == 1).await;
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submits_during_sweep_are_not_lost() {
        let registry = Arc::new(TaskRegistry::new(1024, 1024));
        let gate = CancellationToken::new();

        let sweeper = {
            let registry = Arc::clone(&registry);
            let gate = gate.clone();
            tokio::spawn(async move {
                while !gate.is_cancelled() {
                    registry.sweep();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut submitters = Vec::new();
        for worker in 0..4 {
            let registry = Arc::clone(&registry);
            let gate = gate.clone();
            submitters.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let gate = gate.clone();
                    registry
                        .submit(TaskKey::for_sender(&format!("w{worker}")), async move {
                            gate.cancelled().await;
                        })
                        .expect("registered");
                    tokio::task::yield_now().await;
                }
            }));
        }
        for submitter in submitters {
            submitter.await.expect("submitter panicked");
        }

        assert_eq!(registry.active_count(), 200);
        gate.cancel();
        sweeper.await.expect("sweeper panicked");
        wait_until(|| {
            registry.sweep();
            registry.active_count() == 0
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let registry = TaskRegistry::new(1, 8);
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let started = Arc::new(AtomicBool::new(false));

        registry
            .submit(TaskKey::for_sender("a"), async move {
                let _ = first_rx.await;
            })
            .expect("registered");
        let flag = Arc::clone(&started);
        registry
            .submit(TaskKey::for_sender("b"), async move {
                flag.store(true, Ordering::SeqCst);
            })
            .expect("registered");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!started.load(Ordering::SeqCst), "second unit must wait for a slot");

        let _ = first_tx.send(());
        wait_until(|| started.load(Ordering::SeqCst)).await;
    }

    #[tokio::test]
    async fn test_reaper_reclaims_on_completion() {
        let registry = Arc::new(TaskRegistry::new(4, 16));
        let reaper = registry.spawn_reaper();

        registry
            .submit(TaskKey::for_sender("U1"), async {})
            .expect("registered");
        wait_until(|| registry.active_count() == 0).await;

        registry.shutdown();
        reaper.await.expect("reaper panicked");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_reaper_reclaims_short_tasks_without_further_submits() {
        let registry = Arc::new(TaskRegistry::new(64, 64));
        let reaper = registry.spawn_reaper();

        for round in 0..500 {
            registry
                .submit(TaskKey::for_sender(&format!("U{round}")), async {})
                .expect("registered");
            wait_until(|| registry.active_count() == 0).await;
        }

        registry.shutdown();
        reaper.await.expect("reaper panicked");
    }

    #[tokio::test]
    async fn test_submit_rejected_when_pending_bound_reached() {
        let registry = TaskRegistry::new(1, 2);
        let gate = CancellationToken::new();

        for sender in ["a", "b"] {
            let gate = gate.clone();
            registry
                .submit(TaskKey::for_sender(sender), async move {
                    gate.cancelled().await;
                })
                .expect("registered");
        }

        let rejected = registry.submit(TaskKey::for_sender("c"), async {});
        assert_eq!(rejected, Err(RegistryFull { pending: 2 }));
        assert_eq!(registry.active_count(), 2);

        gate.cancel();
        wait_until(|| {
            registry.sweep();
            registry.active_count() == 0
        })
        .await;
        registry
            .submit(TaskKey::for_sender("c"), async {})
            .expect("slot freed after sweep");
    }
}
