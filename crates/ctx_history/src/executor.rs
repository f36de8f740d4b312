//! Worker pool for fragment materialization and diff computation.
//!
//! Threads carry a role. The single interactive thread (a UI loop, for
//! example) marks itself with [`enter_interactive`] and must never block on
//! slow work; pool threads are marked as workers and may run work inline.

use crossbeam_channel::{unbounded, Sender};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Role of the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    /// A thread nobody has classified, e.g. a test's main thread.
    Unassigned,
    /// The thread that must never block on fragment or diff work.
    Interactive,
    /// A [`WorkerPool`] thread.
    Worker,
}

thread_local! {
    static ROLE: Cell<ThreadRole> = const { Cell::new(ThreadRole::Unassigned) };
}

pub fn current_role() -> ThreadRole {
    ROLE.with(|r| r.get())
}

pub fn is_worker_thread() -> bool {
    current_role() == ThreadRole::Worker
}

pub fn is_interactive_thread() -> bool {
    current_role() == ThreadRole::Interactive
}

/// Marks the current thread as interactive until the guard drops.
pub fn enter_interactive() -> RoleGuard {
    RoleGuard::set(ThreadRole::Interactive)
}

/// Restores the previous thread role on drop.
#[must_use]
pub struct RoleGuard {
    previous: ThreadRole,
}

impl RoleGuard {
    fn set(role: ThreadRole) -> Self {
        let previous = ROLE.with(|r| r.replace(role));
        Self { previous }
    }
}

impl Drop for RoleGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        ROLE.with(|r| r.set(previous));
    }
}

/// A fixed-size pool of named worker threads fed by an unbounded channel.
///
/// Cloning is cheap; all clones share the same threads. The threads exit once
/// every clone has been dropped and the queue drains.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sender: Sender<Job>,
    threads: usize,
}

impl WorkerPool {
    /// Starts a pool with `threads` workers (at least one).
    pub fn new(name: &str, threads: usize) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let wanted = threads.max(1);
        let mut started = 0;

        for i in 0..wanted {
            let receiver = receiver.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || {
                    let _role = RoleGuard::set(ThreadRole::Worker);
                    while let Ok(job) = receiver.recv() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!("worker job panicked");
                        }
                    }
                });
            match spawned {
                Ok(_) => started += 1,
                Err(e) => warn!(error = %e, "failed to spawn worker thread"),
            }
        }
        debug!(pool = name, threads = started, "worker pool started");

        Self {
            inner: Arc::new(PoolInner {
                sender,
                threads: started,
            }),
        }
    }

    /// Number of running worker threads.
    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    /// Queues a job. With no running workers the job runs on the caller.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.threads == 0 {
            job();
            return;
        }
        if let Err(rejected) = self.inner.sender.send(Box::new(job)) {
            (rejected.into_inner())();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.inner.threads)
            .finish()
    }
}
