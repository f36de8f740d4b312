//! Single-assignment memo cells for asynchronously derived values.
//!
//! A [`ComputedValue`] starts either resolved or holding a task. The task
//! runs at most once: on a pool thread if the value was scheduled, or on the
//! first thread that blocks in [`ComputedValue::get`] while the task is still
//! queued. Bounded waits only ever wait. Every later read returns the cached
//! result.

use crate::executor::WorkerPool;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

type Task<T> = Box<dyn FnOnce() -> T + Send + 'static>;

/// A computation that panicked instead of producing a value.
#[derive(Debug, Clone, Error)]
#[error("computation '{name}' failed: {message}")]
pub struct ComputeFailed {
    /// Name the value was created with
    pub name: String,
    /// Panic payload, when it was a string
    pub message: String,
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone)]
pub enum Awaited<T> {
    Ready(T),
    Failed(ComputeFailed),
    TimedOut,
}

enum State<T> {
    Queued(Task<T>),
    Running,
    Ready(T),
    Failed(ComputeFailed),
}

struct Cell<T> {
    name: String,
    state: Mutex<State<T>>,
    done: Condvar,
}

/// A lazily or asynchronously computed value, memoized for its lifetime.
///
/// Clones share the same cell, so two clones are the same handle:
/// [`ptr_eq`](Self::ptr_eq) tells them apart from an equal value computed
/// twice.
///
/// # Examples
///
/// ```
/// use ctx_history::ComputedValue;
///
/// let v = ComputedValue::lazy("answer", || 6 * 7);
/// assert_eq!(v.try_get(), None);
/// assert_eq!(v.get().unwrap(), 42);
/// assert_eq!(v.try_get(), Some(42));
/// ```
pub struct ComputedValue<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Clone for ComputedValue<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T: Clone + Send + 'static> ComputedValue<T> {
    /// An already resolved value.
    pub fn completed(name: impl Into<String>, value: T) -> Self {
        Self::with_state(name.into(), State::Ready(value))
    }

    /// A value computed by the first caller that needs it.
    pub fn lazy<F>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::with_state(name.into(), State::Queued(Box::new(task)))
    }

    /// A value computed eagerly on `pool`.
    pub fn submit<F>(name: impl Into<String>, pool: &WorkerPool, task: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let value = Self::lazy(name, task);
        value.schedule(pool);
        value
    }

    fn with_state(name: String, state: State<T>) -> Self {
        Self {
            cell: Arc::new(Cell {
                name,
                state: Mutex::new(state),
                done: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Queues the pending task on `pool`. No-op once started.
    pub fn schedule(&self, pool: &WorkerPool) {
        if !self.is_queued() {
            return;
        }
        let this = self.clone();
        pool.execute(move || this.run_now());
    }

    /// Runs the pending task on the current thread if nobody has started it.
    pub fn run_now(&self) {
        let task = {
            let mut state = self.cell.state.lock();
            match std::mem::replace(&mut *state, State::Running) {
                State::Queued(task) => task,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(task));
        let mut state = self.cell.state.lock();
        *state = match outcome {
            Ok(value) => State::Ready(value),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                tracing::warn!(value = %self.cell.name, %message, "computation failed");
                State::Failed(ComputeFailed {
                    name: self.cell.name.clone(),
                    message,
                })
            }
        };
        drop(state);
        self.cell.done.notify_all();
    }

    /// Blocks until the value is available, computing it inline if still queued.
    pub fn get(&self) -> Result<T, ComputeFailed> {
        self.run_now();
        let mut state = self.cell.state.lock();
        loop {
            match &*state {
                State::Ready(v) => return Ok(v.clone()),
                State::Failed(e) => return Err(e.clone()),
                State::Running | State::Queued(_) => self.cell.done.wait(&mut state),
            }
        }
    }

    /// Waits at most `timeout` for the value.
    ///
    /// Never runs a queued task on the calling thread. A value that is still
    /// waiting for a pool thread when the deadline passes is `TimedOut`.
    pub fn await_timeout(&self, timeout: Duration) -> Awaited<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.cell.state.lock();
        loop {
            match &*state {
                State::Ready(v) => return Awaited::Ready(v.clone()),
                State::Failed(e) => return Awaited::Failed(e.clone()),
                State::Running | State::Queued(_) => {
                    if self.cell.done.wait_until(&mut state, deadline).timed_out() {
                        return match &*state {
                            State::Ready(v) => Awaited::Ready(v.clone()),
                            State::Failed(e) => Awaited::Failed(e.clone()),
                            _ => Awaited::TimedOut,
                        };
                    }
                }
            }
        }
    }

    /// The value if already computed. Never blocks on the computation.
    pub fn try_get(&self) -> Option<T> {
        match &*self.cell.state.lock() {
            State::Ready(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// The value if computed, `fallback` otherwise.
    pub fn get_now_or(&self, fallback: T) -> T {
        self.try_get().unwrap_or(fallback)
    }

    pub fn is_done(&self) -> bool {
        matches!(
            &*self.cell.state.lock(),
            State::Ready(_) | State::Failed(_)
        )
    }

    fn is_queued(&self) -> bool {
        matches!(&*self.cell.state.lock(), State::Queued(_))
    }

    /// Whether two handles share one cell.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.cell, &b.cell)
    }
}

impl<T> fmt::Debug for ComputedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.cell.state.try_lock().as_deref() {
            Some(State::Queued(_)) => "queued",
            Some(State::Running) => "running",
            Some(State::Ready(_)) => "ready",
            Some(State::Failed(_)) => "failed",
            None => "busy",
        };
        write!(f, "ComputedValue({}: {})", self.cell.name, status)
    }
}
