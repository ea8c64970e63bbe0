//! Consumer lifecycle and flush scheduling.
//!
//! A [`ConsumerScope`] is whatever owns a cached resource on the UI side: a
//! mounted component, an explicit [`Scope`], or nothing at all
//! ([`Untracked`]). A [`FlushScheduler`] defers eviction checks until the
//! current update cycle has finished.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::warn;

/// Deferred work: a teardown callback or a post-flush check
pub type Task = Box<dyn FnOnce() + Send>;

/// Runs work after the next rendering flush
pub trait FlushScheduler: Send + Sync {
    fn after_flush(&self, task: Task);
}

/// Returned by scopes that cannot track consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Lifecycle tracking is not available in this context")]
pub struct ScopeUnavailable;

pub trait ConsumerScope {
    /// Register `teardown` to run when this consumer detaches
    fn on_teardown(&self, teardown: Task) -> Result<(), ScopeUnavailable>;
}

/// Host-driven scheduler: queued tasks run when [`ManualFlush::flush`] is called
#[derive(Default)]
pub struct ManualFlush {
    queue: Mutex<Vec<Task>>,
}

impl ManualFlush {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every task queued before this call. Tasks queued while flushing
    /// wait for the next flush. Returns the number of tasks run.
    pub fn flush(&self) -> usize {
        let tasks = std::mem::take(&mut *self.queue());
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, Vec<Task>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FlushScheduler for ManualFlush {
    fn after_flush(&self, task: Task) {
        self.queue().push(task);
    }
}

impl fmt::Debug for ManualFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualFlush")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Why a [`TokioTick`] could not be created
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerUnavailable {
    #[error("No Tokio runtime is running")]
    NoRuntime,
    #[error("Flush ticks need a current-thread runtime, found {0}")]
    Flavor(String),
}

/// Runs tasks on a current-thread Tokio runtime after yielding to it once.
///
/// A current-thread runtime only switches tasks at await points, so a queued
/// task never runs while the code that queued it is still in its synchronous
/// update. Multi-thread runtimes may run it on another worker at once and are
/// rejected; drive a [`ManualFlush`] from the update loop there instead.
#[derive(Debug, Clone)]
pub struct TokioTick {
    handle: Handle,
}

impl TokioTick {
    /// Bind to the current runtime
    pub fn current() -> Result<Self, SchedulerUnavailable> {
        let handle = Handle::try_current().map_err(|_| SchedulerUnavailable::NoRuntime)?;
        match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Ok(Self { handle }),
            flavor => {
                warn!("Refusing flush ticks on a {:?} runtime", flavor);
                Err(SchedulerUnavailable::Flavor(format!("{:?}", flavor)))
            }
        }
    }
}

impl FlushScheduler for TokioTick {
    fn after_flush(&self, task: Task) {
        self.handle.spawn(async move {
            tokio::task::yield_now().await;
            task();
        });
    }
}

/// The calling context cannot track consumers; every registration fails
#[derive(Debug, Default, Clone, Copy)]
pub struct Untracked;

impl ConsumerScope for Untracked {
    fn on_teardown(&self, _teardown: Task) -> Result<(), ScopeUnavailable> {
        Err(ScopeUnavailable)
    }
}

/// An explicit consumer scope.
///
/// Teardowns run in reverse registration order on [`Scope::detach`] or when
/// the scope is dropped. A detached scope rejects further registrations.
pub struct Scope {
    teardowns: Mutex<Option<Vec<Task>>>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            teardowns: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn detach(&self) {
        let teardowns = self.teardowns().take().unwrap_or_default();
        for teardown in teardowns.into_iter().rev() {
            teardown();
        }
    }

    pub fn is_detached(&self) -> bool {
        self.teardowns().is_none()
    }

    pub fn registered(&self) -> usize {
        self.teardowns().as_ref().map_or(0, Vec::len)
    }

    fn teardowns(&self) -> std::sync::MutexGuard<'_, Option<Vec<Task>>> {
        self.teardowns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerScope for Scope {
    fn on_teardown(&self, teardown: Task) -> Result<(), ScopeUnavailable> {
        match self.teardowns().as_mut() {
            Some(teardowns) => {
                teardowns.push(teardown);
                Ok(())
            }
            None => Err(ScopeUnavailable),
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("registered", &self.registered())
            .field("detached", &self.is_detached())
            .finish()
    }
}
