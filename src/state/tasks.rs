//! Cancellable background tasks scoped to a scoring session.

use std::{
    future::Future,
    sync::{Mutex, PoisonError},
};

use tokio::task::JoinHandle;
use tracing::debug;

/// Owns the timers and listeners of one scoring session.
///
/// Every task spawned through the scope is aborted on [`TaskScope::shutdown`] or when the scope
/// is dropped; once shut down the scope refuses new tasks.
#[derive(Default)]
pub struct TaskScope {
    inner: Mutex<ScopeInner>,
}

#[derive(Default)]
struct ScopeInner {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    closed: bool,
}

impl TaskScope {
    /// Open scope with no tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` under this scope. Returns `false` when the scope is already shut down.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return false;
        }
        inner.handles.retain(|(_, handle)| !handle.is_finished());
        inner.handles.push((name, tokio::spawn(task)));
        true
    }

    /// Abort every task and close the scope.
    pub fn shutdown(&self) {
        let handles = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.closed = true;
            std::mem::take(&mut inner.handles)
        };
        for (name, handle) in handles {
            debug!(task = name, "aborting scoped task");
            handle.abort();
        }
    }

    /// Tasks still running.
    pub fn active(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .handles
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Whether [`TaskScope::shutdown`] ran.
    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        self.shutdown();
    }
}
