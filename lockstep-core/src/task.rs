//! Task spawning for the single-threaded executor.

use std::future::Future;
use tokio::task::JoinHandle;

/// Spawns named local tasks.
///
/// Every channel worker and accept loop of a node is a local task; they share
/// `Rc` state, so spawning must stay on the current thread.
pub trait TaskProvider: Clone {
    /// Spawn `future` on the current thread's `LocalSet`.
    fn spawn_task<F, T>(&self, name: &str, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + 'static,
        T: 'static;
}

/// [`TaskProvider`] backed by `tokio::task::spawn_local`.
///
/// Must be used from within a `tokio::task::LocalSet`.
#[derive(Clone, Debug, Default)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F, T>(&self, name: &str, future: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + 'static,
        T: 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!("Task {} starting", task_name);
            let output = future.await;
            tracing::trace!("Task {} completed", task_name);
            output
        })
    }
}
