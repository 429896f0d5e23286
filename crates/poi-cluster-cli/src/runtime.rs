//! Task spawning helpers
//!
//! Thin wrappers around tokio that tag every task with a profiling scope when the
//! `profiling` feature is enabled.

/// Spawn an async task on the runtime
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    #[cfg(feature = "profiling")]
    {
        tokio::spawn(async move {
            profiling::scope!(
                "runtime::spawn",
                format!("task_type={}", std::any::type_name::<F>()).as_str()
            );
            future.await
        })
    }
    #[cfg(not(feature = "profiling"))]
    {
        tokio::spawn(future)
    }
}

/// Run CPU-bound work on the blocking pool
pub fn spawn_blocking<F, R>(work: F) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        #[cfg(feature = "profiling")]
        profiling::scope!("runtime::spawn_blocking");
        work()
    })
}

/// Whether the caller runs inside a tokio runtime
pub fn in_runtime_context() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}
