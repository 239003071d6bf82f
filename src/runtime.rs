//! Fallback tokio runtime.
//!
//! Clients created inside a tokio runtime spawn their connection driver
//! there. Clients created from plain threads use this shared multi-threaded
//! runtime instead, and [`block_on`] lets those threads wait on replies.

use std::sync::OnceLock;
use tokio::runtime::Runtime;

/// Global tokio runtime, initialized once on first use.
static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get (or initialize) the global tokio runtime.
///
/// Worker threads default to the number of CPU cores; override with the
/// `REDPIPE_RUNTIME_THREADS` environment variable.
pub fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();

        if let Ok(threads) = std::env::var("REDPIPE_RUNTIME_THREADS") {
            if let Ok(n) = threads.parse::<usize>() {
                if n > 0 {
                    builder.worker_threads(n);
                }
            }
        }

        match builder.thread_name("redpipe-rt").build() {
            Ok(rt) => rt,
            // OnceLock::get_or_init cannot fail; a process that cannot start
            // threads has nothing to fall back to.
            Err(e) => panic!("redpipe: failed to create tokio runtime: {e}"),
        }
    })
}

/// Block the calling thread on `future` using the shared runtime.
///
/// Panics if called from within an async context.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    get_runtime().block_on(future)
}

/// Spawn a future on the shared runtime.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    get_runtime().spawn(future)
}

// ── Tests ──────────────────────────────────────────────────────────
