//! Test doubles for trellis
//!
//! In-memory stand-ins for the host-side collaborators: modules with canned
//! headers and entries, a host that can deliver transitions either through an
//! interceptor service or as events, and a container builder that records
//! everything the manager asks of it.

mod builder;
mod host;
mod module;

pub use builder::{BuildRecord, FailMode, HandleStats, RecordingBuilder, RecordingHandle};
pub use host::{FakeHost, FakeInterceptorService};
pub use module::FakeModule;

use std::future::Future;
use std::time::{Duration, Instant};

/// Install a test-writer subscriber once per process. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trellis=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` passes. Returns the last
/// observed value.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Blocking variant of [`wait_until`] for synchronous tests.
pub fn wait_until_blocking<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Run `fut` with a timeout, panicking if it does not finish in time.
pub async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    match tokio::time::timeout(timeout, fut).await {
        Ok(value) => value,
        Err(_) => panic!("operation did not finish within {:?}", timeout),
    }
}
