use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// A unit of work scheduled to run once after a delay on the ambient
/// tokio runtime.
///
/// Cancellation and firing race through a single state cell, so once
/// `cancel` returns `true` the work is guaranteed never to run. Dropping a
/// `Deferred` detaches it; only `cancel` stops it.
#[derive(Debug)]
pub struct Deferred {
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl Deferred {
    pub fn spawn<F>(delay: Duration, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(PENDING));
        let handle = match Handle::try_current() {
            Ok(runtime) => {
                let cell = Arc::clone(&state);
                Some(runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if cell
                        .compare_exchange(PENDING, FIRED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        work();
                    }
                }))
            }
            Err(_) => {
                warn!("no async runtime available; deferred work will not run");
                None
            }
        };
        Self { state, handle }
    }

    /// Returns `true` if this call stopped the work from running.
    pub fn cancel(&self) -> bool {
        let stopped = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if let Some(handle) = &self.handle {
            handle.abort();
        }
        stopped
    }

    pub fn is_pending(&self) -> bool {
        self.handle.is_some() && self.state.load(Ordering::SeqCst) == PENDING
    }

    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FIRED
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }
}
