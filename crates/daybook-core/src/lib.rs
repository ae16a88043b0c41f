//! Offline-first engine for the daybook planner: tasks, notes and moments
//! kept in a local cache and reconciled with a remote store.

pub mod clock;
pub mod config;
pub mod dates;
pub mod deferred;
pub mod error;
pub mod events;
pub mod local_store;
pub mod merge;
pub mod model;
pub mod notify;
pub mod planner;
pub mod reminder;
pub mod remote_store;
pub mod streak;
pub mod sync;
pub mod transfer;
pub mod ui_state;
pub mod write_order;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
pub(crate) mod test_env {
    use parking_lot::{const_mutex, Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = const_mutex(());

    /// Serializes tests that touch process environment variables.
    pub fn lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock()
    }
}
