//! Array runtime state
//!
//! The `loaded` and `readonly` flags are read lock-free on every request.
//! Flipping them takes the array gate exclusively, so a state transition
//! waits for in-flight writers (which hold the gate shared) to drain.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::info;

/// Runtime flags owned by the array controller.
#[derive(Debug)]
pub struct ArrayState {
    loaded: AtomicBool,
    readonly: AtomicBool,
    gate: RwLock<()>,
}

impl Default for ArrayState {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ArrayState {
    /// Create state with the given flags.
    pub fn new(loaded: bool, readonly: bool) -> Self {
        Self {
            loaded: AtomicBool::new(loaded),
            readonly: AtomicBool::new(readonly),
            gate: RwLock::new(()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly.load(Ordering::Acquire)
    }

    /// Hold the array gate in shared mode for the duration of a write.
    pub async fn write_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    /// Mark the array loaded or unloaded.
    pub async fn set_loaded(&self, loaded: bool) {
        let _exclusive = self.gate.write().await;
        self.loaded.store(loaded, Ordering::Release);
        info!(loaded, "Array load state changed");
    }

    /// Mark the array read-only or writable.
    pub async fn set_readonly(&self, readonly: bool) {
        let _exclusive = self.gate.write().await;
        self.readonly.store(readonly, Ordering::Release);
        info!(readonly, "Array write state changed");
    }
}
