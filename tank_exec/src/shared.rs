//! Shared state between the executable's tasks.
//!
//! Everything here is designed for short critical sections: plain atomics
//! for the flags, and a lock helper that recovers a poisoned mutex rather
//! than propagating the panic into every other task.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Mode flags shared between the capture task, the telemetry fan-out and
/// the operator server.
pub struct ModeFlags {
    /// Person-following enabled
    pub auto_navigation: AtomicBool,

    /// Object detection runs on captured frames
    pub object_detection: AtomicBool,

    /// Detection boxes are drawn onto outgoing frames
    pub overlay: AtomicBool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ModeFlags {
    pub fn new(auto_navigation: bool, object_detection: bool, overlay: bool) -> Self {
        Self {
            auto_navigation: AtomicBool::new(auto_navigation),
            object_detection: AtomicBool::new(object_detection),
            overlay: AtomicBool::new(overlay),
        }
    }

    pub fn auto_navigation(&self) -> bool {
        self.auto_navigation.load(Ordering::Relaxed)
    }

    pub fn object_detection(&self) -> bool {
        self.object_detection.load(Ordering::Relaxed)
    }

    pub fn overlay(&self) -> bool {
        self.overlay.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Lock a mutex, recovering the inner value if another task panicked while
/// holding it.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
