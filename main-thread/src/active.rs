//! Live-window accounting used to decide when the main loop may stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::queue::Wake;

/// Counts windows whose worker thread is still running.
///
/// Register a window on the spawning thread *before* starting its worker; the
/// returned [`ActiveGuard`] travels into the worker and, when dropped,
/// decrements the count and wakes the main thread so it can re-check
/// [`ActiveWindows::is_idle`].
#[derive(Clone)]
pub struct ActiveWindows {
    count: Arc<AtomicUsize>,
    waker: Arc<dyn Wake>,
}

impl ActiveWindows {
    pub fn new(waker: Arc<dyn Wake>) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            waker,
        }
    }

    /// Marks one more window as alive.
    pub fn register(&self) -> ActiveGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        ActiveGuard {
            count: Arc::clone(&self.count),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// True once every registered window has released its guard.
    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }
}

impl std::fmt::Debug for ActiveWindows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveWindows")
            .field("count", &self.count())
            .finish()
    }
}

/// Keeps one window counted as alive until dropped.
#[must_use = "dropping the guard immediately marks the window as closed"]
pub struct ActiveGuard {
    count: Arc<AtomicUsize>,
    waker: Arc<dyn Wake>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
        // The main thread may be asleep waiting for events.
        let _ = self.waker.wake();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_track_live_windows_and_wake_on_release() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let w = Arc::clone(&wakes);
        let active = ActiveWindows::new(Arc::new(move || {
            w.fetch_add(1, Ordering::SeqCst);
            true
        }));
        assert!(active.is_idle());

        let a = active.register();
        let b = active.clone().register();
        assert_eq!(active.count(), 2);

        drop(a);
        assert_eq!(active.count(), 1);
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        drop(b);
        assert!(active.is_idle());
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }
}
