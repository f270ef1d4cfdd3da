//! Cooperative cancellation for the connector task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// One-way shutdown signal shared between the connector and its owner.
///
/// Once tripped it stays tripped. Waits inside the connector go through
/// [`Interrupt::sleep_for`] so that shutdown is observed promptly instead
/// of at the end of a pending sleep.
#[derive(Debug, Default)]
pub struct Interrupt {
    flag: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the signal and wakes every pending sleep.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless interrupted. Returns `false` when the
    /// sleep was cut short or the signal was already tripped.
    pub async fn sleep_for(&self, duration: Duration) -> bool {
        if self.interrupted() {
            return false;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register for the wakeup before re-checking the flag, so an
        // interrupt landing between the check and the wait is not lost.
        notified.as_mut().enable();
        if self.interrupted() {
            return false;
        }
        tokio::select! {
            _ = notified => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
