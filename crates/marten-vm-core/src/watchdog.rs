//! Interrupt flag and watchdog timer

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Thread-safe request to stop script execution.
///
/// The interpreter polls it at loop back-edges and call entry and stops
/// with an `Interrupted(Watchdog)` completion once it is set.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Fresh, unset handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Clear a pending request
    pub fn clear(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    /// Whether interruption was requested
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

struct TimerState {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

/// Armed timer that interrupts a VM after a time limit.
///
/// Dropping the watchdog disarms it.
pub struct Watchdog {
    state: Arc<TimerState>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Interrupt `handle` once `limit` has elapsed
    pub fn arm(handle: InterruptHandle, limit: Duration) -> Self {
        let state = Arc::new(TimerState {
            cancelled: Mutex::new(false),
            condvar: Condvar::new(),
        });
        let timer = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("marten-watchdog".into())
            .spawn(move || {
                let deadline = Instant::now() + limit;
                let mut cancelled = timer.cancelled.lock();
                while !*cancelled {
                    if timer.condvar.wait_until(&mut cancelled, deadline).timed_out() {
                        tracing::warn!(limit_ms = limit.as_millis() as u64, "watchdog fired");
                        handle.interrupt();
                        return;
                    }
                }
            })
            .ok();
        if thread.is_none() {
            tracing::warn!("failed to spawn watchdog thread; running without a time limit");
        }
        Self { state, thread }
    }

    /// Stop the timer without firing
    pub fn disarm(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        *self.state.cancelled.lock() = true;
        self.state.condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_fires() {
        let handle = InterruptHandle::new();
        let _watchdog = Watchdog::arm(handle.clone(), Duration::from_millis(10));
        let start = Instant::now();
        while !handle.is_interrupted() {
            assert!(start.elapsed() < Duration::from_secs(5), "watchdog never fired");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_disarmed_watchdog_stays_quiet() {
        let handle = InterruptHandle::new();
        Watchdog::arm(handle.clone(), Duration::from_secs(60)).disarm();
        assert!(!handle.is_interrupted());
    }
}
