//! Re-entrant VM lock
//!
//! One thread at a time may run script on a VM. The lock is re-entrant so
//! host callbacks can call back into the VM; [`JsLock::drop_all_locks`]
//! releases every recursion level around a blocking external call and
//! restores them afterwards.

use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    count: usize,
}

/// Re-entrant lock guarding a VM
#[derive(Debug, Default)]
pub struct JsLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl JsLock {
    /// Unlocked lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire one recursion level, blocking while another thread holds it
    pub fn lock(&self) -> JsLockGuard<'_> {
        self.acquire(1);
        JsLockGuard { lock: self }
    }

    /// Recursion levels held by the current thread
    pub fn lock_count(&self) -> usize {
        let state = self.state.lock();
        if state.owner == Some(std::thread::current().id()) {
            state.count
        } else {
            0
        }
    }

    /// Whether the current thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.lock_count() > 0
    }

    /// Release every level held by this thread while `f` runs
    pub fn drop_all_locks<R>(&self, f: impl FnOnce() -> R) -> R {
        let held = {
            let mut state = self.state.lock();
            if state.owner != Some(std::thread::current().id()) {
                0
            } else {
                let held = state.count;
                state.owner = None;
                state.count = 0;
                held
            }
        };
        if held > 0 {
            self.released.notify_one();
        }
        let result = f();
        if held > 0 {
            self.acquire(held);
        }
        result
    }

    fn acquire(&self, levels: usize) {
        let me = std::thread::current().id();
        let mut state = self.state.lock();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.count = levels;
                    return;
                }
                Some(owner) if owner == me => {
                    state.count += levels;
                    return;
                }
                Some(_) => self.released.wait(&mut state),
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.owner, Some(std::thread::current().id()));
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
    }
}

/// Scoped hold of one [`JsLock`] level
#[must_use = "the lock is released when the guard is dropped"]
pub struct JsLockGuard<'a> {
    lock: &'a JsLock,
}

impl Drop for JsLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_reentrant() {
        let lock = JsLock::new();
        let outer = lock.lock();
        {
            let _inner = lock.lock();
            assert_eq!(lock.lock_count(), 2);
        }
        assert_eq!(lock.lock_count(), 1);
        drop(outer);
        assert_eq!(lock.lock_count(), 0);
    }

    #[test]
    fn test_drop_all_locks_lets_other_thread_in() {
        let lock = Arc::new(JsLock::new());
        let _a = lock.lock();
        let _b = lock.lock();
        let entered = Arc::new(AtomicBool::new(false));

        let other = {
            let lock = Arc::clone(&lock);
            let entered = Arc::clone(&entered);
            std::thread::spawn(move || {
                let _guard = lock.lock();
                entered.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!entered.load(Ordering::SeqCst));

        lock.drop_all_locks(|| {
            assert_eq!(lock.lock_count(), 0);
            other.join().unwrap();
        });
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(lock.lock_count(), 2);
    }
}
