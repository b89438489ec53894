//! A bounded reader/writer mutex built from a single [`Mutex`] and a single
//! [`Condvar`].
//!
//! This is *not* the spinning, ticket-queued design of a generic qrwlock:
//! callers park on a condition variable instead of busy-waiting, and the
//! reader population is capped so that a sustained flood of readers cannot
//! starve a writer indefinitely the way an unbounded reader-preferred lock
//! would.
//!
//! Why not a generic rwlock?
//!
//! A plain reader-preferred lock lets readers pile up without bound while a
//! writer waits; a plain writer-preferred lock can starve readers instead.
//! Capping the number of threads allowed to hold the read role at once
//! bounds how long a writer can be kept out, at the cost of blocking
//! additional readers once the cap is hit.
//!
//! One condition variable multiplexes three distinct wait reasons: a writer
//! waiting for readers to drain, a reader waiting for the cap to fall, and a
//! future writer waiting for the current reader to leave. Every wait sits
//! behind a `while` loop re-checking its predicate, so spurious wakeups (and
//! wakeups meant for a different reason) are harmless.

use std::sync::{Condvar, Mutex};

/// Maximum number of threads allowed to observe themselves between `RLock`
/// and `RUnlock` at once. Readers beyond the cap park until the count drops.
pub const MAX_READERS: u32 = 64;

struct State {
    /// Number of threads currently holding read access, or in the process
    /// of being granted it under `mu`.
    readers: u32,
    /// Set while a writer holds the lock. Kept alongside `readers` so a
    /// single predicate check under `mu` answers both "can I read" and
    /// "can I write".
    writer: bool,
}

/// A fair-enough, bounded-population reader/writer mutex.
///
/// See the module documentation for the rationale behind the single
/// condvar and the reader cap.
pub struct RwLock<T> {
    state: Mutex<State>,
    cv: Condvar,
    data: std::cell::UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through a guard obtained
// while holding the invariants enforced by `state`/`cv`, exactly as for
// `std::sync::RwLock`.
unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}

/// Guard that provides read-only access to the underlying data.
///
/// Dropping the guard performs `RUnlock`.
pub struct ReadGuard<'a, T> {
    lock: &'a RwLock<T>,
}

/// Guard that provides exclusive read-write access to the underlying data.
///
/// Dropping the guard performs `Unlock`.
pub struct WriteGuard<'a, T> {
    lock: &'a RwLock<T>,
}

impl<T> RwLock<T> {
    /// Creates a new rwlock wrapping the passed data.
    #[inline]
    pub fn new(data: T) -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                writer: false,
            }),
            cv: Condvar::new(),
            data: std::cell::UnsafeCell::new(data),
        }
    }

    /// Acquires the lock for writing, blocking the calling thread until no
    /// reader and no other writer hold it.
    ///
    /// Corresponds to `Lock()`: the internal mutex is acquired and retained
    /// for the lifetime of the returned guard, which is what serializes
    /// writers with respect to each other.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while guard.readers != 0 || guard.writer {
            guard = self.cv.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
        guard.writer = true;
        drop(guard);
        WriteGuard { lock: self }
    }

    /// Acquires the lock for reading, blocking the calling thread while a
    /// writer holds the lock or the reader cap ([`MAX_READERS`]) is
    /// reached.
    ///
    /// Corresponds to `RLock()`.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while guard.writer || guard.readers >= MAX_READERS {
            guard = self.cv.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
        guard.readers += 1;
        drop(guard);
        ReadGuard { lock: self }
    }

    /// Releases a writer that is retaining the internal mutex from `write`.
    ///
    /// Corresponds to `Unlock()`: signal one waiter, then release.
    fn write_unlock(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.writer = false;
        drop(guard);
        self.cv.notify_one();
    }

    /// Releases one reader.
    ///
    /// Corresponds to `RUnlock()`: decrementing can unblock a writer
    /// waiting for `readers == 0`, or a reader waiting for the cap to
    /// drop, so both conditions get a chance to wake someone.
    fn read_unlock(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.readers -= 1;
        let wake_writer = guard.readers == 0;
        let wake_reader = guard.readers < MAX_READERS;
        drop(guard);
        if wake_writer || wake_reader {
            self.cv.notify_one();
        }
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.write_unlock();
    }
}

impl<'a, T> std::ops::Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a live ReadGuard guarantees no writer holds the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> std::ops::Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a live WriteGuard guarantees exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> std::ops::DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: a live WriteGuard guarantees exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}
