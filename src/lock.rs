//! Reader-writer lock with writer priority.
//!
//! [`PriorityRwLock`] admits any number of concurrent readers while no
//! writer holds or waits for the lock, and exactly one writer otherwise.
//! Once a writer is waiting, new readers block until that writer has
//! acquired and released, so a sustained stream of reads cannot starve a
//! writer. Release is tied to guard drop, so every exit path (including
//! early returns and panics) releases the lock.
//!
//! The lock is not reentrant: a holder must not re-acquire.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    active_readers: usize,
    waiting_writers: usize,
    writer_active: bool,
}

/// A reader-writer lock that owns its data and prioritizes writers.
pub struct PriorityRwLock<T> {
    state: Mutex<LockState>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for PriorityRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for PriorityRwLock<T> {}

impl<T> PriorityRwLock<T> {
    /// Create a new lock owning `data`.
    pub fn new(data: T) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire shared read access, blocking while a writer holds or waits.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let mut state = self.state.lock();
        while state.writer_active || state.waiting_writers > 0 {
            self.cond.wait(&mut state);
        }
        state.active_readers += 1;
        drop(state);
        ReadGuard { lock: self }
    }

    /// Acquire exclusive write access, blocking until all readers and any
    /// active writer have released.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer_active || state.active_readers > 0 {
            self.cond.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer_active = true;
        drop(state);
        WriteGuard { lock: self }
    }

    /// Consume the lock, returning the owned data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        state.active_readers -= 1;
        if state.active_readers == 0 {
            self.cond.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        state.writer_active = false;
        self.cond.notify_all();
    }

    #[cfg(test)]
    fn waiting_writers(&self) -> usize {
        self.state.lock().waiting_writers
    }
}

impl<T: Default> Default for PriorityRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for PriorityRwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PriorityRwLock")
            .field("active_readers", &state.active_readers)
            .field("waiting_writers", &state.waiting_writers)
            .field("writer_active", &state.writer_active)
            .finish_non_exhaustive()
    }
}

/// Shared read access to a [`PriorityRwLock`].
pub struct ReadGuard<'a, T> {
    lock: &'a PriorityRwLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// Exclusive write access to a [`PriorityRwLock`].
pub struct WriteGuard<'a, T> {
    lock: &'a PriorityRwLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_read_write_roundtrip() {
        let lock = PriorityRwLock::new(1);
        {
            let mut guard = lock.write();
            *guard = 2;
        }
        assert_eq!(*lock.read(), 2);
        assert_eq!(lock.into_inner(), 2);
    }

    #[test]
    fn test_concurrent_readers_overlap() {
        let lock = Arc::new(PriorityRwLock::new(0));
        let (tx, rx) = mpsc::channel();

        let guard = lock.read();
        let other = lock.clone();
        let handle = thread::spawn(move || {
            let _inner = other.read();
            tx.send(()).unwrap();
        });

        // The second reader must get in while the first still holds.
        rx.recv_timeout(Duration::from_secs(5))
            .expect("second reader should not block");
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn test_writer_excludes_readers() {
        let lock = Arc::new(PriorityRwLock::new(Vec::new()));
        let mut handles = Vec::new();

        for worker in 0..4 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    let mut guard = lock.write();
                    guard.push((worker, i));
                    // Readers must never observe a half-appended state; the
                    // length check below would panic on a torn sequence.
                    let len = guard.len();
                    assert_eq!(guard.len(), len);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.read().len(), 400);
    }

    #[test]
    fn test_writer_priority_blocks_new_readers() {
        let lock = Arc::new(PriorityRwLock::new(0));

        let reader_guard = lock.read();

        let writer_lock = lock.clone();
        let writer = thread::spawn(move || {
            let mut guard = writer_lock.write();
            *guard = 1;
        });

        // Wait until the writer is registered as waiting.
        while lock.waiting_writers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        let reader_lock = lock.clone();
        let late_reader = thread::spawn(move || *reader_lock.read());

        drop(reader_guard);
        writer.join().unwrap();

        // The late reader was held back until the writer finished.
        assert_eq!(late_reader.join().unwrap(), 1);
    }
}
