//! Table lock
//!
//! Reader/writer gate guarding a memory table's state.
//!
//! ## Protocol
//! - Readers pass through the gate briefly and bump the reader count; they
//!   never block each other.
//! - A writer holds the gate (one writer at a time, no new readers) and waits
//!   for the reader count to drop to zero. It first spin-yields, releasing
//!   the gate between attempts so readers are not starved, for at most
//!   `WriteWaitPolicy::spin_timeout`. After that it blocks on a condition
//!   variable while keeping the gate, so no new reader or writer can slip in
//!   ahead of it.
//! - A negative reader count means the bookkeeping is corrupt; it is a fatal
//!   `LockFault`, never a silent deadlock.
//!
//! The value itself sits in a `RwLock` that is only taken once the gate
//! protocol allows it, so taking it never contends with another guard.

use std::ops::{Deref, DerefMut};
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::WriteWaitPolicy;
use crate::error::{Result, TableError};

/// Reader/writer lock with a spin-then-block writer policy
pub struct TableLock<T> {
    /// Held by writers for their whole critical section, by readers only on entry
    gate: Mutex<()>,
    /// Active readers
    readers: Mutex<isize>,
    /// Signalled when the last reader leaves
    drained: Condvar,
    policy: WriteWaitPolicy,
    data: RwLock<T>,
}

impl<T> TableLock<T> {
    pub fn new(data: T, policy: WriteWaitPolicy) -> Self {
        Self {
            gate: Mutex::new(()),
            readers: Mutex::new(0),
            drained: Condvar::new(),
            policy,
            data: RwLock::new(data),
        }
    }

    pub fn policy(&self) -> WriteWaitPolicy {
        self.policy
    }

    /// Current number of active readers
    pub fn reader_count(&self) -> isize {
        *self.readers.lock()
    }

    /// Acquire shared access
    pub fn read(&self) -> ReadGuard<'_, T> {
        {
            let _gate = self.gate.lock();
            *self.readers.lock() += 1;
        }
        ReadGuard {
            lock: self,
            data: self.data.read(),
        }
    }

    /// Acquire exclusive access, waiting for active readers per the policy
    pub fn write(&self) -> WriteGuard<'_, T> {
        let mut gate = self.gate.lock();

        if let Some(limit) = self.policy.spin_timeout {
            let started = Instant::now();
            loop {
                if *self.readers.lock() == 0 {
                    return WriteGuard {
                        data: self.data.write(),
                        _gate: gate,
                    };
                }
                if started.elapsed() >= limit {
                    break;
                }
                MutexGuard::unlocked(&mut gate, thread::yield_now);
            }
            tracing::trace!(
                "Writer spun for {:?} without readers draining; blocking",
                limit
            );
        }

        let mut readers = self.readers.lock();
        while *readers > 0 {
            self.drained.wait(&mut readers);
        }
        drop(readers);

        WriteGuard {
            data: self.data.write(),
            _gate: gate,
        }
    }

    /// Leave a read section; fails if no reader was registered
    pub(crate) fn exit_read(&self) -> Result<()> {
        let mut readers = self.readers.lock();
        *readers -= 1;
        if *readers < 0 {
            let count = *readers;
            *readers = 0;
            return Err(TableError::LockFault(format!(
                "reader count dropped to {}",
                count
            )));
        }
        if *readers == 0 {
            self.drained.notify_all();
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Shared access to the guarded value
pub struct ReadGuard<'a, T> {
    lock: &'a TableLock<T>,
    data: RwLockReadGuard<'a, T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.exit_read() {
            tracing::error!("{}", e);
            panic!("{}", e);
        }
    }
}

/// Exclusive access to the guarded value
pub struct WriteGuard<'a, T> {
    data: RwLockWriteGuard<'a, T>,
    _gate: MutexGuard<'a, ()>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}
