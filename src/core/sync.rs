//! Poison-tolerant lock access.
//!
//! Every lock in the runtime guards plain bookkeeping (task lists, tracker references,
//! brush tables). A panic on another thread never leaves that data half-written in a way
//! later readers can't cope with, so poisoning is ignored instead of propagated.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Exclusive access to a [`Mutex`] that ignores poisoning.
pub trait MutexExt<T> {
    /// Locks the mutex, recovering the guard if a previous holder panicked.
    fn locked(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn locked(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read/write access to a [`RwLock`] that ignores poisoning.
///
/// # Performance Considerations
/// - Read operations (`read_locked()`) can occur concurrently
/// - Write operations (`write_locked()`) are exclusive and will block other operations
pub trait RwLockExt<T> {
    /// Acquires shared read access.
    fn read_locked(&self) -> RwLockReadGuard<'_, T>;

    /// Acquires exclusive write access.
    fn write_locked(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> RwLockExt<T> for RwLock<T> {
    fn read_locked(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_locked(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_locked_recovers_from_poison() {
        let shared = Arc::new(Mutex::new(1));
        let poisoner = shared.clone();

        let result = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(result.is_err());
        assert!(shared.is_poisoned());
        *shared.locked() += 1;
        assert_eq!(*shared.locked(), 2);
    }

    #[test]
    fn test_rwlock_read_and_write() {
        let shared = RwLock::new(vec![1, 2]);
        shared.write_locked().push(3);
        assert_eq!(shared.read_locked().len(), 3);
    }
}
