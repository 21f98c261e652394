use std::sync::{Mutex, MutexGuard};

/// Lock a std mutex, recovering the guard if a panicking holder poisoned it.
///
/// Every value guarded this way is kept consistent by single-statement
/// updates, so the data behind a poisoned lock is still valid.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
