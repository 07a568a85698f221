use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

/// A [`std::sync::Mutex`] that is only ever locked for the duration of a closure.
///
/// Keeping the guard inside the closure means it cannot be held across an `.await`.
#[derive(Debug)]
pub struct Mutex<T>(StdMutex<T>);

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex(StdMutex::new(value))
    }

    /// Locks the mutex and runs `thunk` on the inner value.
    ///
    /// Returns a [`PoisonError`] if another thread panicked while holding the lock. Avoid
    /// unwrapping inside the closure; return the result and handle it outside.
    pub fn safe_lock<F, Ret>(&self, thunk: F) -> Result<Ret, PoisonError<MutexGuard<'_, T>>>
    where
        F: FnOnce(&mut T) -> Ret,
    {
        let mut lock = self.0.lock()?;
        let return_value = thunk(&mut *lock);
        drop(lock);
        Ok(return_value)
    }

    /// Like [`Mutex::safe_lock`], but takes over the value of a poisoned lock.
    ///
    /// Only use it for state that stays consistent after any single mutation.
    pub fn super_safe_lock<F, Ret>(&self, thunk: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        let mut lock = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        thunk(&mut *lock)
    }
}

/// Messages used for coordinating shutdown across the bridge tasks.
#[derive(Debug, Clone)]
pub enum ShutdownMessage {
    /// Shutdown all components immediately
    ShutdownAll,
    /// Shutdown a specific bridged connection by ID
    ConnectionShutdown(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_safe_lock_returns_closure_value() {
        let counter = Mutex::new(1);
        let value = counter.safe_lock(|c| {
            *c += 1;
            *c
        });
        assert_eq!(value.unwrap(), 2);
        assert_eq!(counter.super_safe_lock(|c| *c), 2);
    }

    #[test]
    fn test_super_safe_lock_survives_poison() {
        let shared = Arc::new(Mutex::new(vec![1u32]));
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            clone.super_safe_lock(|_| panic!("poisoning the lock"));
        })
        .join();

        assert!(shared.safe_lock(|v| v.len()).is_err());
        assert_eq!(shared.super_safe_lock(|v| v.len()), 1);
    }

    #[test]
    fn test_shutdown_message_debug() {
        let msg = ShutdownMessage::ConnectionShutdown(123);
        assert!(format!("{:?}", msg).contains("ConnectionShutdown"));
        assert!(format!("{:?}", msg).contains("123"));
        assert!(format!("{:?}", ShutdownMessage::ShutdownAll).contains("ShutdownAll"));
    }
}
