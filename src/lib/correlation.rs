//! ## Correlation Registry
//!
//! Tracks the requests a connection has forwarded and is still waiting on, keyed by request id.
//!
//! Every registration carries a deadline ([`CORRELATION_TIMEOUT`] by default). When a tokio
//! runtime is available a timer task removes the entry once the deadline passes; `resolve` also
//! checks the deadline, so an expired entry is never handed out even if its timer is late. Timer
//! and `resolve` race on the same lock and whoever removes the entry first wins. Each
//! registration gets its own token so a stale timer cannot remove a newer entry reusing the id.
//!
//! A registry belongs to a single connection. Dropping it aborts every pending timer.
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, trace};

use crate::{
    error::{BridgeError, BridgeResult},
    method::Method,
    utils::Mutex,
};

pub const CORRELATION_TIMEOUT: Duration = Duration::from_millis(30_000);

/// An in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation {
    pub id: u32,
    pub method: Method,
    pub created_at: Instant,
    pub deadline: Instant,
}

#[derive(Debug)]
struct Slot {
    entry: Correlation,
    token: u64,
    timer: Option<JoinHandle<()>>,
}

impl Slot {
    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Debug, Default)]
struct Table {
    slots: HashMap<u32, Slot>,
    next_token: u64,
}

#[derive(Debug)]
pub struct CorrelationRegistry {
    table: Arc<Mutex<Table>>,
    timeout: Duration,
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::with_timeout(CORRELATION_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            timeout,
        }
    }

    /// Records request `id`. Fails if `id` is still waiting for its response.
    pub fn register(&self, id: u32, method: Method) -> BridgeResult<()> {
        let created_at = Instant::now();
        let deadline = created_at + self.timeout;
        let weak = Arc::downgrade(&self.table);

        self.table.super_safe_lock(|table| {
            if let Some(slot) = table.slots.get_mut(&id) {
                if slot.entry.deadline > created_at {
                    return Err(BridgeError::DuplicateCorrelation(id));
                }
                slot.abort_timer();
            }
            table.next_token += 1;
            let token = table.next_token;
            let slot = Slot {
                entry: Correlation {
                    id,
                    method,
                    created_at,
                    deadline,
                },
                token,
                timer: spawn_expiry(weak, id, token, deadline),
            };
            table.slots.insert(id, slot);
            Ok(())
        })?;
        trace!("Registered request {id} ({method})");
        Ok(())
    }

    /// Removes and returns the entry for `id`, at most once.
    pub fn resolve(&self, id: u32) -> Option<Correlation> {
        let now = Instant::now();
        let mut slot = self.table.super_safe_lock(|table| table.slots.remove(&id))?;
        slot.abort_timer();
        if slot.entry.deadline <= now {
            debug!("Request {id} ({}) resolved after its deadline", slot.entry.method);
            return None;
        }
        Some(slot.entry)
    }

    /// Drops the entry for `id`. Returns whether one was pending.
    pub fn cancel(&self, id: u32) -> bool {
        match self.table.super_safe_lock(|table| table.slots.remove(&id)) {
            Some(mut slot) => {
                slot.abort_timer();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let slots: Vec<Slot> =
            self.table
                .super_safe_lock(|table| table.slots.drain().map(|(_, slot)| slot).collect());
        for mut slot in slots {
            slot.abort_timer();
        }
    }

    pub fn len(&self) -> usize {
        self.table.super_safe_lock(|table| table.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CorrelationRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn spawn_expiry(
    table: Weak<Mutex<Table>>,
    id: u32,
    token: u64,
    deadline: Instant,
) -> Option<JoinHandle<()>> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    Some(runtime.spawn(async move {
        tokio::time::sleep_until(deadline).await;
        let Some(table) = table.upgrade() else {
            return;
        };
        let expired = table.super_safe_lock(|table| {
            let current = table.slots.get(&id).is_some_and(|slot| slot.token == token);
            if current {
                table.slots.remove(&id)
            } else {
                None
            }
        });
        if let Some(slot) = expired {
            debug!(
                "Request {id} ({}) timed out without a response",
                slot.entry.method
            );
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_exactly_once() {
        let registry = CorrelationRegistry::new();
        registry.register(7, Method::GetStatus).unwrap();
        assert_eq!(registry.len(), 1);

        let entry = registry.resolve(7).unwrap();
        assert_eq!(entry.id, 7);
        assert_eq!(entry.method, Method::GetStatus);
        assert_eq!(entry.deadline - entry.created_at, CORRELATION_TIMEOUT);

        assert_eq!(registry.resolve(7), None);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_timeout() {
        let registry = CorrelationRegistry::new();
        registry.register(7, Method::GetStatus).unwrap();

        tokio::time::advance(Duration::from_millis(29_999)).await;
        settle().await;
        assert_eq!(registry.len(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(registry.is_empty());
        assert_eq!(registry.resolve(7), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_checks_deadline_without_timer() {
        let registry = CorrelationRegistry::new();
        registry.register(3, Method::GetPeers).unwrap();
        registry.abort_timers();

        tokio::time::advance(CORRELATION_TIMEOUT).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve(3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_live_id_is_rejected() {
        let registry = CorrelationRegistry::new();
        registry.register(1, Method::GetBlocks).unwrap();
        assert!(matches!(
            registry.register(1, Method::GetPeers),
            Err(BridgeError::DuplicateCorrelation(1))
        ));
        assert_eq!(registry.resolve(1).map(|e| e.method), Some(Method::GetBlocks));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_remove_new_entry() {
        let registry = CorrelationRegistry::new();
        registry.register(9, Method::GetStatus).unwrap();
        tokio::time::advance(Duration::from_millis(20_000)).await;
        assert!(registry.cancel(9));

        registry.register(9, Method::PostBlock).unwrap();
        tokio::time::advance(Duration::from_millis(10_000)).await;
        settle().await;

        assert_eq!(registry.resolve(9).map(|e| e.method), Some(Method::PostBlock));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let registry = CorrelationRegistry::new();
        for id in 1..=5 {
            registry.register(id, Method::GetStatus).unwrap();
        }
        assert_eq!(registry.len(), 5);
        registry.cancel_all();
        assert!(registry.is_empty());
        assert!(!registry.cancel(1));
    }

    #[test]
    fn test_works_without_runtime() {
        let registry = CorrelationRegistry::with_timeout(Duration::from_secs(60));
        registry.register(2, Method::GetPeers).unwrap();
        assert_eq!(registry.resolve(2).map(|e| e.method), Some(Method::GetPeers));
    }

    impl CorrelationRegistry {
        fn abort_timers(&self) {
            self.table.super_safe_lock(|table| {
                for slot in table.slots.values_mut() {
                    slot.abort_timer();
                }
            });
        }
    }
}
