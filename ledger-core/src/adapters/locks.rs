//! Per-account lock table shared by the store adapters
//!
//! A scope acquires every account it touches in one step and holds the
//! locks until its guard is dropped, so two operations on the same account
//! can never interleave their read-modify-write sequences.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::context::Context;
use crate::domain::Result;

/// How long a waiter sleeps before re-checking its context
const WAIT_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
pub struct AccountLocks {
    held: Mutex<HashSet<Uuid>>,
    released: Condvar,
}

impl AccountLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until none of `ids` is held, then take all of them
    ///
    /// Waiting is bounded by the context: a cancelled or expired context
    /// gives up with `Cancelled` and takes nothing.
    pub fn acquire(self: &Arc<Self>, ctx: &Context, ids: &[Uuid]) -> Result<AccountLockGuard> {
        let mut wanted: Vec<Uuid> = ids.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut held = self.held.lock()?;
        loop {
            ctx.check()?;
            if wanted.iter().all(|id| !held.contains(id)) {
                held.extend(wanted.iter().copied());
                return Ok(AccountLockGuard {
                    locks: Arc::clone(self),
                    ids: wanted,
                });
            }
            let wait = ctx.remaining().map_or(WAIT_SLICE, |r| r.min(WAIT_SLICE));
            let (guard, _) = self.released.wait_timeout(held, wait)?;
            held = guard;
        }
    }

    /// Whether `id` is currently locked by some scope
    pub fn is_locked(&self, id: Uuid) -> bool {
        self.held.lock().map(|held| held.contains(&id)).unwrap_or(false)
    }

    fn release(&self, ids: &[Uuid]) {
        // A poisoned table still has to give the ids back.
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for id in ids {
            held.remove(id);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Releases its accounts when dropped
#[derive(Debug)]
pub struct AccountLockGuard {
    locks: Arc<AccountLocks>,
    ids: Vec<Uuid>,
}

impl AccountLockGuard {
    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = AccountLocks::new();
        let id = Uuid::new_v4();
        {
            let guard = locks.acquire(&Context::background(), &[id, id]).unwrap();
            assert_eq!(guard.ids(), &[id]);
            assert!(locks.is_locked(id));
        }
        assert!(!locks.is_locked(id));
    }

    #[test]
    fn test_second_acquirer_waits() {
        let locks = AccountLocks::new();
        let id = Uuid::new_v4();
        let guard = locks.acquire(&Context::background(), &[id]).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _g = locks.acquire(&Context::background(), &[id]).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancelled_wait_takes_nothing() {
        let locks = AccountLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _held = locks.acquire(&Context::background(), &[a]).unwrap();

        let ctx = Context::with_timeout(Duration::from_millis(30));
        let result = locks.acquire(&ctx, &[a, b]);
        assert!(matches!(result, Err(crate::domain::Error::Cancelled)));
        assert!(!locks.is_locked(b));
    }
}
