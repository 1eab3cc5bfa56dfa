//! In-process row/page lock table.
//!
//! The teacher crate never grew a lock manager of its own: `BTreeScanIterator`
//! and `HeapScanIterator` rely entirely on MVCC visibility and never block.
//! The cursor locking protocol needs a real collaborator for lock coupling,
//! blocked-cursor resumption and abort-with-confirm, so this is authored
//! fresh, in the idiom of the teacher's other `Mutex<HashMap<..>>`-backed
//! managers (`concurrency::transaction_table::TransactionTable`), informed by
//! `db_cam.c`'s lock-mode handling (shared read locks, exclusive write locks,
//! same-locker re-entrancy, couple-then-release for lock coupling).

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Mutex,
    },
};

use crate::{concurrency::XID, Error, Result};

/// A lockable resource. Both B-tree/T-tree page latches and heap row ids
/// are folded into a single u64 key by the caller (page number, or a hash
/// of `(fragment id, item pointer)`); the lock manager itself is opaque to
/// what the key represents.
pub type LockKey = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    /// Whether a holder in `self` tolerates a concurrent holder in `other`.
    fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Read, LockMode::Read))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockHandle(u64);

pub enum LockResponse {
    /// Lock acquired immediately; cursor may proceed.
    Granted(LockHandle),
    /// Lock held by an incompatible locker; caller should park and retry
    /// once the handle's grant shows up (§4.9 `Blocked` state).
    Blocked(LockHandle),
    /// Would-block and the caller asked not to wait (e.g. a `NOWAIT` scan).
    Refused,
}

struct Holder {
    locker: XID,
    mode: LockMode,
    handle: LockHandle,
}

struct LockSlot {
    holders: Vec<Holder>,
}

pub trait LockManager: Send + Sync {
    fn acquire(&self, locker: XID, key: LockKey, mode: LockMode) -> Result<LockResponse>;
    fn release(&self, handle: LockHandle) -> Result<()>;
    fn downgrade(&self, handle: LockHandle, mode: LockMode) -> Result<()>;
    /// Acquire `key`/`mode` for the same locker that held `old`, then drop
    /// `old` -- the "latch couple" used while descending a tree so a page
    /// is never fully unlatched between parent and child.
    fn couple(&self, old: LockHandle, key: LockKey, mode: LockMode) -> Result<LockResponse>;
}

/// Single-process lock table. Blocking is advisory: a caller that receives
/// `Blocked` is expected to retry `acquire` later (the cursor state machine
/// parks in `Cursor::Blocked` and resumes by retrying), there is no queue
/// of waiters or deadlock detection here -- `Error::Deadlock` exists in the
/// error taxonomy for a future cycle-detecting implementation to raise.
pub struct InProcessLockManager {
    next_handle: AtomicU64,
    table: Mutex<HashMap<LockKey, LockSlot>>,
    handles: Mutex<HashMap<LockHandle, (LockKey, XID, LockMode)>>,
}

impl InProcessLockManager {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            table: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    fn new_handle(&self) -> LockHandle {
        LockHandle(self.next_handle.fetch_add(1, AtomicOrdering::SeqCst))
    }

    fn locker_of(&self, handle: LockHandle) -> Result<(LockKey, XID, LockMode)> {
        self.handles
            .lock()
            .unwrap()
            .get(&handle)
            .copied()
            .ok_or(Error::InvalidState("unknown lock handle".to_owned()))
    }
}

impl Default for InProcessLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager for InProcessLockManager {
    fn acquire(&self, locker: XID, key: LockKey, mode: LockMode) -> Result<LockResponse> {
        let mut table = self.table.lock().unwrap();
        let slot = table.entry(key).or_insert_with(|| LockSlot {
            holders: Vec::new(),
        });

        // Re-entrant: the same locker already holds a compatible-or-stronger
        // mode on this key.
        if let Some(h) = slot.holders.iter().find(|h| h.locker == locker) {
            if h.mode >= mode {
                return Ok(LockResponse::Granted(h.handle));
            }
        }

        let conflicts = slot
            .holders
            .iter()
            .any(|h| h.locker != locker && !h.mode.compatible_with(mode));

        let handle = self.new_handle();
        if conflicts {
            // Record the waiter's handle so a later retry can find out it
            // was since granted, but do not add it as a holder yet.
            self.handles
                .lock()
                .unwrap()
                .insert(handle, (key, locker, mode));
            return Ok(LockResponse::Blocked(handle));
        }

        slot.holders.push(Holder {
            locker,
            mode,
            handle,
        });
        self.handles
            .lock()
            .unwrap()
            .insert(handle, (key, locker, mode));
        Ok(LockResponse::Granted(handle))
    }

    fn release(&self, handle: LockHandle) -> Result<()> {
        let mut handles = self.handles.lock().unwrap();
        if let Some((key, _, _)) = handles.remove(&handle) {
            let mut table = self.table.lock().unwrap();
            if let Some(slot) = table.get_mut(&key) {
                slot.holders.retain(|h| h.handle != handle);
                if slot.holders.is_empty() {
                    table.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn downgrade(&self, handle: LockHandle, mode: LockMode) -> Result<()> {
        let (key, locker, _) = self.locker_of(handle)?;
        let mut table = self.table.lock().unwrap();
        if let Some(slot) = table.get_mut(&key) {
            if let Some(h) = slot.holders.iter_mut().find(|h| h.handle == handle) {
                h.mode = mode;
            }
        }
        self.handles
            .lock()
            .unwrap()
            .insert(handle, (key, locker, mode));
        Ok(())
    }

    fn couple(&self, old: LockHandle, key: LockKey, mode: LockMode) -> Result<LockResponse> {
        let (_, locker, _) = self.locker_of(old)?;
        let resp = self.acquire(locker, key, mode)?;
        if matches!(resp, LockResponse::Granted(_)) {
            self.release(old)?;
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatible_readers_are_both_granted() {
        let mgr = InProcessLockManager::new();
        let r1 = mgr.acquire(1, 42, LockMode::Read).unwrap();
        let r2 = mgr.acquire(2, 42, LockMode::Read).unwrap();
        assert!(matches!(r1, LockResponse::Granted(_)));
        assert!(matches!(r2, LockResponse::Granted(_)));
    }

    #[test]
    fn writer_blocks_other_locker() {
        let mgr = InProcessLockManager::new();
        let r1 = mgr.acquire(1, 42, LockMode::Write).unwrap();
        assert!(matches!(r1, LockResponse::Granted(_)));
        let r2 = mgr.acquire(2, 42, LockMode::Read).unwrap();
        assert!(matches!(r2, LockResponse::Blocked(_)));
    }

    #[test]
    fn same_locker_reentrant_upgrade() {
        let mgr = InProcessLockManager::new();
        let r1 = mgr.acquire(1, 42, LockMode::Read).unwrap();
        let h1 = match r1 {
            LockResponse::Granted(h) => h,
            _ => panic!("expected granted"),
        };
        mgr.downgrade(h1, LockMode::Write).unwrap();
        let r2 = mgr.acquire(1, 42, LockMode::Write).unwrap();
        assert!(matches!(r2, LockResponse::Granted(_)));
    }

    #[test]
    fn release_frees_slot_for_waiter() {
        let mgr = InProcessLockManager::new();
        let r1 = mgr.acquire(1, 7, LockMode::Write).unwrap();
        let h1 = match r1 {
            LockResponse::Granted(h) => h,
            _ => panic!("expected granted"),
        };
        assert!(matches!(
            mgr.acquire(2, 7, LockMode::Write).unwrap(),
            LockResponse::Blocked(_)
        ));
        mgr.release(h1).unwrap();
        assert!(matches!(
            mgr.acquire(2, 7, LockMode::Write).unwrap(),
            LockResponse::Granted(_)
        ));
    }
}
