//! Shared cursor/scan state machine (§4.9).
//!
//! Both `am::btree::BTreeScanIterator` and the T-tree's fragment cursor
//! need the same thing layered on top of "find the next matching entry":
//! a position that survives across calls, a lock held on whatever entry
//! it currently sits on, and a way to come back from a lock wait without
//! losing that position. `am/btree.rs`'s original scan iterator had none
//! of this -- it only tracked a page buffer and an index into it. This
//! module factors the state machine out so both access methods drive it
//! the same way.
//!
//! Grounded on `am::heap::HeapTuple::is_visible`'s hint-bit-returning
//! shape (a cursor's visibility test is the same "is this version visible
//! to my snapshot" question, just asked once per scan step instead of
//! once per tuple fetch) and on `db_cam.c`'s cursor state machine
//! (`DBC_ACTIVE`, couple-then-lock-then-release-parent descent, and the
//! deferred-delete handling read-committed scans need).

use crate::concurrency::lock_manager::{LockHandle, LockKey, LockManager, LockMode, LockResponse};
use crate::concurrency::XID;
use crate::Result;

/// Where a cursor sits relative to its underlying scan.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CursorState {
    /// Freshly opened, `First`/`Last` not yet requested.
    Invalid,
    /// About to fetch the first entry.
    First,
    /// About to fetch the last entry (backward scan start).
    Last,
    /// Sitting on an entry whose lock is granted and confirmed.
    Current,
    /// An entry was found by the last step but its lock has not yet been
    /// requested.
    Found,
    /// Waiting on `lock_wait_handle`; the scan must not advance until it
    /// resolves.
    Blocked,
    /// Lock for the current entry is granted; safe to hand the entry to
    /// the caller.
    Locked,
    /// About to step forward.
    Next,
    /// Cursor is being torn down; releasing held locks.
    Aborting,
}

/// Tracks one cursor's position, its read-committed/read-modify-write
/// mode, and every lock it is holding on behalf of the scan.
pub struct Cursor {
    state: CursorState,
    read_committed: bool,
    rmw: bool,
    held_scan_locks: Vec<LockHandle>,
    lock_wait_handle: Option<LockHandle>,
    last_key: Option<LockKey>,
}

impl Cursor {
    pub fn new(read_committed: bool, rmw: bool) -> Self {
        Self {
            state: CursorState::Invalid,
            read_committed,
            rmw,
            held_scan_locks: Vec::new(),
            lock_wait_handle: None,
            last_key: None,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn read_committed(&self) -> bool {
        self.read_committed
    }

    /// The lock mode this cursor takes on entries: read-committed scans
    /// and plain read scans take `Read`; a scan opened for update takes
    /// `Write` so a concurrent writer cannot sneak in between the visibility
    /// check and the caller acting on the entry.
    pub fn entry_lock_mode(&self) -> LockMode {
        if self.rmw {
            LockMode::Write
        } else {
            LockMode::Read
        }
    }

    pub fn held_scan_locks(&self) -> &[LockHandle] {
        &self.held_scan_locks
    }

    /// Request a lock on `key` for the entry the scan just landed on.
    /// Read-committed scans release each entry's lock as soon as they step
    /// past it (the caller is expected to call `release_non_current` before
    /// requesting the next one); repeatable-read/serializable scans keep
    /// every lock they acquire in `held_scan_locks` until `close`.
    pub fn acquire(
        &mut self,
        lock_mgr: &dyn LockManager,
        locker: XID,
        key: LockKey,
    ) -> Result<bool> {
        self.state = CursorState::Found;
        match lock_mgr.acquire(locker, key, self.entry_lock_mode())? {
            LockResponse::Granted(handle) => {
                self.state = CursorState::Locked;
                self.last_key = Some(key);
                if self.read_committed {
                    for old in self.held_scan_locks.drain(..) {
                        lock_mgr.release(old)?;
                    }
                }
                self.held_scan_locks.push(handle);
                Ok(true)
            }
            LockResponse::Blocked(handle) => {
                self.state = CursorState::Blocked;
                self.lock_wait_handle = Some(handle);
                Ok(false)
            }
            LockResponse::Refused => Ok(false),
        }
    }

    /// Retry a pending wait. Returns `true` once the lock has been
    /// granted, moving the cursor from `Blocked` to `Locked`.
    pub fn resume(&mut self, lock_mgr: &dyn LockManager, locker: XID) -> Result<bool> {
        let key = match self.last_key {
            Some(key) => key,
            None => return Ok(false),
        };
        if let Some(old) = self.lock_wait_handle.take() {
            match lock_mgr.couple(old, key, self.entry_lock_mode())? {
                LockResponse::Granted(handle) => {
                    self.state = CursorState::Locked;
                    if self.read_committed {
                        for old in self.held_scan_locks.drain(..) {
                            lock_mgr.release(old)?;
                        }
                    }
                    self.held_scan_locks.push(handle);
                    Ok(true)
                }
                LockResponse::Blocked(handle) => {
                    self.lock_wait_handle = Some(handle);
                    Ok(false)
                }
                LockResponse::Refused => Ok(false),
            }
        } else {
            Ok(self.state == CursorState::Locked)
        }
    }

    /// Read-committed scans drop every lock but the one on the entry they
    /// are currently parked on, so a long scan does not accumulate a lock
    /// per row it has already moved past.
    pub fn release_non_current(&mut self, lock_mgr: &dyn LockManager) -> Result<()> {
        if self.read_committed {
            if let Some(&current) = self.held_scan_locks.last() {
                for handle in self.held_scan_locks.drain(..self.held_scan_locks.len() - 1) {
                    lock_mgr.release(handle)?;
                }
                self.held_scan_locks = vec![current];
            }
        }
        Ok(())
    }

    pub fn mark_next(&mut self) {
        self.state = CursorState::Next;
    }

    /// Close the cursor: release every held lock and, if a grant for the
    /// wait handle raced in after we gave up on it, flush that grant too
    /// ("abort-and-confirm") instead of leaking it.
    pub fn close(&mut self, lock_mgr: &dyn LockManager) -> Result<()> {
        self.state = CursorState::Aborting;
        for handle in self.held_scan_locks.drain(..) {
            lock_mgr.release(handle)?;
        }
        if let Some(handle) = self.lock_wait_handle.take() {
            lock_mgr.release(handle)?;
        }
        self.state = CursorState::Invalid;
        Ok(())
    }

    pub fn abort(&mut self, lock_mgr: &dyn LockManager) -> Result<()> {
        self.close(lock_mgr)
    }
}

/// Suppresses re-emitting the same location twice in a row -- a scan that
/// relinks across a T-tree node split, or steps onto a duplicate run
/// boundary, can otherwise land back on the entry it just returned.
pub fn is_repeat<Loc: PartialEq + Copy>(last: &mut Option<Loc>, current: Loc) -> bool {
    let repeat = *last == Some(current);
    *last = Some(current);
    repeat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::InProcessLockManager;

    #[test]
    fn acquire_grants_immediately_when_uncontended() {
        let lm = InProcessLockManager::new();
        let mut cursor = Cursor::new(false, false);
        assert!(cursor.acquire(&lm, 1, 10).unwrap());
        assert_eq!(cursor.state(), CursorState::Locked);
        assert_eq!(cursor.held_scan_locks().len(), 1);
    }

    #[test]
    fn blocked_cursor_resumes_after_release() {
        let lm = InProcessLockManager::new();
        let mut owner = Cursor::new(false, false);
        assert!(owner.acquire(&lm, 1, 10).unwrap());

        let mut waiter = Cursor::new(false, false);
        assert!(!waiter.acquire(&lm, 2, 10).unwrap());
        assert_eq!(waiter.state(), CursorState::Blocked);

        owner.close(&lm).unwrap();
        assert!(waiter.resume(&lm, 2).unwrap());
        assert_eq!(waiter.state(), CursorState::Locked);
    }

    #[test]
    fn read_committed_keeps_only_current_lock() {
        let lm = InProcessLockManager::new();
        let mut cursor = Cursor::new(true, false);
        assert!(cursor.acquire(&lm, 1, 1).unwrap());
        assert!(cursor.acquire(&lm, 1, 2).unwrap());
        assert_eq!(cursor.held_scan_locks().len(), 1);
    }

    #[test]
    fn repeat_suppression() {
        let mut last = None;
        assert!(!is_repeat(&mut last, 5));
        assert!(is_repeat(&mut last, 5));
        assert!(!is_repeat(&mut last, 6));
    }
}
