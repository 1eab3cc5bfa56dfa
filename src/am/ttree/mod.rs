mod cursor;
mod node;
mod tree;

use crate::{
    am::{
        cursor::Cursor,
        index::{Index, IndexKeyComparator, IndexScanIterator, IndexScanPredicate},
    },
    concurrency::{IsolationLevel, Snapshot, Transaction, XID},
    storage::{ItemPointer, ScanDirection, Table, TuplePtr},
    Relation, RelationEntry, RelationKind, Result, DB, OID,
};

use self::{cursor::TTreeCursor, tree::Tree};

use std::sync::Mutex;

/// In-memory T-tree fragment index (§4.4-4.5). Unlike `BTree`, a fragment
/// holds no pages and writes no WAL records of its own -- it lives for the
/// process lifetime and is expected to be rebuilt from the owning table on
/// restart, the same way the original keeps its ordered index fragments
/// purely in `DBTUX` memory.
pub struct TTree {
    rel_entry: RelationEntry,
    tree: Mutex<Tree>,
}

impl TTree {
    pub fn new(rel_id: OID, db: OID) -> Self {
        Self {
            rel_entry: RelationEntry::new(rel_id, db, RelationKind::Index),
            tree: Mutex::new(Tree::new()),
        }
    }
}

impl Relation for TTree {
    fn get_relation_entry(&self) -> &RelationEntry {
        &self.rel_entry
    }
}

impl Index for TTree {
    fn build_empty(&self, _db: &DB) -> Result<()> {
        // Nothing on disk to initialize: a fragment starts life as an
        // empty in-memory tree.
        Ok(())
    }

    fn insert<'a>(
        &'a self,
        _db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_pointer: ItemPointer,
    ) -> Result<()> {
        let mut tree = self.tree.lock().unwrap();
        tree.insert(key_comparator, key, item_pointer)
    }

    fn delete<'a>(
        &'a self,
        _db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_pointer: ItemPointer,
    ) -> Result<()> {
        // No reader can hold a snapshot predating an in-memory fragment
        // entry the way it can for a WAL-logged disk page, so the logical
        // and physical halves of the delete run back to back (§4.8).
        let mut tree = self.tree.lock().unwrap();
        tree.logical_delete(key_comparator, key, item_pointer)?;
        tree.physical_delete(key_comparator, key, item_pointer)
    }

    fn begin_scan<'a>(
        &'a self,
        db: &DB,
        txn: &'a mut Transaction,
        table: &'a dyn Table,
        key_comparator: IndexKeyComparator<'a>,
    ) -> Result<Box<dyn IndexScanIterator<'a> + 'a>> {
        let xid = txn.xid();
        let snapshot = db.get_transaction_manager().get_snapshot(txn)?;
        let read_committed = matches!(txn.isolation_level(), IsolationLevel::ReadCommitted);

        let it = TTreeScanIterator {
            ttree: self,
            xid,
            snapshot,
            table,
            key_comparator,
            predicate: None,
            scan_cursor: TTreeCursor::new(),
            cursor: Cursor::new(read_committed, false),
        };

        Ok(Box::new(it))
    }
}

pub struct TTreeScanIterator<'a> {
    ttree: &'a TTree,
    xid: XID,
    snapshot: &'a Snapshot,
    table: &'a dyn Table,
    key_comparator: IndexKeyComparator<'a>,
    predicate: Option<IndexScanPredicate<'a>>,

    /// Relinking scan position over the tree (§4.4-4.5 scan relink).
    scan_cursor: TTreeCursor,

    /// Lock-coupled cursor state (§4.9): which entry, if any, this scan
    /// currently holds a lock on.
    cursor: Cursor,
}

impl<'a> TTreeScanIterator<'a> {
    fn check_predicate(&self, key: &[u8]) -> Result<bool> {
        match &self.predicate {
            Some(predicate) => predicate(key),
            None => Err(crate::Error::InvalidState(
                "index scan without predicate".to_owned(),
            )),
        }
    }
}

impl<'a> IndexScanIterator<'a> for TTreeScanIterator<'a> {
    fn rescan(
        &mut self,
        db: &'a DB,
        start_key: &[u8],
        predicate: IndexScanPredicate<'a>,
    ) -> Result<()> {
        self.cursor.close(db.get_lock_manager().as_ref())?;
        self.scan_cursor.rescan(start_key);
        self.predicate = Some(predicate);
        Ok(())
    }

    fn next(&mut self, db: &'a DB, dir: ScanDirection) -> Result<Option<TuplePtr<'a>>> {
        loop {
            let found = {
                let tree = self.ttree.tree.lock().unwrap();
                match dir {
                    ScanDirection::Forward => self.scan_cursor.next(&tree, &self.key_comparator)?,
                    ScanDirection::Backward => self.scan_cursor.prev(&tree, &self.key_comparator)?,
                }
            };

            let (item_pointer, key, _pending_delete) = match found {
                Some(entry) => entry,
                None => {
                    self.cursor.close(db.get_lock_manager().as_ref())?;
                    return Ok(None);
                }
            };

            if !self.check_predicate(&key)? {
                continue;
            }

            let lock_mgr = db.get_lock_manager().as_ref();
            let lock_key = item_pointer.page_num as u64;
            if !self.cursor.acquire(lock_mgr, self.xid, lock_key)? {
                // Parked in `Blocked`; retry the couple until the holder
                // releases. There is no real waiter queue in-process, so
                // this just spins the lock manager's own retry path.
                while !self.cursor.resume(lock_mgr, self.xid)? {}
            }
            self.cursor.release_non_current(lock_mgr)?;

            if let Some(tuple) =
                self.table
                    .fetch_tuple(db, self.xid, self.snapshot, item_pointer)?
            {
                return Ok(Some(tuple));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        am::index::{IndexKeyComparator, IndexScanPredicate},
        catalog::Schema,
        concurrency::IsolationLevel,
        storage::ScanDirection,
        test_util::get_temp_db,
    };

    fn byte_cmp<'a>() -> IndexKeyComparator<'a> {
        IndexKeyComparator::new(|a: &[u8], b: &[u8]| Ok(a.cmp(b)))
    }

    #[test]
    fn insert_then_scan_returns_matching_tuples() {
        let (db, db_dir) = get_temp_db();
        let mut txn = db.start_transaction(IsolationLevel::ReadCommitted).unwrap();
        let heap = db.create_table(0, 0, Schema::new()).unwrap();

        let ttree = TTree::new(1, 0);
        ttree.build_empty(&db).unwrap();

        for i in 0..10u8 {
            let ptr = heap.insert_tuple(&db, &txn, &[i]).unwrap();
            ttree.insert(&db, &[i], &byte_cmp(), ptr).unwrap();
        }

        let predicate = IndexScanPredicate::new(|_: &[u8]| Ok(true));
        let mut scan = ttree
            .begin_scan(&db, &mut txn, &*heap, byte_cmp())
            .unwrap();
        scan.rescan(&db, &[0], predicate).unwrap();

        let mut seen = 0;
        while let Some(tuple) = scan.next(&db, ScanDirection::Forward).unwrap() {
            assert_eq!(tuple.get_data().len(), 1);
            seen += 1;
        }
        assert_eq!(seen, 10);

        db.commit_transaction(txn).unwrap();
        assert!(db_dir.close().is_ok());
    }

    #[test]
    fn logical_delete_then_physical_delete_removes_entry() {
        let (db, db_dir) = get_temp_db();
        let mut txn = db.start_transaction(IsolationLevel::ReadCommitted).unwrap();
        let heap = db.create_table(0, 0, Schema::new()).unwrap();

        let ttree = TTree::new(1, 0);
        ttree.build_empty(&db).unwrap();

        let ptr = heap.insert_tuple(&db, &txn, &[5]).unwrap();
        ttree.insert(&db, &[5], &byte_cmp(), ptr).unwrap();
        ttree.delete(&db, &[5], &byte_cmp(), ptr).unwrap();

        let predicate = IndexScanPredicate::new(|_: &[u8]| Ok(true));
        let mut scan = ttree
            .begin_scan(&db, &mut txn, &*heap, byte_cmp())
            .unwrap();
        scan.rescan(&db, &[0], predicate).unwrap();
        assert!(scan.next(&db, ScanDirection::Forward).unwrap().is_none());

        db.commit_transaction(txn).unwrap();
        assert!(db_dir.close().is_ok());
    }
}
