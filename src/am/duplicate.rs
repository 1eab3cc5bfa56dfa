//! On-page <-> off-page duplicate promotion and demotion (SPEC_FULL.md
//! SS4.7/SS4.10). Grounded in `original_source/storage/bdb/db/db_cam.c`'s
//! duplicate cursor handling (`__db_ditem`, the duplicate-run branches of
//! `__dbc_put`) and `original_source/bdb/btree/bt_cursor.c`'s
//! `__bam_c_dup`/`__bam_c_count`: a key's duplicates start out packed
//! inline on the leaf page and move into their own subtree once the run
//! grows past a threshold, leaving the leaf holding only a marker that
//! points at the subtree.
//!
//! Here the subtree is a full second `BTree` fragment rather than a
//! literal on-disk page format, and the marker is encoded by reusing the
//! entry's `ItemPointer` (`page_num` becomes the off-page tree's relation
//! id, `offset` is a sentinel) rather than a distinct leaf entry kind --
//! the existing `IndexTuple` wire shape did not need to change. Which keys
//! are currently promoted is tracked only in memory and does not survive a
//! restart.

use crate::{am::btree::BTree, am::index::IndexKeyComparator, storage::ItemPointer, OID};

use byteorder::{BigEndian, ByteOrder};

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Number of live on-page entries a key's duplicate run can carry before
/// it is promoted into its own off-page tree.
pub const ON_PAGE_DUP_LIMIT: usize = 8;

/// Once an off-page duplicate tree's live entry count drops to this or
/// below, its run is folded back onto the primary page.
pub const OFF_PAGE_DUP_DEMOTE_LIMIT: usize = 2;

/// Sentinel offset marking a primary-index entry as a `duplicate {pgno}`
/// leaf rather than an ordinary `key_data` entry.
pub(crate) const OFFPAGE_MARKER_OFFSET: usize = usize::MAX;

pub(crate) fn is_marker(item_pointer: ItemPointer) -> bool {
    item_pointer.offset == OFFPAGE_MARKER_OFFSET
}

pub(crate) fn marker(off_page_rel_id: OID) -> ItemPointer {
    ItemPointer::new(off_page_rel_id as usize, OFFPAGE_MARKER_OFFSET)
}

/// Encodes an `ItemPointer` as a sortable byte string so it can serve as
/// the key space of an off-page duplicate tree, where each entry is one
/// duplicate of the promoted key, distinguished by which row it points at.
pub(crate) fn encode_item_pointer(item_pointer: ItemPointer) -> Vec<u8> {
    let mut buf = [0u8; 16];
    BigEndian::write_u64(&mut buf[0..8], item_pointer.page_num as u64);
    BigEndian::write_u64(&mut buf[8..16], item_pointer.offset as u64);
    buf.to_vec()
}

pub(crate) fn raw_comparator<'a>() -> IndexKeyComparator<'a> {
    IndexKeyComparator::new(|a: &[u8], b: &[u8]| Ok(a.cmp(b)))
}

/// Tracks which keys of a primary index currently have their duplicate run
/// promoted off-page, and the tree fragment that holds it.
pub struct DuplicateRegistry {
    off_page: Mutex<HashMap<Vec<u8>, Arc<BTree>>>,
}

impl DuplicateRegistry {
    pub fn new() -> Self {
        Self {
            off_page: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Arc<BTree>> {
        self.off_page.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: &[u8], tree: Arc<BTree>) {
        self.off_page.lock().unwrap().insert(key.to_vec(), tree);
    }

    pub(crate) fn remove(&self, key: &[u8]) -> Option<Arc<BTree>> {
        self.off_page.lock().unwrap().remove(key)
    }
}

impl Default for DuplicateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
