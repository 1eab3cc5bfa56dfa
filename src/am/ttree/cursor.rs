use crate::{am::index::IndexKeyComparator, storage::ItemPointer, Result};

use super::tree::Tree;

/// Scan position tracked purely by the last entry returned, not by a raw
/// `(node, slot)` pair: a structural change elsewhere in the tree (an
/// overflowing bucket spilling into a new right child, a rotation, a
/// node deletion) can move every node index around, so the cursor
/// always re-locates from the key+pointer it last handed out instead of
/// trusting a stale position (§4.4-4.5 scan relink).
pub(crate) struct TTreeCursor {
    start_key: Option<Vec<u8>>,
    last: Option<(Vec<u8>, ItemPointer)>,
    forward_done: bool,
    backward_done: bool,
}

impl TTreeCursor {
    pub fn new() -> Self {
        Self {
            start_key: None,
            last: None,
            forward_done: false,
            backward_done: false,
        }
    }

    pub fn rescan(&mut self, start_key: &[u8]) {
        self.start_key = Some(start_key.to_vec());
        self.last = None;
        self.forward_done = false;
        self.backward_done = false;
    }

    pub fn next(
        &mut self,
        tree: &Tree,
        cmp: &IndexKeyComparator,
    ) -> Result<Option<(ItemPointer, Vec<u8>, bool)>> {
        if self.forward_done {
            return Ok(None);
        }

        let found = match &self.last {
            Some((key, item_pointer)) => tree.successor_of(cmp, key, *item_pointer)?,
            None => match &self.start_key {
                Some(key) => tree.lower_bound(cmp, key)?,
                None => tree.first(),
            },
        };

        match found {
            Some((idx, pos)) => {
                let entry = tree.entry(idx, pos);
                self.last = Some((entry.key.clone(), entry.item_pointer));
                Ok(Some((entry.item_pointer, entry.key.clone(), entry.pending_delete)))
            }
            None => {
                self.forward_done = true;
                Ok(None)
            }
        }
    }

    pub fn prev(
        &mut self,
        tree: &Tree,
        cmp: &IndexKeyComparator,
    ) -> Result<Option<(ItemPointer, Vec<u8>, bool)>> {
        if self.backward_done {
            return Ok(None);
        }

        let found = match &self.last {
            Some((key, item_pointer)) => tree.predecessor_of(cmp, key, *item_pointer)?,
            None => match &self.start_key {
                Some(key) => tree.upper_bound_rev(cmp, key)?,
                None => tree.last(),
            },
        };

        match found {
            Some((idx, pos)) => {
                let entry = tree.entry(idx, pos);
                self.last = Some((entry.key.clone(), entry.item_pointer));
                Ok(Some((entry.item_pointer, entry.key.clone(), entry.pending_delete)))
            }
            None => {
                self.backward_done = true;
                Ok(None)
            }
        }
    }
}
