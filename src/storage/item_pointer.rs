use serde::{Deserialize, Serialize};

use std::cmp::Ordering;

/// Opaque tuple/entry address: `(page_id, page_offset)` per §3 `TupLoc`.
///
/// `offset` indexes into a page's item directory (a heap line pointer or a
/// B-tree entry slot), not a raw byte offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemPointer {
    pub page_num: usize,
    pub offset: usize,
}

impl ItemPointer {
    pub fn new(page_num: usize, offset: usize) -> Self {
        Self { page_num, offset }
    }

    /// The sentinel `null_tup_loc`: never a valid address, since page 0 is
    /// always the meta page.
    pub fn is_null(&self) -> bool {
        self.page_num == 0
    }
}

impl PartialOrd for ItemPointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ItemPointer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.page_num, self.offset).cmp(&(other.page_num, other.offset))
    }
}
