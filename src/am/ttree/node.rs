use crate::storage::ItemPointer;

/// Per-node bucket capacity (§4.4): a T-tree node holds a small sorted
/// run of entries so one pointer chase covers several neighbouring
/// keys at once, the way `DbtuxNode`'s fixed `TreeEnt` array does for a
/// single ordered-index node.
pub(crate) const NODE_CAPACITY: usize = 8;

#[derive(Clone)]
pub(crate) struct Entry {
    pub key: Vec<u8>,
    pub item_pointer: ItemPointer,
    /// Set by a logical delete; the entry is reclaimed by a later
    /// physical delete pass, same convention as the on-disk b-tree.
    pub pending_delete: bool,
}

pub(crate) struct TreeNode {
    pub entries: Vec<Entry>,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub parent: Option<usize>,
    /// AVL balance factor: height(right) - height(left), kept in
    /// {-1, 0, 1} except transiently while a rotation is pending.
    pub balance: i8,
    /// Cached bytes of the node's minimum entry, refreshed whenever that
    /// entry changes -- the counterpart of `setNodePref`.
    pub prefix: Vec<u8>,
}

impl TreeNode {
    pub fn new(entry: Entry) -> Self {
        let prefix = entry.key.clone();
        Self {
            entries: vec![entry],
            left: None,
            right: None,
            parent: None,
            balance: 0,
            prefix,
        }
    }

    pub fn min_key(&self) -> &[u8] {
        &self.entries[0].key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.entries[self.entries.len() - 1].key
    }

    pub fn refresh_prefix(&mut self) {
        self.prefix = self.entries[0].key.clone();
    }
}

/// Node arena with a fragment-local free list, mirroring `allocNode` /
/// `freeNode` / `deleteNode`'s habit of keeping one spare node around so
/// a delete that empties a node doesn't force an allocation the next
/// time one is needed.
pub(crate) struct NodeArena {
    slots: Vec<Option<TreeNode>>,
    free_list: Vec<usize>,
    spare: Option<usize>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            spare: None,
        }
    }

    pub fn alloc(&mut self, node: TreeNode) -> usize {
        if let Some(idx) = self.spare.take() {
            self.slots[idx] = Some(node);
            return idx;
        }
        if let Some(idx) = self.free_list.pop() {
            self.slots[idx] = Some(node);
            idx
        } else {
            self.slots.push(Some(node));
            self.slots.len() - 1
        }
    }

    pub fn free(&mut self, idx: usize) {
        self.slots[idx] = None;
        if self.spare.is_none() {
            self.spare = Some(idx);
        } else {
            self.free_list.push(idx);
        }
    }

    pub fn get(&self, idx: usize) -> &TreeNode {
        self.slots[idx].as_ref().expect("dangling T-tree node index")
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut TreeNode {
        self.slots[idx].as_mut().expect("dangling T-tree node index")
    }
}
