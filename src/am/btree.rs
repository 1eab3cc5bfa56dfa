mod btree_log;
mod btree_page;
pub mod upgrade;

use crate::{
    am::{
        cursor::Cursor,
        duplicate::{self, DuplicateRegistry},
        index::{IndexKeyComparator, IndexScanIterator, IndexScanPredicate},
        Index,
    },
    concurrency::{IsolationLevel, Snapshot, Transaction, XID},
    storage::{
        consts::PAGE_SIZE, DiskPageReader, DiskPageWriter, ForkType, ItemPageReader,
        ItemPageWriter, ItemPointer, PageReadGuard, PageWriteGuard, PinnedPagePtr, RelFileRef,
        RelationWithStorage, ScanDirection, StorageHandle, Table, TuplePtr,
    },
    Error, Relation, RelationEntry, RelationKind, Result, DB, OID,
};

pub(crate) use self::btree_log::BTreeLogRecord;

use self::btree_page::{views::*, BTreePageFlags, BTreePageType};

use ouroboros::self_referencing;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    cmp::Ordering,
    sync::{Arc, Mutex},
};

/// Owns a pinned page together with a read lock on it. The page pin keeps
/// the underlying buffer resident; boxing the pin lets the lock below
/// borrow through a stable address even as this struct itself is moved
/// around (passed into and out of functions while walking the tree).
#[self_referencing]
pub struct OwningPageReadLock {
    page_ptr: Box<PinnedPagePtr>,
    #[borrows(page_ptr)]
    #[covariant]
    page_guard: PageReadGuard<'this>,
}

impl OwningPageReadLock {
    fn buffer(&self) -> &PageBuffer {
        self.borrow_page_guard().buffer()
    }

    fn get_fork_and_num(&self) -> (RelFileRef, ForkType, usize) {
        self.borrow_page_guard().get_fork_and_num()
    }

    fn into_head(self) -> Box<PinnedPagePtr> {
        self.into_heads().page_ptr
    }
}

/// Owns a pinned page together with a write lock on it.
#[self_referencing]
pub struct OwningPageWriteLock {
    page_ptr: Box<PinnedPagePtr>,
    #[borrows(page_ptr)]
    #[covariant]
    page_guard: PageWriteGuard<'this>,
}

impl OwningPageWriteLock {
    fn buffer(&self) -> &PageBuffer {
        self.borrow_page_guard().buffer()
    }

    fn buffer_mut(&mut self) -> &mut PageBuffer {
        self.with_page_guard_mut(|guard| guard.buffer_mut())
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.with_page_guard_mut(|guard| guard.set_dirty(dirty))
    }

    fn get_fork_and_num(&self) -> (RelFileRef, ForkType, usize) {
        self.borrow_page_guard().get_fork_and_num()
    }

    fn into_head(self) -> Box<PinnedPagePtr> {
        self.into_heads().page_ptr
    }
}

fn owning_page_read_lock(page_ptr: PinnedPagePtr) -> OwningPageReadLock {
    OwningPageReadLockBuilder {
        page_ptr: Box::new(page_ptr),
        page_guard_builder: |p: &Box<PinnedPagePtr>| p.read().unwrap(),
    }
    .build()
}

fn owning_page_write_lock(page_ptr: PinnedPagePtr) -> OwningPageWriteLock {
    OwningPageWriteLockBuilder {
        page_ptr: Box::new(page_ptr),
        page_guard_builder: |p: &Box<PinnedPagePtr>| p.write().unwrap(),
    }
    .build()
}

#[derive(Serialize, Deserialize)]
struct IndexTuple<'a> {
    #[serde(borrow)]
    key: Cow<'a, [u8]>,
    item_pointer: ItemPointer,
    /// Set by a logical delete (§4.8): the entry is still physically
    /// present so concurrent readers holding an older snapshot can see it,
    /// but it is no longer a live key and must not be returned to new scans
    /// or matched by a fresh insert's uniqueness check.
    #[serde(default)]
    pending_delete: bool,
}

impl<'a> IndexTuple<'a> {
    fn get_downlink(&self) -> usize {
        self.item_pointer.page_num
    }

    fn set_downlink(&mut self, page_num: usize) {
        self.item_pointer.page_num = page_num;
    }

    fn materialize<'b>(&self) -> IndexTuple<'b> {
        IndexTuple {
            key: Cow::from(self.key.to_vec()),
            item_pointer: self.item_pointer,
            pending_delete: self.pending_delete,
        }
    }
}

type TreePath = Vec<ItemPointer>;

const BTREE_META_PAGE_NUM: usize = 0;

pub struct BTree {
    rel_entry: RelationEntry,
    shandle: Mutex<Option<StorageHandle>>,
    duplicates: DuplicateRegistry,
}

impl BTree {
    pub fn new(rel_id: OID, db: OID) -> Self {
        let rel_entry = RelationEntry::new(rel_id, db, RelationKind::Index);

        Self {
            rel_entry,
            shandle: Mutex::new(None),
            duplicates: DuplicateRegistry::new(),
        }
    }

    // Basically, we need to implement everything twice, once for read and once or write...

    /// Get a page by page number for read.
    fn get_tree_page_read(&self, db: &DB, page_num: Option<usize>) -> Result<OwningPageReadLock> {
        self.with_storage(db.get_storage_manager(), |storage| match page_num {
            Some(page_num) => {
                let page_ptr =
                    db.get_buffer_manager()
                        .fetch_page(db, storage, ForkType::Main, page_num)?;
                Ok(owning_page_read_lock(page_ptr))
            }
            None => {
                let page_ptr = db
                    .get_buffer_manager()
                    .new_page(db, storage, ForkType::Main)?;
                page_ptr.with_write(|page| {
                    let mut page_view = BTreeDataPageViewMut::new(page.buffer_mut());
                    page_view.init_page();
                    Ok(())
                })?;

                Ok(owning_page_read_lock(page_ptr))
            }
        })
    }

    /// Get a page by page number for write.
    fn get_tree_page_write(&self, db: &DB, page_num: Option<usize>) -> Result<OwningPageWriteLock> {
        self.with_storage(db.get_storage_manager(), |storage| match page_num {
            Some(page_num) => {
                let page_ptr =
                    db.get_buffer_manager()
                        .fetch_page(db, storage, ForkType::Main, page_num)?;
                Ok(owning_page_write_lock(page_ptr))
            }
            None => {
                let page_ptr = db
                    .get_buffer_manager()
                    .new_page(db, storage, ForkType::Main)?;
                page_ptr.with_write(|page| {
                    let mut page_view = BTreeDataPageViewMut::new(page.buffer_mut());
                    page_view.init_page();
                    Ok(())
                })?;

                Ok(owning_page_write_lock(page_ptr))
            }
        })
    }

    /// Get the root page for read.
    fn get_root_page_read(&self, db: &DB) -> Result<OwningPageReadLock> {
        let bufmgr = db.get_buffer_manager();

        let meta_page_lock = self.get_tree_page_read(db, Some(BTREE_META_PAGE_NUM))?;
        let meta_page_view = BTreeMetaPageView::new(meta_page_lock.buffer());
        let root_page_num = meta_page_view.get_root();

        if root_page_num == 0 {
            bufmgr.release_page(*OwningPageReadLock::into_head(meta_page_lock))?;

            Err(Error::InvalidState("root page not created".to_owned()))
        } else {
            let root_page_num = meta_page_view.get_root();
            bufmgr.release_page(*OwningPageReadLock::into_head(meta_page_lock))?;

            self.get_tree_page_read(db, Some(root_page_num))
        }
    }

    /// Get the root page for write. Create it if it does not exist.
    fn get_root_page_write(&self, db: &DB) -> Result<OwningPageWriteLock> {
        let bufmgr = db.get_buffer_manager();

        let mut meta_page_lock = self.get_tree_page_write(db, Some(BTREE_META_PAGE_NUM))?;
        let mut meta_page_view = BTreeMetaPageViewMut::new(meta_page_lock.buffer_mut());
        let root_page_num = meta_page_view.get_root();

        if root_page_num == 0 {
            // no root page yet, create it
            let mut root_page_lock = self.get_tree_page_write(db, None)?;
            let (_, _, root_page_num) = root_page_lock.get_fork_and_num();

            // initialize the root page
            let mut root_page_view = BTreeDataPageViewMut::new(root_page_lock.buffer_mut());
            root_page_view.set_prev(0);
            root_page_view.set_next(0);
            root_page_view.set_level(0);
            root_page_view.set_page_type(BTreePageType::Leaf);
            root_page_view.set_as_root();

            // update metadata
            meta_page_view.set_root(root_page_num);
            meta_page_lock.set_dirty(true);

            root_page_lock.set_dirty(true);

            bufmgr.release_page(*OwningPageWriteLock::into_head(meta_page_lock))?;

            Ok(root_page_lock)
        } else {
            let root_page_num = meta_page_view.get_root();
            bufmgr.release_page(*OwningPageWriteLock::into_head(meta_page_lock))?;

            self.get_tree_page_write(db, Some(root_page_num))
        }
    }

    ///  Create a new root node with two children.
    fn new_root(
        &self,
        db: &DB,
        lchild: &OwningPageWriteLock,
        rchild: &OwningPageWriteLock,
    ) -> Result<OwningPageWriteLock> {
        let mut root_page_lock = self.get_tree_page_write(db, None)?;
        let (_, _, root_page_num) = root_page_lock.get_fork_and_num();

        let mut meta_page_lock = self.get_tree_page_write(db, Some(BTREE_META_PAGE_NUM))?;
        let mut meta_page_view = BTreeMetaPageViewMut::new(meta_page_lock.buffer_mut());

        // create tuples for downlinks
        let (_, _, left_page_num) = lchild.get_fork_and_num();
        let (_, _, right_page_num) = rchild.get_fork_and_num();
        let mut left_tuple = IndexTuple {
            key: Cow::from(Vec::new()),
            item_pointer: ItemPointer::default(),
            pending_delete: false,
        };
        left_tuple.set_downlink(left_page_num);
        let left_tuple_buf = bincode::serialize(&left_tuple).unwrap();

        let left_page_view = BTreeDataPageView::new(lchild.buffer());
        let high_key_buf = left_page_view.get_item(left_page_view.high_key_offset());
        let high_key = match bincode::deserialize::<IndexTuple>(high_key_buf) {
            Ok(itup) => itup.key,
            _ => {
                return Err(Error::DataCorrupted(
                    "cannot deserialize index tuple".to_owned(),
                ));
            }
        };
        let mut right_tuple = IndexTuple {
            key: high_key,
            item_pointer: ItemPointer::default(),
            pending_delete: false,
        };
        right_tuple.set_downlink(right_page_num);
        let right_tuple_buf = bincode::serialize(&right_tuple).unwrap();

        // initialize the root page
        let mut root_page_view = BTreeDataPageViewMut::new(root_page_lock.buffer_mut());
        root_page_view.set_prev(0);
        root_page_view.set_next(0);
        root_page_view.set_level(0);
        root_page_view.set_page_type(BTreePageType::Internal);
        root_page_view.set_as_root();

        // update metadata
        meta_page_view.set_root(root_page_num);
        meta_page_lock.set_dirty(true);

        // insert the page pointers into the new root page
        root_page_view.put_item(
            &left_tuple_buf,
            Some(root_page_view.high_key_offset()),
            false,
        )?;
        root_page_view.put_item(
            &right_tuple_buf,
            Some(root_page_view.high_key_offset() + 1),
            false,
        )?;
        root_page_lock.set_dirty(true);

        db.get_buffer_manager()
            .release_page(*OwningPageWriteLock::into_head(meta_page_lock))?;

        Ok(root_page_lock)
    }

    /// Search for the first leaf page containing the key and return the page with read lock.
    fn search_read(
        &self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
    ) -> Result<Option<(OwningPageReadLock, TreePath)>> {
        let mut page_lock = self.get_root_page_read(db)?;
        let mut path = Vec::new();

        loop {
            let (_, _, parent_page_num) = page_lock.get_fork_and_num();
            let page_view = BTreeDataPageView::new(page_lock.buffer());

            if page_view.page_type() == BTreePageType::Leaf {
                break;
            }

            let child_offset = self.binary_search_page(
                &page_view,
                key,
                key_comparator,
                ItemPointer::default(),
                false,
            )?;
            let child_tuple_buf = page_view.get_item(child_offset);
            let child_tuple = match bincode::deserialize::<IndexTuple>(child_tuple_buf) {
                Ok(itup) => itup,
                _ => {
                    return Err(Error::DataCorrupted(
                        "cannot deserialize index tuple".to_owned(),
                    ))
                }
            };
            let child_page_num = child_tuple.get_downlink();
            let child_page_lock = self.get_tree_page_read(db, Some(child_page_num))?;

            // release the lock on current page after acquiring the lock on the child page
            db.get_buffer_manager()
                .release_page(*OwningPageReadLock::into_head(page_lock))?;

            path.push(ItemPointer::new(parent_page_num, child_offset));

            page_lock = child_page_lock;
        }

        Ok(Some((page_lock, path)))
    }

    /// Search for the first leaf page containing the key and return the page with write lock.
    fn search_write(
        &self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
    ) -> Result<(OwningPageWriteLock, TreePath)> {
        let mut page_lock = self.get_root_page_write(db)?;
        let mut path = Vec::new();

        loop {
            let (_, _, parent_page_num) = page_lock.get_fork_and_num();

            let page_view = BTreeDataPageView::new(page_lock.buffer());
            if page_view.page_type() == BTreePageType::Leaf {
                break;
            }

            let child_offset = self.binary_search_page(
                &page_view,
                key,
                key_comparator,
                ItemPointer::default(),
                false,
            )?;
            let child_tuple_buf = page_view.get_item(child_offset);
            let child_tuple = match bincode::deserialize::<IndexTuple>(child_tuple_buf) {
                Ok(itup) => itup,
                _ => {
                    return Err(Error::DataCorrupted(
                        "cannot deserialize index tuple".to_owned(),
                    ));
                }
            };
            let child_page_num = child_tuple.get_downlink();
            let child_page_lock = self.get_tree_page_write(db, Some(child_page_num))?;

            // release the lock on current page after acquiring the lock on the child page
            db.get_buffer_manager()
                .release_page(*OwningPageWriteLock::into_head(page_lock))?;

            path.push(ItemPointer::new(parent_page_num, child_offset));

            page_lock = child_page_lock;
        }

        Ok((page_lock, path))
    }

    /// Compare the given key with a key on the page.
    fn compare_key<P>(
        &self,
        page_view: &P,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_ptr: ItemPointer,
        offset: usize,
    ) -> Result<Ordering>
    where
        P: ItemPageReader + BTreePageReader,
    {
        if page_view.page_type() == BTreePageType::Internal
            && offset == page_view.first_key_offset()
        {
            // the leftmost key in internal nodes is considered to smaller than any other keys in the same node
            return Ok(Ordering::Greater);
        }

        let itup_buf = page_view.get_item(offset);
        let itup = match bincode::deserialize::<IndexTuple>(itup_buf) {
            Ok(itup) => itup,
            _ => {
                return Err(Error::DataCorrupted(
                    "cannot deserialize index tuple".to_owned(),
                ))
            }
        };

        match key_comparator(key, &itup.key)? {
            Ordering::Equal => Ok(item_ptr.cmp(&itup.item_pointer)),
            ord => Ok(ord),
        }
    }

    /// Do a binary search in the page to find the lower bound to insert the key.
    fn binary_search_page<P>(
        &self,
        page_view: &P,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_ptr: ItemPointer,
        next_key: bool,
    ) -> Result<usize>
    where
        P: BTreeDataPageReader,
    {
        let mut low = page_view.first_key_offset();
        let mut high = page_view.num_line_pointers();
        high += 1;

        let cond = if next_key {
            Ordering::Equal
        } else {
            Ordering::Greater
        };

        if low > high {
            // use the first slot if there is no item in the page
            Ok(low)
        } else {
            while low < high {
                let mid = low + (high - low) / 2;

                if self.compare_key(page_view, key, key_comparator, item_ptr, mid)? >= cond {
                    // key > mid
                    low = mid + 1;
                } else {
                    // key <= mid
                    high = mid;
                }
            }

            if page_view.page_type() == BTreePageType::Leaf {
                Ok(low)
            } else {
                Ok(low - 1)
            }
        }
    }
    /// Get the best offset to split the page.
    fn get_split_location<P>(&self, page_view: &P) -> Result<usize>
    where
        P: BTreeDataPageReader,
    {
        Ok(page_view.num_line_pointers() / 2 + 1)
    }

    /// Find the page and offset to insert an index tuple.
    fn get_insert_location(
        &self,
        _db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_ptr: ItemPointer,
        start_page: OwningPageWriteLock,
    ) -> Result<(OwningPageWriteLock, usize)> {
        let page_lock = start_page;

        let page_view = BTreeDataPageView::new(page_lock.buffer());
        let offset = self.binary_search_page(&page_view, key, key_comparator, item_ptr, false)?;
        Ok((page_lock, offset))
    }

    /// Split the target page into the left page and the right page, both write-locked and pinned.
    fn split_page(
        &self,
        db: &DB,
        tuple: &[u8],
        offset: usize,
        page: OwningPageWriteLock,
    ) -> Result<(OwningPageWriteLock, OwningPageWriteLock)> {
        let mut page_lock = page;
        let (_, _, page_num) = page_lock.get_fork_and_num();
        let page_view = BTreeDataPageView::new(page_lock.buffer());

        let first_right = self.get_split_location(&page_view)?;

        // allocate and initialize temp buffer for the left page
        let mut left_page_buffer = *page_lock.buffer();
        let mut left_page_view = BTreeDataPageViewMut::new(&mut left_page_buffer);
        left_page_view.init_page();
        left_page_view.set_flags(page_view.get_flags());
        left_page_view.clear_flags(BTreePageFlags::IS_ROOT);
        left_page_view.set_prev(page_view.get_prev());

        left_page_view.set_lsn(page_view.get_lsn());

        // the high key for the left page is the first key in the right page
        let high_key = if first_right == offset {
            tuple
        } else {
            page_view.get_item(first_right)
        };

        // add the high key to the left page
        let mut left_offset = left_page_view.high_key_offset();
        left_page_view.put_item(high_key, Some(left_offset), false)?;
        left_offset += 1;

        // allocate and initialize the right page
        let mut right_page_lock = self.get_tree_page_write(db, None)?;
        let (_, _, right_page_num) = right_page_lock.get_fork_and_num();
        left_page_view.set_next(right_page_num);
        let mut right_page_view = BTreeDataPageViewMut::new(right_page_lock.buffer_mut());
        right_page_view.set_flags(page_view.get_flags());
        right_page_view.clear_flags(BTreePageFlags::IS_ROOT);
        right_page_view.set_prev(page_num);
        right_page_view.set_next(page_view.get_next());

        // add the high key (if any) to the right page
        let mut right_offset = page_view.high_key_offset();
        if !page_view.is_rightmost() {
            let high_key = page_view.get_item(page_view.high_key_offset());
            right_page_view.put_item(high_key, Some(right_offset), false)?;
            right_offset += 1;
        }

        // copy keys into the two pages
        for i in page_view.first_key_offset()..=page_view.num_line_pointers() {
            let key = page_view.get_item(i);

            if i == offset {
                if offset < first_right {
                    left_page_view.put_item(tuple, Some(left_offset), false)?;
                    left_offset += 1;
                } else {
                    right_page_view.put_item(tuple, Some(right_offset), false)?;
                    right_offset += 1;
                }
            }

            if i < first_right {
                left_page_view.put_item(key, Some(left_offset), false)?;
                left_offset += 1;
            } else {
                right_page_view.put_item(key, Some(right_offset), false)?;
                right_offset += 1;
            }
        }

        // add the new tuple if it is at the end
        if offset > page_view.num_line_pointers() {
            right_page_view.put_item(tuple, Some(right_offset), false)?;
        }

        // fetch the right sibling (if any) to update prev page number
        let mut right_sibling_lock = if page_view.is_rightmost() {
            None
        } else {
            Some(self.get_tree_page_write(db, Some(page_view.get_next()))?)
        };

        // finalize the split
        page_lock
            .buffer_mut()
            .copy_from_slice(&left_page_buffer[..]);

        page_lock.set_dirty(true);
        right_page_lock.set_dirty(true);

        // set the prev page number of the right sibling
        if let Some(lock) = &mut right_sibling_lock {
            let mut rs_page_view = BTreeDataPageViewMut::new(lock.buffer_mut());
            rs_page_view.set_prev(right_page_num);
            lock.set_dirty(true);
        }

        // TODO: WAL

        // release the right sibling
        if let Some(lock) = right_sibling_lock {
            db.get_buffer_manager()
                .release_page(*OwningPageWriteLock::into_head(lock))?;
        }

        Ok((page_lock, right_page_lock))
    }

    /// Split a full page on its own, without merging in a pending insert.
    /// Used by the `needs_split` restart path (§4.7, scenario S3): the
    /// caller has already given up its latch on `tuple`, so there is
    /// nothing to carry across the split -- it just makes room, and the
    /// caller redescends and retries the insert from the top.
    fn split_page_for_space(
        &self,
        db: &DB,
        page: OwningPageWriteLock,
    ) -> Result<(OwningPageWriteLock, OwningPageWriteLock)> {
        let mut page_lock = page;
        let (_, _, page_num) = page_lock.get_fork_and_num();
        let page_view = BTreeDataPageView::new(page_lock.buffer());

        let first_right = self.get_split_location(&page_view)?;

        let mut left_page_buffer = *page_lock.buffer();
        let mut left_page_view = BTreeDataPageViewMut::new(&mut left_page_buffer);
        left_page_view.init_page();
        left_page_view.set_flags(page_view.get_flags());
        left_page_view.clear_flags(BTreePageFlags::IS_ROOT);
        left_page_view.set_prev(page_view.get_prev());
        left_page_view.set_lsn(page_view.get_lsn());

        let high_key = page_view.get_item(first_right);
        let mut left_offset = left_page_view.high_key_offset();
        left_page_view.put_item(high_key, Some(left_offset), false)?;
        left_offset += 1;

        let mut right_page_lock = self.get_tree_page_write(db, None)?;
        let (_, _, right_page_num) = right_page_lock.get_fork_and_num();
        left_page_view.set_next(right_page_num);
        let mut right_page_view = BTreeDataPageViewMut::new(right_page_lock.buffer_mut());
        right_page_view.set_flags(page_view.get_flags());
        right_page_view.clear_flags(BTreePageFlags::IS_ROOT);
        right_page_view.set_prev(page_num);
        right_page_view.set_next(page_view.get_next());

        let mut right_offset = page_view.high_key_offset();
        if !page_view.is_rightmost() {
            let high_key = page_view.get_item(page_view.high_key_offset());
            right_page_view.put_item(high_key, Some(right_offset), false)?;
            right_offset += 1;
        }

        for i in page_view.first_key_offset()..=page_view.num_line_pointers() {
            let key = page_view.get_item(i);
            if i < first_right {
                left_page_view.put_item(key, Some(left_offset), false)?;
                left_offset += 1;
            } else {
                right_page_view.put_item(key, Some(right_offset), false)?;
                right_offset += 1;
            }
        }

        let mut right_sibling_lock = if page_view.is_rightmost() {
            None
        } else {
            Some(self.get_tree_page_write(db, Some(page_view.get_next()))?)
        };

        page_lock.buffer_mut().copy_from_slice(&left_page_buffer[..]);
        page_lock.set_dirty(true);
        right_page_lock.set_dirty(true);

        if let Some(lock) = &mut right_sibling_lock {
            let mut rs_page_view = BTreeDataPageViewMut::new(lock.buffer_mut());
            rs_page_view.set_prev(right_page_num);
            lock.set_dirty(true);
        }

        if let Some(lock) = right_sibling_lock {
            db.get_buffer_manager()
                .release_page(*OwningPageWriteLock::into_head(lock))?;
        }

        Ok((page_lock, right_page_lock))
    }

    /// Insert the tuple into the page at the given location.
    ///
    /// If the page has no room, it returns `Error::NeedsSplit` after
    /// splitting the page and propagating the new separator into the
    /// parent: the caller is expected to release everything it was
    /// holding on this insert and restart the descent from the root.
    fn insert_into_page(
        &self,
        db: &DB,
        tuple: &[u8],
        offset: usize,
        page: OwningPageWriteLock,
        path: TreePath,
    ) -> Result<()> {
        let mut page_lock = page;
        let (_, _, page_num) = page_lock.get_fork_and_num();
        let mut page_view = BTreeDataPageViewMut::new(page_lock.buffer_mut());

        if page_view.get_free_space() < tuple.len() {
            let is_root = page_view.is_root();

            let (left_page_lock, right_page_lock) = self.split_page_for_space(db, page_lock)?;

            self.insert_into_parent(db, path, left_page_lock, right_page_lock, is_root)?;
            Err(Error::NeedsSplit)
        } else {
            page_view.put_item(tuple, Some(offset), false)?;

            let insert_log = BTreeLogRecord::create_btree_insert_log(
                RelFileRef {
                    db: self.rel_db(),
                    rel_id: self.rel_id(),
                },
                ForkType::Main,
                page_num,
                offset,
                tuple,
            );
            let (_, lsn) = db.get_wal().append(XID::default(), insert_log)?;
            page_view.set_lsn(lsn);
            page_lock.set_dirty(true);

            db.get_buffer_manager()
                .release_page(*OwningPageWriteLock::into_head(page_lock))
        }
    }

    /// Walk one step up the path and re-acquire a write lock on the parent page.
    fn walk_up_path(
        &self,
        db: &DB,
        path: TreePath,
        child_page_num: usize,
    ) -> Result<(OwningPageWriteLock, TreePath, ItemPointer)> {
        let bufmgr = db.get_buffer_manager();
        let mut path = path;
        let tail = path.pop();

        match tail {
            Some(ItemPointer {
                mut page_num,
                mut offset,
            }) => loop {
                let parent_lock = self.get_tree_page_write(db, Some(page_num))?;
                let page_view = BTreeDataPageView::new(parent_lock.buffer());
                let min_off = page_view.first_key_offset();
                let max_off = page_view.num_line_pointers();

                offset = std::cmp::max(offset, min_off);
                if offset > max_off {
                    offset = max_off + 1;
                }

                for i in offset..=max_off {
                    let tuple_buf = page_view.get_item(i);
                    let tuple = match bincode::deserialize::<IndexTuple>(tuple_buf) {
                        Ok(itup) => itup,
                        _ => {
                            return Err(Error::DataCorrupted(
                                "cannot deserialize index tuple".to_owned(),
                            ));
                        }
                    };

                    if tuple.get_downlink() == child_page_num {
                        return Ok((parent_lock, path, ItemPointer::new(page_num, i)));
                    }
                }

                for i in (min_off..offset).rev() {
                    let tuple_buf = page_view.get_item(i);
                    let tuple = match bincode::deserialize::<IndexTuple>(tuple_buf) {
                        Ok(itup) => itup,
                        _ => {
                            return Err(Error::DataCorrupted(
                                "cannot deserialize index tuple".to_owned(),
                            ));
                        }
                    };

                    if tuple.get_downlink() == child_page_num {
                        return Ok((parent_lock, path, ItemPointer::new(page_num, i)));
                    }
                }

                if page_view.is_rightmost() {
                    bufmgr.release_page(*OwningPageWriteLock::into_head(parent_lock))?;
                    return Err(Error::DataCorrupted(format!(
                        "cannot re-find parent key for split page {}",
                        child_page_num
                    )));
                }

                page_num = page_view.get_next();
                offset = 0;
                bufmgr.release_page(*OwningPageWriteLock::into_head(parent_lock))?;
            },
            _ => unreachable!(),
        }
    }

    /// Insert the split pages into the parent page.
    fn insert_into_parent(
        &self,
        db: &DB,
        path: TreePath,
        lchild_lock: OwningPageWriteLock,
        rchild_lock: OwningPageWriteLock,
        is_root: bool,
    ) -> Result<()> {
        let bufmgr = db.get_buffer_manager();

        if is_root {
            let root_page_lock = self.new_root(db, &lchild_lock, &rchild_lock)?;
            bufmgr.release_page(*OwningPageWriteLock::into_head(root_page_lock))?;
            bufmgr.release_page(*OwningPageWriteLock::into_head(rchild_lock))?;
            bufmgr.release_page(*OwningPageWriteLock::into_head(lchild_lock))?;
            Ok(())
        } else {
            // prepare the downlink tuple for the right child
            let (_, _, left_page_num) = lchild_lock.get_fork_and_num();
            let (_, _, right_page_num) = rchild_lock.get_fork_and_num();
            let left_page_view = BTreeDataPageView::new(lchild_lock.buffer());
            let high_key_buf = left_page_view.get_item(left_page_view.high_key_offset());
            let high_key = match bincode::deserialize::<IndexTuple>(high_key_buf) {
                Ok(itup) => itup.key,
                _ => {
                    return Err(Error::DataCorrupted(
                        "cannot deserialize index tuple".to_owned(),
                    ));
                }
            };
            let mut right_tuple = IndexTuple {
                key: high_key,
                item_pointer: ItemPointer::default(),
                pending_delete: false,
            };
            right_tuple.set_downlink(right_page_num);
            let right_tuple_buf = bincode::serialize(&right_tuple).unwrap();

            let (parent_lock, path, ItemPointer { offset, .. }) =
                self.walk_up_path(db, path, left_page_num)?;

            bufmgr.release_page(*OwningPageWriteLock::into_head(rchild_lock))?;
            bufmgr.release_page(*OwningPageWriteLock::into_head(lchild_lock))?;

            self.insert_into_page(db, &right_tuple_buf, offset + 1, parent_lock, path)
        }
    }

    fn scan_first<'a>(
        &'a self,
        db: &DB,
        iterator: &mut BTreeScanIterator<'a>,
        dir: ScanDirection,
    ) -> Result<Option<ItemPointer>> {
        // TODO: we treat the key as boundary key, but if it is not, we should start from the first (last) page
        match self.search_read(db, &iterator.start_key[..], &iterator.key_comparator)? {
            None => Ok(None),
            Some((page_lock, _)) => {
                let (_, _, page_num) = page_lock.get_fork_and_num();
                let page_view = BTreeDataPageView::new(page_lock.buffer());
                let offset = self.binary_search_page(
                    &page_view,
                    &iterator.start_key[..],
                    &iterator.key_comparator,
                    ItemPointer::default(),
                    false,
                )?;

                iterator.read_page(&page_view, dir, offset)?;

                db.get_buffer_manager()
                    .release_page(*OwningPageReadLock::into_head(page_lock))?;

                if iterator.items.is_empty() {
                    // no items
                    iterator.invalidate();
                    Ok(None)
                } else {
                    iterator.cur_page_num = Some(page_num);
                    let item_ptr = iterator.current_item_pointer();
                    Ok(item_ptr)
                }
            }
        }
    }

    fn read_next_page(
        &self,
        db: &DB,
        iterator: &mut BTreeScanIterator,
        dir: ScanDirection,
        page_num: usize,
    ) -> Result<Option<ItemPointer>> {
        let mut page_num = page_num;
        match dir {
            ScanDirection::Forward => loop {
                if page_num == 0 {
                    iterator.invalidate();
                    return Ok(None);
                }

                let page_lock = self.get_tree_page_read(db, Some(page_num))?;
                let page_view = BTreeDataPageView::new(page_lock.buffer());

                iterator.read_page(&page_view, dir, page_view.first_key_offset())?;

                if !iterator.items.is_empty() {
                    break;
                }

                page_num = page_view.get_next();
                db.get_buffer_manager()
                    .release_page(*OwningPageReadLock::into_head(page_lock))?;
            },
            ScanDirection::Backward => {
                return Ok(None);
            }
        }

        if iterator.items.is_empty() {
            // no items
            iterator.invalidate();
            Ok(None)
        } else {
            iterator.cur_page_num = Some(page_num);
            let item_ptr = iterator.current_item_pointer();
            Ok(item_ptr)
        }
    }

    /// Step to the next page that contains valid data for a scan.
    fn step_page(
        &self,
        db: &DB,
        iterator: &mut BTreeScanIterator,
        dir: ScanDirection,
    ) -> Result<Option<ItemPointer>> {
        let next_page_num = match dir {
            ScanDirection::Forward => {
                let cur_page = iterator.cur_page.take();
                if let Some(page) = cur_page {
                    db.get_buffer_manager().release_page(page)?;
                }

                iterator.next_page
            }
            ScanDirection::Backward => match iterator.cur_page_num {
                Some(cur_page_num) => cur_page_num,
                _ => unreachable!(),
            },
        };

        self.read_next_page(db, iterator, dir, next_page_num)
    }

    /// Find the leaf entry matching `(key, item_pointer)` exactly and flip
    /// its pending-delete flag (§4.8): the entry stays physically present
    /// -- any reader still holding a snapshot from before this call keeps
    /// seeing it -- until `physical_delete` reclaims the slot.
    fn logical_delete(
        &self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_pointer: ItemPointer,
    ) -> Result<()> {
        let bufmgr = db.get_buffer_manager();
        let (mut page_lock, _path) = self.search_write(db, key, key_comparator)?;
        let (_, _, page_num) = page_lock.get_fork_and_num();

        let offset = {
            let page_view = BTreeDataPageView::new(page_lock.buffer());
            self.binary_search_page(&page_view, key, key_comparator, item_pointer, false)?
        };

        let itup = {
            let page_view = BTreeDataPageView::new(page_lock.buffer());
            if offset > page_view.num_line_pointers() {
                None
            } else {
                let itup_buf = page_view.get_item(offset);
                match bincode::deserialize::<IndexTuple>(itup_buf) {
                    Ok(itup) if itup.key.as_ref() == key && itup.item_pointer == item_pointer => {
                        Some(itup.materialize())
                    }
                    Ok(_) => None,
                    Err(_) => {
                        return Err(Error::DataCorrupted(
                            "cannot deserialize index tuple".to_owned(),
                        ))
                    }
                }
            }
        };

        let mut itup = match itup {
            Some(itup) => itup,
            None => {
                bufmgr.release_page(*OwningPageWriteLock::into_head(page_lock))?;
                return Err(Error::NotFound);
            }
        };

        if itup.pending_delete {
            bufmgr.release_page(*OwningPageWriteLock::into_head(page_lock))?;
            return Err(Error::KeyEmpty);
        }

        itup.pending_delete = true;
        let itup_buf = bincode::serialize(&itup).unwrap();

        {
            let mut page_view = BTreeDataPageViewMut::new(page_lock.buffer_mut());
            page_view.put_item(&itup_buf, Some(offset), true)?;

            let delete_log = BTreeLogRecord::create_btree_delete_log(
                RelFileRef {
                    db: self.rel_db(),
                    rel_id: self.rel_id(),
                },
                ForkType::Main,
                page_num,
                offset,
                &itup_buf,
            );
            let (_, lsn) = db.get_wal().append(XID::default(), delete_log)?;
            page_view.set_lsn(lsn);
        }
        page_lock.set_dirty(true);

        bufmgr.release_page(*OwningPageWriteLock::into_head(page_lock))?;

        self.physical_delete(db, key, key_comparator, item_pointer)
    }

    /// Reclaim the slot of an entry already marked pending-delete, and if
    /// that empties the leaf, detach it from the tree (reverse-split,
    /// scenario S5). A real deployment would leave this to a background
    /// vacuum pass over tombstones; here it runs inline right after
    /// `logical_delete` so no pending-delete entry outlives its own call.
    fn physical_delete(
        &self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_pointer: ItemPointer,
    ) -> Result<()> {
        let bufmgr = db.get_buffer_manager();
        let (mut page_lock, path) = self.search_write(db, key, key_comparator)?;

        let offset = {
            let page_view = BTreeDataPageView::new(page_lock.buffer());
            self.binary_search_page(&page_view, key, key_comparator, item_pointer, false)?
        };

        let found = {
            let page_view = BTreeDataPageView::new(page_lock.buffer());
            if offset > page_view.num_line_pointers() {
                false
            } else {
                let itup_buf = page_view.get_item(offset);
                match bincode::deserialize::<IndexTuple>(itup_buf) {
                    Ok(itup) => {
                        itup.key.as_ref() == key
                            && itup.item_pointer == item_pointer
                            && itup.pending_delete
                    }
                    Err(_) => false,
                }
            }
        };

        if !found {
            // already reclaimed by a concurrent call, or never reached
            // pending-delete -- nothing to do
            return bufmgr.release_page(*OwningPageWriteLock::into_head(page_lock));
        }

        {
            let mut page_view = BTreeDataPageViewMut::new(page_lock.buffer_mut());
            page_view.remove_item(offset)?;
        }
        page_lock.set_dirty(true);

        let (now_empty, is_root) = {
            let page_view = BTreeDataPageView::new(page_lock.buffer());
            (
                page_view.page_type() == BTreePageType::Leaf
                    && page_view.num_line_pointers() < page_view.first_key_offset(),
                page_view.is_root(),
            )
        };

        if now_empty && !is_root {
            self.reverse_split(db, page_lock, path)
        } else {
            bufmgr.release_page(*OwningPageWriteLock::into_head(page_lock))
        }
    }

    /// Detach an emptied leaf from its siblings' prev/next chain and from
    /// its parent's downlink array (the reverse of `split_page`).
    fn reverse_split(&self, db: &DB, page: OwningPageWriteLock, path: TreePath) -> Result<()> {
        let bufmgr = db.get_buffer_manager();
        let mut page_lock = page;
        let (_, _, page_num) = page_lock.get_fork_and_num();

        let (prev, next) = {
            let page_view = BTreeDataPageView::new(page_lock.buffer());
            (page_view.get_prev(), page_view.get_next())
        };

        let (mut parent_lock, _path, ItemPointer { offset, .. }) =
            self.walk_up_path(db, path, page_num)?;

        {
            let mut parent_view = BTreeDataPageViewMut::new(parent_lock.buffer_mut());
            parent_view.remove_item(offset)?;
        }
        parent_lock.set_dirty(true);
        bufmgr.release_page(*OwningPageWriteLock::into_head(parent_lock))?;

        if prev != 0 {
            let mut prev_lock = self.get_tree_page_write(db, Some(prev))?;
            let mut prev_view = BTreeDataPageViewMut::new(prev_lock.buffer_mut());
            prev_view.set_next(next);
            drop(prev_view);
            prev_lock.set_dirty(true);
            bufmgr.release_page(*OwningPageWriteLock::into_head(prev_lock))?;
        }

        if next != 0 {
            let mut next_lock = self.get_tree_page_write(db, Some(next))?;
            let mut next_view = BTreeDataPageViewMut::new(next_lock.buffer_mut());
            next_view.set_prev(prev);
            drop(next_view);
            next_lock.set_dirty(true);
            bufmgr.release_page(*OwningPageWriteLock::into_head(next_lock))?;
        }

        let free_log = BTreeLogRecord::create_btree_page_free_log(
            RelFileRef {
                db: self.rel_db(),
                rel_id: self.rel_id(),
            },
            ForkType::Main,
            page_num,
        );
        let (_, lsn) = db.get_wal().append(XID::default(), free_log)?;

        {
            let mut page_view = BTreeDataPageViewMut::new(page_lock.buffer_mut());
            page_view.set_lsn(lsn);
        }
        page_lock.set_dirty(true);

        bufmgr.release_page(*OwningPageWriteLock::into_head(page_lock))
    }

    /// Insert directly onto the primary page, bypassing the duplicate
    /// registry. Used both by an ordinary insert once a key's run is known
    /// to still live on-page, and by `promote`/`demote` to move entries
    /// across the primary/off-page boundary.
    fn insert_on_page(
        &self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_pointer: ItemPointer,
    ) -> Result<()> {
        loop {
            let (page_lock, path) = self.search_write(db, key, key_comparator)?;

            let itup = IndexTuple {
                key: key.into(),
                item_pointer,
                pending_delete: false,
            };
            let itup_buf = bincode::serialize(&itup).unwrap();

            let (page_lock, offset) =
                self.get_insert_location(db, key, key_comparator, item_pointer, page_lock)?;

            match self.insert_into_page(db, &itup_buf[..], offset, page_lock, path) {
                Err(Error::NeedsSplit) => continue,
                other => return other,
            }
        }
    }

    /// Every on-page entry whose key equals `key` exactly, spanning as
    /// many leaf pages as the run extends across, together with its
    /// pending-delete flag. The building block `get_both`/`count` and
    /// duplicate promotion run on top of.
    fn locate_all_for_key(
        &self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
    ) -> Result<Vec<(ItemPointer, bool)>> {
        let bufmgr = db.get_buffer_manager();
        let (mut page_lock, _path) = match self.search_read(db, key, key_comparator)? {
            Some(found) => found,
            None => return Ok(Vec::new()),
        };

        let mut results = Vec::new();
        let mut offset = {
            let page_view = BTreeDataPageView::new(page_lock.buffer());
            self.binary_search_page(&page_view, key, key_comparator, ItemPointer::default(), false)?
        };

        loop {
            let (maxoff, minoff, next_page) = {
                let page_view = BTreeDataPageView::new(page_lock.buffer());
                (
                    page_view.num_line_pointers(),
                    page_view.first_key_offset(),
                    page_view.get_next(),
                )
            };

            let mut off = std::cmp::max(offset, minoff);
            let mut mismatched = false;

            while off <= maxoff {
                let itup = {
                    let page_view = BTreeDataPageView::new(page_lock.buffer());
                    let itup_buf = page_view.get_item(off);
                    match bincode::deserialize::<IndexTuple>(itup_buf) {
                        Ok(itup) => itup.materialize(),
                        _ => {
                            return Err(Error::DataCorrupted(
                                "cannot deserialize index tuple".to_owned(),
                            ))
                        }
                    }
                };

                if key_comparator(&itup.key, key)? != Ordering::Equal {
                    mismatched = true;
                    break;
                }

                results.push((itup.item_pointer, itup.pending_delete));
                off += 1;
            }

            if mismatched || next_page == 0 {
                bufmgr.release_page(*OwningPageReadLock::into_head(page_lock))?;
                break;
            }

            let next_lock = self.get_tree_page_read(db, Some(next_page))?;
            bufmgr.release_page(*OwningPageReadLock::into_head(page_lock))?;
            page_lock = next_lock;
            offset = 0;
        }

        Ok(results)
    }

    /// Walk to the leftmost leaf of this tree, without relying on a key
    /// comparator (used by `all_live_entries`, which has to work for an
    /// off-page tree keyed by raw encoded item pointers).
    fn get_leftmost_leaf_read(&self, db: &DB) -> Result<OwningPageReadLock> {
        let mut page_lock = self.get_root_page_read(db)?;

        loop {
            let page_type = {
                let page_view = BTreeDataPageView::new(page_lock.buffer());
                page_view.page_type()
            };

            if page_type == BTreePageType::Leaf {
                return Ok(page_lock);
            }

            let child_page_num = {
                let page_view = BTreeDataPageView::new(page_lock.buffer());
                let first_off = page_view.first_key_offset();
                let child_tuple_buf = page_view.get_item(first_off);
                match bincode::deserialize::<IndexTuple>(child_tuple_buf) {
                    Ok(itup) => itup.get_downlink(),
                    _ => {
                        return Err(Error::DataCorrupted(
                            "cannot deserialize index tuple".to_owned(),
                        ))
                    }
                }
            };

            let child_lock = self.get_tree_page_read(db, Some(child_page_num))?;
            db.get_buffer_manager()
                .release_page(*OwningPageReadLock::into_head(page_lock))?;
            page_lock = child_lock;
        }
    }

    /// Dump every live entry across the whole tree, in key order. An
    /// off-page duplicate tree only ever holds the duplicates of a single
    /// promoted key, so a full scan over it is exactly that key's
    /// duplicate set -- this is how `demote` recovers them and how
    /// `count`/scan expansion size an off-page run.
    fn all_live_entries(&self, db: &DB) -> Result<Vec<ItemPointer>> {
        let bufmgr = db.get_buffer_manager();
        let mut page_lock = self.get_leftmost_leaf_read(db)?;
        let mut results = Vec::new();

        loop {
            let (minoff, maxoff, next_page) = {
                let page_view = BTreeDataPageView::new(page_lock.buffer());
                (
                    page_view.first_key_offset(),
                    page_view.num_line_pointers(),
                    page_view.get_next(),
                )
            };

            for off in minoff..=maxoff {
                let page_view = BTreeDataPageView::new(page_lock.buffer());
                let itup_buf = page_view.get_item(off);
                let itup = match bincode::deserialize::<IndexTuple>(itup_buf) {
                    Ok(itup) => itup,
                    _ => {
                        return Err(Error::DataCorrupted(
                            "cannot deserialize index tuple".to_owned(),
                        ))
                    }
                };
                if !itup.pending_delete {
                    results.push(itup.item_pointer);
                }
            }

            if next_page == 0 {
                bufmgr.release_page(*OwningPageReadLock::into_head(page_lock))?;
                break;
            }

            let next_lock = self.get_tree_page_read(db, Some(next_page))?;
            bufmgr.release_page(*OwningPageReadLock::into_head(page_lock))?;
            page_lock = next_lock;
        }

        Ok(results)
    }

    /// Move every live entry for `key` off the primary page into a fresh
    /// off-page tree once its duplicate run passes `ON_PAGE_DUP_LIMIT`,
    /// leaving a single `duplicate {pgno}` marker entry behind.
    fn promote(&self, db: &DB, key: &[u8], key_comparator: &IndexKeyComparator) -> Result<()> {
        let entries = self.locate_all_for_key(db, key, key_comparator)?;

        let off_rel_id = db.get_state_manager().get_next_oid(db)?;
        let off_tree = Arc::new(BTree::new(off_rel_id, self.rel_db()));
        off_tree.create_storage(db.get_storage_manager())?;
        off_tree.build_empty(db)?;

        let raw_cmp = duplicate::raw_comparator();
        for (item_pointer, pending_delete) in &entries {
            if *pending_delete {
                continue;
            }

            match self.logical_delete(db, key, key_comparator, *item_pointer) {
                Ok(()) | Err(Error::NotFound) | Err(Error::KeyEmpty) => {}
                Err(e) => return Err(e),
            }

            off_tree.insert_on_page(
                db,
                &duplicate::encode_item_pointer(*item_pointer),
                &raw_cmp,
                *item_pointer,
            )?;
        }

        self.insert_on_page(db, key, key_comparator, duplicate::marker(off_rel_id))?;
        self.duplicates.insert(key, off_tree);

        Ok(())
    }

    /// Fold an off-page duplicate tree back onto the primary page once its
    /// live entry count drops to `OFF_PAGE_DUP_DEMOTE_LIMIT` or below.
    fn demote(
        &self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        off_rel_id: OID,
    ) -> Result<()> {
        let off_tree = match self.duplicates.remove(key) {
            Some(tree) => tree,
            None => return Ok(()),
        };

        let entries = off_tree.all_live_entries(db)?;

        match self.logical_delete(db, key, key_comparator, duplicate::marker(off_rel_id)) {
            Ok(()) | Err(Error::NotFound) | Err(Error::KeyEmpty) => {}
            Err(e) => return Err(e),
        }

        for item_pointer in entries {
            self.insert_on_page(db, key, key_comparator, item_pointer)?;
        }

        Ok(())
    }

    /// True if `(key, item_pointer)` is present and live, whether the
    /// duplicate run still lives on-page or has been promoted off-page
    /// (grounded in `bt_cursor.c`'s `__bam_c_dup`).
    pub fn get_both(
        &self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_pointer: ItemPointer,
    ) -> Result<bool> {
        if let Some(off_tree) = self.duplicates.get(key) {
            let raw_cmp = duplicate::raw_comparator();
            let matches = off_tree.locate_all_for_key(
                db,
                &duplicate::encode_item_pointer(item_pointer),
                &raw_cmp,
            )?;
            return Ok(matches
                .iter()
                .any(|(ip, pending_delete)| *ip == item_pointer && !pending_delete));
        }

        let matches = self.locate_all_for_key(db, key, key_comparator)?;
        Ok(matches
            .iter()
            .any(|(ip, pending_delete)| *ip == item_pointer && !pending_delete))
    }

    /// Count of live duplicates for `key`, on-page or off-page (grounded in
    /// `bt_cursor.c`'s `__bam_c_count`).
    pub fn count(&self, db: &DB, key: &[u8], key_comparator: &IndexKeyComparator) -> Result<usize> {
        if let Some(off_tree) = self.duplicates.get(key) {
            return Ok(off_tree.all_live_entries(db)?.len());
        }

        Ok(self
            .locate_all_for_key(db, key, key_comparator)?
            .into_iter()
            .filter(|(_, pending_delete)| !pending_delete)
            .count())
    }
}

impl Relation for BTree {
    fn get_relation_entry(&self) -> &RelationEntry {
        &self.rel_entry
    }
}

impl RelationWithStorage for BTree {
    fn get_storage_handle(&self) -> &Mutex<Option<StorageHandle>> {
        &self.shandle
    }
}

impl Index for BTree {
    fn build_empty(&self, db: &DB) -> Result<()> {
        let smgr = db.get_storage_manager();
        self.with_storage(smgr, |storage| {
            let mut buffer = [0u8; PAGE_SIZE];
            let mut meta_view = BTreeMetaPageViewMut::new(&mut buffer);
            meta_view.init_page(0);

            smgr.write(storage, ForkType::Main, BTREE_META_PAGE_NUM, &buffer)?;
            smgr.sync(storage, ForkType::Main)
        })
    }

    fn insert<'a>(
        &'a self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_pointer: ItemPointer,
    ) -> Result<()> {
        // If this key's duplicate run has already been promoted off-page,
        // route straight there instead of touching the primary page.
        if let Some(off_tree) = self.duplicates.get(key) {
            let raw_cmp = duplicate::raw_comparator();
            return off_tree.insert_on_page(
                db,
                &duplicate::encode_item_pointer(item_pointer),
                &raw_cmp,
                item_pointer,
            );
        }

        // `needs_split` restart loop (§4.7 scenario S3) lives in
        // `insert_on_page`, which splits and propagates on our behalf when
        // the leaf has no room, then hands back `NeedsSplit` so it
        // redescends and retries rather than trying to patch up a stale
        // path.
        self.insert_on_page(db, key, key_comparator, item_pointer)?;

        let run_len = self
            .locate_all_for_key(db, key, key_comparator)?
            .into_iter()
            .filter(|(_, pending_delete)| !pending_delete)
            .count();

        if run_len > duplicate::ON_PAGE_DUP_LIMIT {
            self.promote(db, key, key_comparator)?;
        }

        Ok(())
    }

    fn delete<'a>(
        &'a self,
        db: &DB,
        key: &[u8],
        key_comparator: &IndexKeyComparator,
        item_pointer: ItemPointer,
    ) -> Result<()> {
        if let Some(off_tree) = self.duplicates.get(key) {
            let raw_cmp = duplicate::raw_comparator();
            off_tree.delete(
                db,
                &duplicate::encode_item_pointer(item_pointer),
                &raw_cmp,
                item_pointer,
            )?;

            let remaining = off_tree.all_live_entries(db)?.len();
            if remaining <= duplicate::OFF_PAGE_DUP_DEMOTE_LIMIT {
                let off_rel_id = off_tree.rel_id();
                self.demote(db, key, key_comparator, off_rel_id)?;
            }

            return Ok(());
        }

        self.logical_delete(db, key, key_comparator, item_pointer)
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
        let btree_it = BTreeScanIterator {
            btree: &self,
            xid,
            snapshot,
            table,
            key_comparator,
            predicate: None,
            cur_page: None,
            cur_page_num: None,
            next_page: 0,
            start_key: Vec::new(),
            items: Vec::new(),
            item_index: 0,
            off_page_queue: Vec::new(),
            cursor: Cursor::new(read_committed, false),
        };

        Ok(Box::new(btree_it))
    }
}

pub struct BTreeScanIterator<'a> {
    btree: &'a BTree,
    xid: XID,
    snapshot: &'a Snapshot,
    table: &'a dyn Table,
    key_comparator: IndexKeyComparator<'a>,
    predicate: Option<IndexScanPredicate<'a>>,
    cur_page: Option<PinnedPagePtr>,
    cur_page_num: Option<usize>,

    // these members are valid when cur_page_num is not None
    next_page: usize,
    start_key: Vec<u8>,
    items: Vec<IndexTuple<'a>>,
    item_index: usize,

    /// Item pointers pulled from an off-page duplicate tree, pending
    /// delivery, after the primary scan lands on that key's `duplicate
    /// {pgno}` marker entry (§4.10).
    off_page_queue: Vec<ItemPointer>,

    /// Lock-coupled scan state (§4.9): which entries this scan currently
    /// holds a lock on, and whether it is parked waiting for one.
    cursor: Cursor,
}

impl<'a> BTreeScanIterator<'a> {
    fn read_page<P>(&mut self, page_view: &P, dir: ScanDirection, offset: usize) -> Result<()>
    where
        P: BTreeDataPageReader,
    {
        self.items = Vec::new();
        let minoff = page_view.first_key_offset();
        let maxoff = page_view.num_line_pointers();

        self.next_page = page_view.get_next();

        let offsets = match dir {
            ScanDirection::Forward => std::cmp::max(minoff, offset)..=maxoff,
            ScanDirection::Backward => minoff..=std::cmp::min(maxoff, offset),
        };

        for off in offsets {
            let itup_buf = page_view.get_item(off);
            let itup = match bincode::deserialize::<IndexTuple>(itup_buf) {
                Ok(itup) => itup,
                _ => {
                    return Err(Error::DataCorrupted(
                        "cannot deserialize index tuple".to_owned(),
                    ))
                }
            };

            if self.check_predicate(&itup)? {
                self.items.push(itup.materialize());
            }
        }

        match dir {
            ScanDirection::Forward => {
                self.item_index = 0;
            }
            ScanDirection::Backward => {
                self.item_index = if self.items.is_empty() {
                    0
                } else {
                    self.items.len() - 1
                };
            }
        }

        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.cur_page_num.is_some()
    }

    fn invalidate(&mut self) {
        self.cur_page_num = None;
    }

    fn current_item_pointer(&self) -> Option<ItemPointer> {
        if !self.is_valid() || self.item_index >= self.items.len() {
            None
        } else {
            Some(self.items[self.item_index].item_pointer)
        }
    }

    fn scan_next(&mut self, db: &'a DB, dir: ScanDirection) -> Result<Option<ItemPointer>> {
        let step = match dir {
            ScanDirection::Forward => {
                self.item_index += 1;
                self.item_index >= self.items.len()
            }
            ScanDirection::Backward => {
                if self.item_index == 0 {
                    true
                } else {
                    self.item_index -= 1;
                    false
                }
            }
        };

        if step {
            self.btree.step_page(db, self, dir)
        } else {
            Ok(self.current_item_pointer())
        }
    }

    fn next_item_pointer(&mut self, db: &'a DB, dir: ScanDirection) -> Result<Option<ItemPointer>> {
        if self.is_valid() {
            self.scan_next(db, dir)
        } else {
            self.btree.scan_first(db, self, dir)
        }
    }

    fn check_predicate(&self, tuple: &IndexTuple) -> Result<bool> {
        match &self.predicate {
            Some(predicate) => predicate(&tuple.key),
            _ => Err(Error::InvalidState(
                "index scan without predicate".to_owned(),
            )),
        }
    }
}

impl<'a> IndexScanIterator<'a> for BTreeScanIterator<'a> {
    fn rescan(
        &mut self,
        db: &'a DB,
        start_key: &[u8],
        predicate: IndexScanPredicate<'a>,
    ) -> Result<()> {
        let cur_page = self.cur_page.take();
        if let Some(page_ptr) = cur_page {
            db.get_buffer_manager().release_page(page_ptr)?;
        }

        self.cursor.close(db.get_lock_manager().as_ref())?;
        self.start_key = start_key.to_vec();
        self.predicate = Some(predicate);
        self.off_page_queue.clear();
        Ok(())
    }

    fn next(&mut self, db: &'a DB, dir: ScanDirection) -> Result<Option<TuplePtr<'a>>> {
        loop {
            if let Some(item_pointer) = self.off_page_queue.pop() {
                if let Some(tuple) =
                    self.table
                        .fetch_tuple(db, self.xid, self.snapshot, item_pointer)?
                {
                    return Ok(Some(tuple));
                }
                continue;
            }

            let item_pointer = match self.next_item_pointer(db, dir)? {
                Some(item_pointer) => item_pointer,
                _ => {
                    self.cursor.close(db.get_lock_manager().as_ref())?;
                    return Ok(None);
                }
            };

            if duplicate::is_marker(item_pointer) {
                let key = self.items[self.item_index].key.to_vec();
                if let Some(off_tree) = self.btree.duplicates.get(&key) {
                    self.off_page_queue = off_tree.all_live_entries(db)?;
                }
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
    use crate::{
        am::{
            index::{IndexKeyComparator, IndexScanPredicate},
            BTree, Index,
        },
        catalog::Schema,
        concurrency::IsolationLevel,
        storage::{RelationWithStorage, ScanDirection},
        test_util::get_temp_db,
    };

    use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

    #[test]
    fn can_create_btree() {
        let (db, db_dir) = get_temp_db();
        let btree = db.create_index(0, 0).unwrap();
        btree.build_empty(&db).unwrap();

        let mut rel_path = db_dir.path().to_path_buf();
        rel_path.push("base");
        rel_path.push("0");
        rel_path.push("0_0");

        assert!(rel_path.is_file());
        assert!(db_dir.close().is_ok());
    }

    #[test]
    fn can_insert_and_scan_btree() {
        let (db, db_dir) = get_temp_db();
        let mut txn = db.start_transaction(IsolationLevel::ReadCommitted).unwrap();
        let heap = db.create_table(0, 0, Schema::new()).unwrap();
        let btree = db.create_index(0, 1).unwrap();

        btree.build_empty(&db).unwrap();

        let make_key = |a| {
            let mut buf = [0u8; 4];
            (&mut buf[..]).write_u32::<LittleEndian>(a).unwrap();
            buf
        };

        let key_comparator = IndexKeyComparator::new(|a: &[u8], b: &[u8]| {
            let a = LittleEndian::read_u32(a);
            let b = LittleEndian::read_u32(b);
            Ok(a.cmp(&b))
        });

        let predicate = IndexScanPredicate::new(|a: &[u8]| {
            let a = LittleEndian::read_u32(a);
            Ok(a > 50)
        });

        for i in 0..300 {
            let key = make_key(300 - i);
            let item_ptr = heap.insert_tuple(&db, &txn, &key).unwrap();
            assert!(btree.insert(&db, &key, &key_comparator, item_ptr).is_ok());
        }

        {
            let mut iter = btree
                .begin_scan(&db, &mut txn, &*heap, key_comparator)
                .unwrap();
            iter.rescan(&db, &make_key(50), predicate).unwrap();

            let mut count = 0;
            while let Some(tuple) = iter.next(&db, ScanDirection::Forward).unwrap() {
                let a = LittleEndian::read_u32(tuple.get_data());
                assert!(a > 50);
                count += 1;
            }
            assert_eq!(count, 250);
        }

        db.commit_transaction(txn).unwrap();

        assert!(db_dir.close().is_ok());
    }

    #[test]
    fn duplicate_run_promotes_and_demotes_off_page() {
        use std::sync::Arc;

        let (db, db_dir) = get_temp_db();
        let mut txn = db.start_transaction(IsolationLevel::ReadCommitted).unwrap();
        let heap = db.create_table(0, 0, Schema::new()).unwrap();

        let btree = Arc::new(BTree::new(1, 0));
        btree.create_storage(db.get_storage_manager()).unwrap();
        btree.build_empty(&db).unwrap();

        let key_comparator = IndexKeyComparator::new(|a: &[u8], b: &[u8]| Ok(a.cmp(b)));
        let dup_key = b"same-key";

        let mut item_pointers = Vec::new();
        for _ in 0..super::duplicate::ON_PAGE_DUP_LIMIT + 1 {
            let item_ptr = heap.insert_tuple(&db, &txn, dup_key).unwrap();
            btree.insert(&db, dup_key, &key_comparator, item_ptr).unwrap();
            item_pointers.push(item_ptr);
        }

        // the run crossed ON_PAGE_DUP_LIMIT, so it should already be
        // promoted off-page
        assert_eq!(
            btree.count(&db, dup_key, &key_comparator).unwrap(),
            item_pointers.len()
        );
        for item_ptr in &item_pointers {
            assert!(btree
                .get_both(&db, dup_key, &key_comparator, *item_ptr)
                .unwrap());
        }

        // deleting down to the demote threshold folds the run back on-page
        while item_pointers.len() > super::duplicate::OFF_PAGE_DUP_DEMOTE_LIMIT {
            let item_ptr = item_pointers.pop().unwrap();
            btree.delete(&db, dup_key, &key_comparator, item_ptr).unwrap();
        }

        assert_eq!(
            btree.count(&db, dup_key, &key_comparator).unwrap(),
            item_pointers.len()
        );
        for item_ptr in &item_pointers {
            assert!(btree
                .get_both(&db, dup_key, &key_comparator, *item_ptr)
                .unwrap());
        }

        db.commit_transaction(txn).unwrap();
        assert!(db_dir.close().is_ok());
    }
}
