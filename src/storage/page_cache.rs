use crate::storage::*;
use crate::wal::Wal;
use crate::*;

use lru::LruCache;
use std::{
    collections::{HashMap, HashSet},
    vec::Vec,
};

#[derive(Clone, Copy, Hash, PartialEq, Eq)]
struct PageTag(RelFileRef, ForkType, usize);

pub struct PageCache {
    lru: LruCache<PageTag, usize>,
    page_hash: HashMap<PageTag, usize>,
    page_pool: Vec<PagePtr>,
    cache_capacity: usize,
}

impl PageCache {
    pub fn new(cache_capacity: usize) -> Self {
        PageCache {
            lru: LruCache::new(cache_capacity),
            page_hash: HashMap::new(),
            page_pool: Vec::new(),
            cache_capacity,
        }
    }

    /// Create a new page if the cache is not full. Otherwise select a victim and evict the page
    fn alloc_page(
        &mut self,
        smgr: &StorageManager,
        wal: &Wal,
        rel: RelFileRef,
        fork: ForkType,
        page_num: usize,
    ) -> Result<PagePtr> {
        let tag = PageTag(rel, fork, page_num);

        if self.page_pool.len() < self.cache_capacity {
            let slot = self.page_pool.len();
            let page_ptr = PagePtr::new(rel, fork, page_num, slot);
            self.page_pool.push(page_ptr.clone());
            self.page_hash.insert(tag, slot);

            Ok(page_ptr)
        } else {
            match self.evict(smgr, wal)? {
                Some(page_ptr) => {
                    page_ptr.with_write(|page| {
                        page.set_fork_and_num(tag.0, tag.1, tag.2);
                        page.set_dirty(false);
                        self.page_hash.insert(tag, page.slot());
                        Ok(())
                    })?;

                    Ok(page_ptr.clone())
                }
                None => Err(Error::OutOfMemory),
            }
        }
    }

    pub fn new_page(
        &mut self,
        smgr: &StorageManager,
        wal: &Wal,
        shandle: &StorageHandle,
        rel: RelFileRef,
        fork: ForkType,
    ) -> Result<PinnedPagePtr> {
        let page_num = smgr.file_size_in_page(shandle, fork)?;
        let temp_buf = [0u8; PAGE_SIZE];
        smgr.write(shandle, fork, page_num, &temp_buf)?;
        let page_ptr = self.alloc_page(smgr, wal, rel, fork, page_num)?;

        let (_, pinned_page) = page_ptr.pin()?;
        Ok(pinned_page)
    }

    pub fn fetch_page(
        &mut self,
        smgr: &StorageManager,
        wal: &Wal,
        shandle: &StorageHandle,
        rel: RelFileRef,
        fork: ForkType,
        page_num: usize,
    ) -> Result<PinnedPagePtr> {
        let tag = PageTag(rel, fork, page_num);

        match self.page_hash.get(&tag) {
            Some(slot) => {
                let page_ptr = self.page_pool[*slot].clone();

                let (pin_count, pinned_page) = page_ptr.pin()?;

                if pin_count == 1 {
                    self.lru.pop(&tag);
                }

                Ok(pinned_page)
            }
            None => {
                let page_ptr = self.alloc_page(smgr, wal, rel, fork, page_num)?;
                page_ptr
                    .with_write(|page| smgr.read(shandle, fork, page_num, page.buffer_mut()))?;
                let (_, pinned_page) = page_ptr.pin()?;

                Ok(pinned_page)
            }
        }
    }

    pub fn release_page(&mut self, page_ptr: PinnedPagePtr) -> Result<()> {
        page_ptr.with_write(|page| {
            let pin_count = page.unpin();
            let (file_ref, fork, page_num) = page.get_fork_and_num();
            let slot = page.slot();

            if pin_count == 0 {
                self.lru.put(PageTag(file_ref, fork, page_num), slot);
            }

            Ok(())
        })
    }

    /// Pop the LRU victim and, if it carries unwritten changes, enforce the
    /// write-ahead rule before handing its slot back for reuse: flush the
    /// WAL up to the page's LSN, then write the page back to disk. Losing
    /// this page otherwise means losing whatever mutation last dirtied it.
    fn evict(&mut self, smgr: &StorageManager, wal: &Wal) -> Result<Option<PagePtr>> {
        match self.lru.pop_lru() {
            Some((tag, victim)) => {
                let page_ptr = self.page_pool[victim].clone();

                page_ptr.with_write(|page| {
                    if page.is_dirty() {
                        wal.flush(Some(page.get_lsn()))?;
                        let shandle = smgr.open(tag.0.db, tag.0.rel_id)?;
                        smgr.write(&shandle, tag.1, tag.2, page.buffer())?;
                        page.set_dirty(false);
                    }
                    Ok(())
                })?;

                self.page_hash.remove(&tag);
                Ok(Some(page_ptr))
            }
            None => Ok(None),
        }
    }

    /// Flush every dirty page regardless of LRU position and fsync the
    /// files they belong to. Called by the checkpoint daemon so the redo
    /// point it records is actually safe to start recovery from.
    pub fn sync_pages(&mut self, smgr: &StorageManager, wal: &Wal) -> Result<()> {
        let mut synced_files = HashSet::new();

        for page_ptr in self.page_pool.iter() {
            page_ptr.with_write(|page| {
                if page.is_dirty() {
                    let (file_ref, fork, page_num) = page.get_fork_and_num();
                    wal.flush(Some(page.get_lsn()))?;
                    let shandle = smgr.open(file_ref.db, file_ref.rel_id)?;
                    smgr.write(&shandle, fork, page_num, page.buffer())?;
                    page.set_dirty(false);
                    synced_files.insert((file_ref, fork));
                }
                Ok(())
            })?;
        }

        for (file_ref, fork) in synced_files {
            let shandle = smgr.open(file_ref.db, file_ref.rel_id)?;
            smgr.sync(&shandle, fork)?;
        }

        Ok(())
    }
}
