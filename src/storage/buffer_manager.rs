use crate::storage::page_cache::*;
use crate::storage::*;
use crate::DB;

use std::{option::Option, rc::Rc, sync::Mutex};

pub struct BufferManager {
    smgr: Rc<StorageManager>,
    page_cache: Mutex<PageCache>,
}

impl BufferManager {
    pub fn new(smgr: Rc<StorageManager>, cache_capacity: usize) -> Self {
        let page_cache = Mutex::new(PageCache::new(cache_capacity));

        Self { smgr, page_cache }
    }

    pub fn new_page(&self, db: &DB, shandle: &StorageHandle, fork: ForkType) -> Result<PinnedPagePtr> {
        self.page_cache.lock().unwrap().new_page(
            &self.smgr,
            db.get_wal(),
            shandle,
            shandle.file_ref(),
            fork,
        )
    }

    pub fn fetch_page(
        &self,
        db: &DB,
        shandle: &StorageHandle,
        fork: ForkType,
        page_num: usize,
    ) -> Result<PinnedPagePtr> {
        self.page_cache.lock().unwrap().fetch_page(
            &self.smgr,
            db.get_wal(),
            shandle,
            shandle.file_ref(),
            fork,
            page_num,
        )
    }

    pub fn release_page(&self, page_ptr: PinnedPagePtr) -> Result<()> {
        self.page_cache.lock().unwrap().release_page(page_ptr)
    }

    pub fn sync_pages(&self, db: &DB) -> Result<()> {
        self.page_cache
            .lock()
            .unwrap()
            .sync_pages(&self.smgr, db.get_wal())
    }
}
