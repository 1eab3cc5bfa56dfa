use std::path::{Path, PathBuf};

use crate::storage::consts::{DESC_PAGE_WORDS, PAGE_SIZE};

const DEFAULT_ROOT_PATH: &str = "suziQ";

/// Default WAL segment size: 16 MiB, matching the teacher's physical log
/// chunking granularity (§4.1 "Physical log, segment-file based").
const DEFAULT_WAL_SEGMENT_SIZE: usize = 16 * 1024 * 1024;

/// Checkpoint daemon fires when this many pages have been dirtied since
/// the last checkpoint, or `checkpoint_interval_secs` has elapsed,
/// whichever comes first (§6 "checkpoint daemon CLI").
const DEFAULT_CHECKPOINT_DIRTY_PAGES: usize = 1024;
const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 300;

pub struct DBConfig {
    pub cache_capacity: usize,
    pub root_path: PathBuf,
    pub page_size: usize,
    pub desc_page_words: usize,
    pub wal_segment_size: usize,
    pub checkpoint_dirty_pages: usize,
    pub checkpoint_interval_secs: u64,
}

impl Default for DBConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 4096,
            root_path: PathBuf::from(DEFAULT_ROOT_PATH),
            page_size: PAGE_SIZE,
            desc_page_words: DESC_PAGE_WORDS,
            wal_segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            checkpoint_dirty_pages: DEFAULT_CHECKPOINT_DIRTY_PAGES,
            checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL_SECS,
        }
    }
}

impl DBConfig {
    pub fn new() -> Self {
        DBConfig::default()
    }

    pub fn root_path<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.root_path = p.as_ref().to_path_buf();
        self
    }

    pub fn cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn desc_page_words(mut self, desc_page_words: usize) -> Self {
        self.desc_page_words = desc_page_words;
        self
    }

    pub fn wal_segment_size(mut self, wal_segment_size: usize) -> Self {
        self.wal_segment_size = wal_segment_size;
        self
    }

    pub fn checkpoint_dirty_pages(mut self, checkpoint_dirty_pages: usize) -> Self {
        self.checkpoint_dirty_pages = checkpoint_dirty_pages;
        self
    }

    pub fn checkpoint_interval_secs(mut self, checkpoint_interval_secs: u64) -> Self {
        self.checkpoint_interval_secs = checkpoint_interval_secs;
        self
    }

    pub fn get_storage_path(&self) -> PathBuf {
        let mut path = self.root_path.clone();
        path.push("base");
        path
    }

    pub fn get_wal_path(&self) -> PathBuf {
        let mut path = self.root_path.clone();
        path.push("wal");
        path
    }

    pub fn get_txn_path(&self) -> PathBuf {
        let mut path = self.root_path.clone();
        path.push("txn");
        path
    }

    pub fn get_master_record_path(&self) -> PathBuf {
        let mut path = self.root_path.clone();
        path.push("master");
        path
    }
}
