use crate::{
    am::{BTree, Heap, IndexPtr},
    catalog::{CatalogCache, Schema},
    concurrency::{
        IsolationLevel, InProcessLockManager, LockManager, StateManager, Transaction,
        TransactionManager,
    },
    storage::{BufferManager, RelationWithStorage, StorageManager, TablePtr},
    wal::{CheckpointManager, DBState, Wal, WalConfig},
    DBConfig, Result, OID,
};

use std::{
    fs::DirBuilder,
    rc::Rc,
    sync::{Arc, Mutex},
};

/// Top-level handle to a single database: owns the buffer pool, storage
/// manager, write-ahead log, and the transaction/OID state needed to open
/// tables and indexes on top of them.
pub struct DB {
    bufmgr: BufferManager,
    smgr: Rc<StorageManager>,
    wal: Wal,
    txn_mgr: TransactionManager,
    state_mgr: StateManager,
    ckpt_mgr: Mutex<CheckpointManager>,
    catalog_cache: CatalogCache,
    lock_mgr: Arc<dyn LockManager>,
}

impl DB {
    /// Open (creating if necessary) the database rooted at `config.root_path`,
    /// replaying the WAL if the last shutdown was not clean.
    pub fn open(config: DBConfig) -> Result<Self> {
        DirBuilder::new()
            .recursive(true)
            .create(&config.root_path)?;

        let smgr = Rc::new(StorageManager::new(config.get_storage_path()));
        let bufmgr = BufferManager::new(smgr.clone(), config.cache_capacity);

        let wal_config = WalConfig {
            segment_capacity: config.wal_segment_size,
        };
        let wal = Wal::open(config.get_wal_path(), &wal_config)?;

        let txn_mgr = TransactionManager::open(config.get_txn_path())?;
        txn_mgr.init_state();

        let state_mgr = StateManager::new();
        let ckpt_mgr = CheckpointManager::open(config.get_master_record_path())?;

        let db = Self {
            bufmgr,
            smgr,
            wal,
            txn_mgr,
            state_mgr,
            ckpt_mgr: Mutex::new(ckpt_mgr),
            catalog_cache: CatalogCache::new(),
            lock_mgr: Arc::new(InProcessLockManager::new()),
        };

        db.wal.startup(&db)?;
        db.with_checkpoint_manager(|ckptmgr| ckptmgr.set_db_state(DBState::Running))?;

        log::info!("database opened");

        Ok(db)
    }

    pub fn get_buffer_manager(&self) -> &BufferManager {
        &self.bufmgr
    }

    pub fn get_storage_manager(&self) -> &StorageManager {
        &self.smgr
    }

    pub fn get_wal(&self) -> &Wal {
        &self.wal
    }

    pub fn get_transaction_manager(&self) -> &TransactionManager {
        &self.txn_mgr
    }

    pub fn get_state_manager(&self) -> &StateManager {
        &self.state_mgr
    }

    pub fn get_catalog_cache(&self) -> &CatalogCache {
        &self.catalog_cache
    }

    pub fn get_lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.lock_mgr
    }

    pub fn with_checkpoint_manager<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut CheckpointManager) -> Result<R>,
    {
        let mut guard = self.ckpt_mgr.lock().unwrap();
        f(&mut guard)
    }

    pub fn create_checkpoint(&self) -> Result<()> {
        self.with_checkpoint_manager(|ckptmgr| ckptmgr.create_checkpoint(self))
    }

    pub fn create_table(&self, db_oid: OID, rel_id: OID, schema: Schema) -> Result<TablePtr> {
        let heap = Arc::new(Heap::new(rel_id, db_oid, schema));
        heap.create_storage(&self.smgr)?;

        let table: TablePtr = heap;
        self.catalog_cache.add_table(table.clone());

        Ok(table)
    }

    pub fn create_index(&self, db_oid: OID, rel_id: OID) -> Result<IndexPtr> {
        let btree = Arc::new(BTree::new(rel_id, db_oid));
        btree.create_storage(&self.smgr)?;

        Ok(btree)
    }

    pub fn start_transaction(&self, isolation_level: IsolationLevel) -> Result<Transaction> {
        self.txn_mgr.start_transaction(self, isolation_level)
    }

    pub fn commit_transaction(&self, txn: Transaction) -> Result<()> {
        self.txn_mgr.commit_transaction(self, &txn)
    }
}
