use crate::{
    concurrency::{
        is_invalid_xid, IsolationLevel, Snapshot, Transaction, TransactionLogRecord,
        TransactionStatus, TransactionTable, XID,
    },
    Result, DB,
};

use std::{
    collections::HashSet,
    fs::DirBuilder,
    path::{Path, PathBuf},
    sync::Mutex,
    time::SystemTime,
};

#[derive(Default)]
struct SnapshotData {
    active_xids: HashSet<XID>,
    latest_completed_xid: XID,
}

pub struct TransactionManager {
    next_xid: Mutex<XID>,
    txn_table: Mutex<TransactionTable>,
    snapshot_data: Mutex<SnapshotData>,
}

impl TransactionManager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !path.as_ref().exists() {
            DirBuilder::new().recursive(true).create(&path)?;
        }

        let txn_table = TransactionTable::open(Self::get_txn_table_path(&path))?;

        Ok(Self {
            next_xid: Mutex::new(1),
            txn_table: Mutex::new(txn_table),
            snapshot_data: Mutex::new(SnapshotData::default()),
        })
    }

    fn get_txn_table_path<P: AsRef<Path>>(path: P) -> PathBuf {
        let mut dir = path.as_ref().to_path_buf();
        dir.push("txn_status");
        dir
    }

    /// Re-align the transaction table's notion of its last page with the
    /// counter's current value; called once at startup.
    pub fn init_state(&self) {
        let xid = *self.next_xid.lock().unwrap();
        self.txn_table.lock().unwrap().init_state(xid);
    }

    pub fn start_transaction(
        &self,
        db: &DB,
        isolation_level: IsolationLevel,
    ) -> Result<Transaction> {
        let xid = self.get_next_xid(db)?;
        self.snapshot_data.lock().unwrap().active_xids.insert(xid);

        Ok(Transaction::new(xid, isolation_level))
    }

    pub fn commit_transaction(&self, db: &DB, txn: &Transaction) -> Result<()> {
        let xid = txn.xid();
        let wal = db.get_wal();

        let commit_log = TransactionLogRecord::create_transaction_commit_log(SystemTime::now());
        let (_, lsn) = wal.append(xid, commit_log)?;
        wal.flush(Some(lsn))?;

        self.txn_table
            .lock()
            .unwrap()
            .set_transaction_status(xid, TransactionStatus::Committed)?;

        self.mark_transaction_end(xid);

        Ok(())
    }

    pub fn get_snapshot<'a>(&self, txn: &'a mut Transaction) -> Result<&'a Snapshot> {
        let need_new = !(txn.uses_transaction_snapshot() && txn.current_snapshot.is_some());

        if need_new {
            let snapshot = self.record_snapshot(txn)?;
            txn.current_snapshot = Some(snapshot);
        }

        Ok(txn.current_snapshot.as_ref().unwrap())
    }

    fn record_snapshot(&self, txn: &Transaction) -> Result<Snapshot> {
        let guard = self.snapshot_data.lock().unwrap();

        let mut xips = Vec::new();
        let mut min_xid = None;
        let mut max_xid = 0;

        for &xid in guard.active_xids.iter() {
            if is_invalid_xid(xid) {
                panic!("invalid XID in active transaction list");
            }

            if xid == txn.xid() {
                continue;
            }

            min_xid = Some(min_xid.map_or(xid, |m: XID| m.min(xid)));
            max_xid = max_xid.max(xid);
            xips.push(xid);
        }

        let min_xid = min_xid.unwrap_or(guard.latest_completed_xid + 1);
        let max_xid = max_xid.max(guard.latest_completed_xid) + 1;

        Ok(Snapshot {
            min_xid,
            max_xid,
            xips,
        })
    }

    fn get_next_xid(&self, db: &DB) -> Result<XID> {
        let mut guard = self.next_xid.lock().unwrap();
        let xid = *guard;

        self.txn_table.lock().unwrap().extend(db, xid)?;
        self.txn_table
            .lock()
            .unwrap()
            .set_transaction_status(xid, TransactionStatus::InProgress)?;

        *guard += 1;
        Ok(xid)
    }

    pub fn read_next_id(&self) -> XID {
        *self.next_xid.lock().unwrap()
    }

    pub fn set_next_xid(&self, xid: XID) {
        *self.next_xid.lock().unwrap() = xid;
    }

    pub fn advance_next_xid_past(&self, xid: XID) {
        let mut guard = self.next_xid.lock().unwrap();
        if *guard <= xid {
            *guard = xid + 1;
        }
    }

    pub fn get_transaction_status(&self, xid: XID) -> Result<TransactionStatus> {
        self.txn_table.lock().unwrap().get_transaction_status(xid)
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.txn_table.lock().unwrap().checkpoint()
    }

    pub fn redo_commit_for_recovery(&self, xid: XID) -> Result<()> {
        self.txn_table
            .lock()
            .unwrap()
            .set_transaction_status(xid, TransactionStatus::Committed)
    }

    pub fn redo_zero_page(&self, page_num: usize) -> Result<()> {
        self.txn_table
            .lock()
            .unwrap()
            .redo_table_zero_page(page_num)
    }

    fn mark_transaction_end(&self, xid: XID) {
        let mut guard = self.snapshot_data.lock().unwrap();
        guard.active_xids.remove(&xid);

        if xid > guard.latest_completed_xid {
            guard.latest_completed_xid = xid;
        }
    }
}
