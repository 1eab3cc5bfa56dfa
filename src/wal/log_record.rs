use crate::{
    am::{BTreeLogRecord, HeapLogRecord},
    concurrency::{TransactionLogRecord, XID},
    wal::{LogPointer, WalLogRecord},
    Result, DB,
};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub enum LogRecord<'a> {
    #[serde(borrow)]
    Heap(HeapLogRecord<'a>),
    #[serde(borrow)]
    Btree(BTreeLogRecord<'a>),
    Transaction(TransactionLogRecord),
    Wal(WalLogRecord),
}

impl<'a> LogRecord<'a> {
    pub fn create_heap_record(heap_log_record: HeapLogRecord) -> LogRecord {
        LogRecord::Heap(heap_log_record)
    }

    pub fn create_btree_record(btree_log_record: BTreeLogRecord) -> LogRecord {
        LogRecord::Btree(btree_log_record)
    }

    pub fn create_transaction_record<'b>(
        txn_log_record: TransactionLogRecord,
    ) -> LogRecord<'b> {
        LogRecord::Transaction(txn_log_record)
    }

    pub fn create_wal_record<'b>(wal_log_record: WalLogRecord) -> LogRecord<'b> {
        LogRecord::Wal(wal_log_record)
    }

    /// Dispatch a record read back from the log to its owning subsystem
    /// during crash recovery. `xid` is the transaction that produced the
    /// record (0 for records the WAL itself or the transaction table
    /// generate outside of any transaction).
    pub fn apply(self, db: &DB, xid: XID, lsn: LogPointer) -> Result<()> {
        match self {
            LogRecord::Heap(r) => r.apply(db, xid, lsn),
            LogRecord::Btree(r) => r.apply(db, xid, lsn),
            LogRecord::Transaction(r) => r.apply(db, xid, lsn),
            LogRecord::Wal(r) => r.apply(db, lsn),
        }
    }
}
