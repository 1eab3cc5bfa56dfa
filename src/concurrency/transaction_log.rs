use crate::{
    concurrency::XID,
    wal::{LogPointer, LogRecord},
    Result, DB,
};

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct TxnCommitLog {
    commit_time: SystemTime,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TxnZeroPageLog {
    page_num: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum TransactionLogRecord {
    Commit(TxnCommitLog),
    ZeroPage(TxnZeroPageLog),
}

impl TransactionLogRecord {
    pub fn apply(self, db: &DB, xid: XID, _lsn: LogPointer) -> Result<()> {
        match self {
            TransactionLogRecord::Commit(_) => db
                .get_transaction_manager()
                .redo_commit_for_recovery(xid),
            TransactionLogRecord::ZeroPage(zero_page_log) => db
                .get_transaction_manager()
                .redo_zero_page(zero_page_log.page_num),
        }
    }

    pub fn create_transaction_commit_log<'a>(commit_time: SystemTime) -> LogRecord<'a> {
        let txn_commit_record = TxnCommitLog { commit_time };
        LogRecord::create_transaction_record(TransactionLogRecord::Commit(txn_commit_record))
    }

    pub fn create_transaction_zero_page_log<'a>(page_num: usize) -> LogRecord<'a> {
        let zero_page_record = TxnZeroPageLog { page_num };
        LogRecord::create_transaction_record(TransactionLogRecord::ZeroPage(zero_page_record))
    }
}
