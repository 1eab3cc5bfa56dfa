pub mod lock_manager;
mod state_manager;
mod transaction;
mod transaction_log;
mod transaction_manager;
mod transaction_table;

pub use self::{
    lock_manager::{InProcessLockManager, LockManager},
    state_manager::StateManager,
    transaction::{IsolationLevel, Snapshot, Transaction},
    transaction_log::TransactionLogRecord,
    transaction_manager::TransactionManager,
    transaction_table::{TransactionStatus, TransactionTable},
};

pub type XID = u64;

pub fn is_invalid_xid(xid: XID) -> bool {
    xid == 0
}
