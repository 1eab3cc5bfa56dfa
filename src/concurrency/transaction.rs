use crate::concurrency::XID;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A frozen view of which transactions counted as "in the past" at the
/// moment it was taken (§5 "Snapshot"). `min_xid`/`max_xid` bound the
/// range that needs a per-xid lookup at all; everything outside it is
/// immediately decided.
#[derive(Debug)]
pub struct Snapshot {
    pub min_xid: XID,
    pub max_xid: XID,
    pub xips: Vec<XID>,
}

impl Snapshot {
    pub fn is_xid_in_progress(&self, xid: XID) -> bool {
        if xid < self.min_xid {
            false
        } else if xid >= self.max_xid {
            true
        } else {
            self.xips.contains(&xid)
        }
    }
}

pub struct Transaction {
    xid: XID,
    isolation_level: IsolationLevel,
    pub(crate) current_snapshot: Option<Snapshot>,
}

impl Transaction {
    pub fn new(xid: XID, isolation_level: IsolationLevel) -> Self {
        Self {
            xid,
            isolation_level,
            current_snapshot: None,
        }
    }

    pub fn xid(&self) -> XID {
        self.xid
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Repeatable read and serializable transactions take one snapshot at
    /// the first read and reuse it; read committed takes a fresh one on
    /// every statement.
    pub fn uses_transaction_snapshot(&self) -> bool {
        !matches!(self.isolation_level, IsolationLevel::ReadCommitted)
    }
}
