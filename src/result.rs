use std::{
    error::Error as StdError,
    fmt::{self, Display},
    io,
};

pub type Result<T> = std::result::Result<T, Error>;

/// One variant per error kind in the specification's error taxonomy,
/// alongside the teacher crate's pre-existing generic variants (`Io`,
/// `FileAccess`, `WrongObjectType`, `DataCorrupted`,
/// `ProgramLimitExceed`, `InvalidState`, `InvalidArgument`,
/// `OutOfMemory`), which still cover the ambient storage/IO failure
/// paths the specification leaves unnamed.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    FileAccess(String),
    WrongObjectType(String),
    DataCorrupted(String),
    ProgramLimitExceed(String),
    InvalidState(String),
    InvalidArgument(String),
    OutOfMemory,

    /// key/entry absent.
    NotFound,
    /// entry is flagged pending-delete.
    KeyEmpty,
    /// unique insert conflict.
    KeyExists,
    /// secondary uniqueness violation; transaction must compensate.
    UniqueViolation,
    /// lock manager detected a cycle; transaction manager aborts.
    Deadlock,
    /// lock wait timed out.
    LockNotGranted,
    /// leaf full; caller releases its stack, splits, and restarts.
    NeedsSplit,
    /// on-disk format version unsupported; caller should run upgrade.
    OldVersion,
    /// page failed its checksum or structural sanity check.
    PageFormat(String),
    /// transaction-table page pool exhausted.
    NoTransactionMemory,
    /// caller passed a flag combination the operation does not accept.
    InvalidFlags(String),
    /// caller referenced an attribute outside the index's key spec.
    InvalidAttr(String),
    /// unrecognized page or index type; fatal.
    UnknownType(String),
}

impl From<io::Error> for Error {
    fn from(ioe: io::Error) -> Self {
        Error::Io(ioe)
    }
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::result::Result<(), fmt::Error> {
        use self::Error::*;

        match self {
            FileAccess(e) => write!(f, "file access error: {}", e),
            WrongObjectType(e) => write!(f, "wrong object type: {}", e),
            DataCorrupted(e) => write!(f, "data corrupted: {}", e),
            ProgramLimitExceed(e) => write!(f, "program limit exceeded: {}", e),
            InvalidState(e) => write!(f, "invalid state: {}", e),
            InvalidArgument(e) => write!(f, "invalid argument: {}", e),
            Io(e) => write!(f, "io error: {}", e),
            OutOfMemory => write!(f, "out of memory"),
            NotFound => write!(f, "not found"),
            KeyEmpty => write!(f, "key is marked pending-delete"),
            KeyExists => write!(f, "key already exists"),
            UniqueViolation => write!(f, "unique constraint violated"),
            Deadlock => write!(f, "deadlock detected"),
            LockNotGranted => write!(f, "lock not granted before timeout"),
            NeedsSplit => write!(f, "leaf page needs to split"),
            OldVersion => write!(f, "unsupported on-disk version, run upgrade"),
            PageFormat(e) => write!(f, "page format error: {}", e),
            NoTransactionMemory => write!(f, "transaction table out of memory"),
            InvalidFlags(e) => write!(f, "invalid flags: {}", e),
            InvalidAttr(e) => write!(f, "invalid attribute: {}", e),
            UnknownType(e) => write!(f, "unknown page or index type: {}", e),
        }
    }
}
