use crate::{
    catalog::Schema,
    concurrency::{Snapshot, Transaction, XID},
    storage::ItemPointer,
    Relation, Result, DB,
};

use std::sync::Arc;

pub struct TableData {
    schema: Schema,
}

impl TableData {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ScanDirection {
    Forward,
    Backward,
}

pub trait Tuple {
    fn get_data(&self) -> &[u8];
    /// Materialize the tuple so that it does not depend on any underlying resource
    fn materialize<'ret>(self: Box<Self>) -> Box<dyn Tuple + 'ret>;
}

pub trait TableScanIterator<'a> {
    fn next(&mut self, db: &'a DB, dir: ScanDirection) -> Result<Option<Box<dyn Tuple + 'a>>>;
}

pub type TuplePtr<'a> = Box<dyn Tuple + 'a>;

pub trait Table: Relation {
    fn get_table_data(&self) -> &TableData;

    fn table_schema(&self) -> &Schema {
        &self.get_table_data().schema
    }

    fn insert_tuple(&self, db: &DB, txn: &Transaction, tuple: &[u8]) -> Result<ItemPointer>;

    fn begin_scan<'a>(
        &'a self,
        db: &DB,
        txn: &'a mut Transaction,
    ) -> Result<Box<dyn TableScanIterator<'a> + 'a>>;

    /// Point lookup by item pointer, used by an index scan to materialize
    /// the table tuple a matching index entry points at (§4.9 visibility
    /// test). Returns `None` if the slot is empty or not visible to
    /// `snapshot`.
    fn fetch_tuple<'a>(
        &'a self,
        db: &'a DB,
        xid: XID,
        snapshot: &Snapshot,
        item_pointer: ItemPointer,
    ) -> Result<Option<TuplePtr<'a>>>;
}

pub type TablePtr = Arc<dyn Table>;
