use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::wal::LogPointer;

use super::consts::PAGE_SIZE;

/// Offset of the LSN within the raw page buffer. This is the "common
/// header" of §4.1 that every page type shares and that `pg_in`/`pg_out`
/// swap before dispatching to per-type handlers; prev/next/num_entries/
/// free_offset are per-type fields living inside each page type's own
/// header further into the payload (see `am::btree::btree_page`).
const P_LSN: usize = 0;
pub const DISK_PAGE_HEADER_SIZE: usize = P_LSN + 8;

/// Shared read-side accessor over a raw `PAGE_SIZE` buffer. Every page
/// view type (`BTreePageView`, `HeapPageView`, ...) implements this by
/// exposing its backing buffer; the default methods here decode the
/// common header and hand back the remaining payload.
pub trait DiskPageReader {
    fn get_page_buffer(&self) -> &[u8; PAGE_SIZE];

    fn get_disk_page_payload(&self) -> &[u8] {
        &self.get_page_buffer()[DISK_PAGE_HEADER_SIZE..]
    }

    fn get_lsn(&self) -> LogPointer {
        (&self.get_page_buffer()[P_LSN..])
            .read_u64::<LittleEndian>()
            .unwrap()
    }
}

pub trait DiskPageWriter: DiskPageReader {
    fn get_page_buffer_mut(&mut self) -> &mut [u8; PAGE_SIZE];

    fn get_disk_page_payload_mut(&mut self) -> &mut [u8] {
        &mut self.get_page_buffer_mut()[DISK_PAGE_HEADER_SIZE..]
    }

    fn set_lsn(&mut self, lsn: LogPointer) {
        (&mut self.get_page_buffer_mut()[P_LSN..])
            .write_u64::<LittleEndian>(lsn)
            .unwrap();
    }
}
