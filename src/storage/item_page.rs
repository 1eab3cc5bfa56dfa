use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{Error, Result};

/// Generic slotted-page directory shared by every page type whose items
/// must stay in a caller-chosen order (B-tree leaf/internal entries,
/// §3 "Entry array grows up from header; payload heap grows down").
///
/// This differs from the heap's own line-pointer directory
/// (`am::heap::heap_page`) in one respect: insertion can target an
/// arbitrary slot, shifting every directory entry at or after it, so that
/// the directory stays sorted by key while the underlying item bytes are
/// simply appended wherever there is room. The heap never needs this
/// because heap tuples are ordered by insertion, not by key.
const P_LOWER: usize = 0;
const P_UPPER: usize = P_LOWER + 2;
const P_DIR: usize = P_UPPER + 2;

const SLOT_SIZE: usize = 4;

#[derive(Clone, Copy)]
struct Slot {
    off: u16,
    len: u16,
}

pub trait ItemPageReader {
    fn get_item_page_payload(&self) -> &[u8];

    fn get_lower(&self) -> u16 {
        let buf = self.get_item_page_payload();
        (&buf[P_LOWER..]).read_u16::<LittleEndian>().unwrap()
    }

    fn get_upper(&self) -> u16 {
        let buf = self.get_item_page_payload();
        (&buf[P_UPPER..]).read_u16::<LittleEndian>().unwrap()
    }

    fn num_line_pointers(&self) -> usize {
        let lower = self.get_lower() as usize;
        if lower < P_DIR {
            0
        } else {
            (lower - P_DIR) / SLOT_SIZE
        }
    }

    fn get_free_space(&self) -> usize {
        let lower = self.get_lower() as usize;
        let upper = self.get_upper() as usize;
        let used = lower + SLOT_SIZE;

        if upper <= used {
            0
        } else {
            upper - used
        }
    }

    fn slot_at(&self, index: usize) -> Slot {
        let buf = self.get_item_page_payload();
        let base = P_DIR + index * SLOT_SIZE;
        let off = (&buf[base..]).read_u16::<LittleEndian>().unwrap();
        let len = (&buf[base + 2..]).read_u16::<LittleEndian>().unwrap();
        Slot { off, len }
    }

    fn get_item(&self, index: usize) -> &[u8] {
        let Slot { off, len } = self.slot_at(index);
        let buf = self.get_item_page_payload();
        &buf[off as usize..(off as usize + len as usize)]
    }
}

pub trait ItemPageWriter: ItemPageReader {
    fn get_item_page_payload_mut(&mut self) -> &mut [u8];

    fn set_lower(&mut self, lower: u16) {
        (&mut self.get_item_page_payload_mut()[P_LOWER..])
            .write_u16::<LittleEndian>(lower)
            .unwrap();
    }

    fn set_upper(&mut self, upper: u16) {
        (&mut self.get_item_page_payload_mut()[P_UPPER..])
            .write_u16::<LittleEndian>(upper)
            .unwrap();
    }

    fn init_item_page(&mut self) {
        for b in self.get_item_page_payload_mut().iter_mut() {
            *b = 0;
        }
        let len = self.get_item_page_payload_mut().len();
        self.set_lower(P_DIR as u16);
        self.set_upper(len as u16);
    }

    fn put_slot(&mut self, index: usize, slot: Slot) {
        let buf = self.get_item_page_payload_mut();
        let base = P_DIR + index * SLOT_SIZE;
        (&mut buf[base..])
            .write_u16::<LittleEndian>(slot.off)
            .unwrap();
        (&mut buf[base + 2..])
            .write_u16::<LittleEndian>(slot.len)
            .unwrap();
    }

    /// Insert or overwrite an item. `target` is the directory slot to
    /// write to (`None` appends at the end, as for a freshly-built page).
    /// When `overwrite` is false and `target` addresses an existing slot,
    /// every slot at or after it is shifted right by one to make room;
    /// the item bytes themselves are always appended at the current
    /// `upper` boundary, so the directory order (not the physical byte
    /// order) carries the sort order. When `overwrite` is true the slot
    /// at `target` is replaced in place without shifting.
    fn put_item(&mut self, item: &[u8], target: Option<usize>, overwrite: bool) -> Result<usize> {
        let mut lower = self.get_lower();
        let mut upper = self.get_upper();

        if (lower as usize) < P_DIR || lower > upper {
            return Err(Error::DataCorrupted(format!(
                "item page corrupted: lower = {}, upper = {}",
                lower, upper
            )));
        }

        let limit = self.num_line_pointers();
        let index = target.unwrap_or(limit);

        if index > limit {
            return Err(Error::InvalidArgument(
                "target slot is beyond the directory".to_owned(),
            ));
        }

        if self.get_free_space() < item.len() {
            return Err(Error::InvalidArgument(
                "not enough free space for item".to_owned(),
            ));
        }

        upper -= item.len() as u16;
        let slot = Slot {
            off: upper,
            len: item.len() as u16,
        };

        {
            let payload_len = self.get_item_page_payload_mut().len();
            let dst = &mut self.get_item_page_payload_mut()[upper as usize..payload_len];
            let dst = &mut dst[..item.len()];
            dst.copy_from_slice(item);
        }

        if overwrite && index < limit {
            self.put_slot(index, slot);
        } else {
            // shift every slot at or after `index` one place to the right
            for i in (index..limit).rev() {
                let moved = self.slot_at(i);
                self.put_slot(i + 1, moved);
            }
            self.put_slot(index, slot);
            lower += SLOT_SIZE as u16;
        }

        self.set_lower(lower);
        self.set_upper(upper);

        Ok(index)
    }

    /// Physically remove the slot at `index`, shifting every later slot
    /// left by one. The removed item's bytes are left in the upper heap
    /// unreclaimed -- nothing but a full page rebuild (split or a future
    /// compaction pass) needs to care about the wasted space.
    fn remove_item(&mut self, index: usize) -> Result<()> {
        let lower = self.get_lower();
        let limit = self.num_line_pointers();

        if index >= limit {
            return Err(Error::InvalidArgument(
                "target slot is beyond the directory".to_owned(),
            ));
        }

        for i in index..limit - 1 {
            let moved = self.slot_at(i + 1);
            self.put_slot(i, moved);
        }

        self.set_lower(lower - SLOT_SIZE as u16);
        Ok(())
    }
}
