//! Packed descriptor store (SPEC_FULL.md SS4.2): an index's `KeyType`
//! list plus `AttributeHeader` array packed into fixed-size descriptor
//! pages, bump-allocated and compacted on free. Grounded in
//! `original_source/storage/bdb/db/db_pr.c`'s page-compaction routines,
//! re-expressed here as a `Vec`-backed allocator with explicit offset
//! fixups rather than raw pointer arithmetic.

use crate::{
    catalog::schema::{AttributeHeader, KeyType},
    storage::consts::DESC_PAGE_SIZE,
    Error, Result,
};

use serde::{Deserialize, Serialize};

/// A descriptor's address within the store: which page it lives on and
/// its byte offset within that page. Stored in the owning Index record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorRef {
    pub page_id: usize,
    pub offset: usize,
}

/// The packed form of an index's typed metadata: the ordered key types
/// plus the attribute headers needed to read the indexed columns back out
/// of the heap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeySpec {
    pub key_types: Vec<KeyType>,
    pub attributes: Vec<AttributeHeader>,
}

struct Slot {
    offset: usize,
    len: usize,
}

struct DescriptorPage {
    data: Vec<u8>,
    free_offset: usize,
    slots: Vec<Slot>,
}

impl DescriptorPage {
    fn new() -> Self {
        Self {
            data: vec![0u8; DESC_PAGE_SIZE],
            free_offset: 0,
            slots: Vec::new(),
        }
    }

    fn remaining(&self) -> usize {
        DESC_PAGE_SIZE - self.free_offset
    }

    /// Bump-allocate `buf` at the end of live data. Never spans pages:
    /// the caller is expected to have checked `remaining()` first.
    fn bump_alloc(&mut self, buf: &[u8]) -> usize {
        let offset = self.free_offset;
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
        self.free_offset += buf.len();
        self.slots.push(Slot {
            offset,
            len: buf.len(),
        });
        offset
    }

    /// Remove the slot at `offset` and slide every slot above it down to
    /// close the gap, returning the `(old_offset, new_offset)` pairs of
    /// every slot that moved so the caller can fix up Index offsets.
    fn compact_after_free(&mut self, offset: usize) -> Vec<(usize, usize)> {
        let idx = match self.slots.iter().position(|s| s.offset == offset) {
            Some(idx) => idx,
            None => return Vec::new(),
        };
        let freed_len = self.slots[idx].len;
        self.slots.remove(idx);

        let mut moved = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.offset > offset {
                let old_offset = slot.offset;
                let new_offset = old_offset - freed_len;
                self.data.copy_within(old_offset..old_offset + slot.len, new_offset);
                slot.offset = new_offset;
                moved.push((old_offset, new_offset));
            }
        }
        self.data[self.free_offset - freed_len..self.free_offset].fill(0);
        self.free_offset -= freed_len;
        moved
    }

    fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }
}

/// Every live descriptor's storage slice, bump-allocated out of a
/// sequence of fixed-size pages and compacted on free. Descriptor
/// lookups are by `DescriptorRef`, which the caller (an Index record)
/// must keep in sync across a `free` call, since compaction can move
/// other descriptors' offsets within the same page.
pub struct DescriptorStore {
    pages: Vec<DescriptorPage>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    /// Pack `spec` and bump-allocate it into the first page with room,
    /// allocating a fresh page if none has space. Returns the ref to
    /// store in the owning Index record.
    pub fn allocate(&mut self, spec: &KeySpec) -> Result<DescriptorRef> {
        let buf = bincode::serialize(spec)
            .map_err(|e| Error::DataCorrupted(format!("cannot pack key spec: {}", e)))?;

        if buf.len() > DESC_PAGE_SIZE {
            return Err(Error::ProgramLimitExceed(
                "key spec exceeds descriptor page size".to_owned(),
            ));
        }

        let page_id = match self.pages.iter().position(|p| p.remaining() >= buf.len()) {
            Some(page_id) => page_id,
            None => {
                self.pages.push(DescriptorPage::new());
                self.pages.len() - 1
            }
        };

        let offset = self.pages[page_id].bump_alloc(&buf);
        Ok(DescriptorRef { page_id, offset })
    }

    /// Unpack the `KeySpec` stored at `desc_ref`.
    pub fn get(&self, desc_ref: DescriptorRef) -> Result<KeySpec> {
        let page = self
            .pages
            .get(desc_ref.page_id)
            .ok_or_else(|| Error::InvalidArgument("descriptor page out of range".to_owned()))?;
        let slot = page
            .slots
            .iter()
            .find(|s| s.offset == desc_ref.offset)
            .ok_or(Error::NotFound)?;
        let buf = page.read(slot.offset, slot.len).to_vec();
        bincode::deserialize(&buf)
            .map_err(|e| Error::DataCorrupted(format!("cannot unpack key spec: {}", e)))
    }

    /// Free the descriptor at `desc_ref` and compact the page's live
    /// entries above it downward. Returns every `(page_id, old_offset,
    /// new_offset)` fixup the caller must apply to other Index records
    /// whose descriptor lives on the same page.
    pub fn free(&mut self, desc_ref: DescriptorRef) -> Result<Vec<(usize, usize, usize)>> {
        let page = self
            .pages
            .get_mut(desc_ref.page_id)
            .ok_or_else(|| Error::InvalidArgument("descriptor page out of range".to_owned()))?;
        let moved = page.compact_after_free(desc_ref.offset);
        Ok(moved
            .into_iter()
            .map(|(old, new)| (desc_ref.page_id, old, new))
            .collect())
    }
}

impl Default for DescriptorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::schema::{AttributeHeader, KeyType};

    fn sample_spec() -> KeySpec {
        KeySpec {
            key_types: vec![KeyType::Int32, KeyType::Text],
            attributes: vec![
                AttributeHeader::new("id", KeyType::Int32, false),
                AttributeHeader::new("name", KeyType::Text, true),
            ],
        }
    }

    #[test]
    fn allocate_and_read_back() {
        let mut store = DescriptorStore::new();
        let desc_ref = store.allocate(&sample_spec()).unwrap();
        let spec = store.get(desc_ref).unwrap();
        assert_eq!(spec.key_types, sample_spec().key_types);
        assert_eq!(spec.attributes.len(), 2);
    }

    #[test]
    fn free_compacts_and_shifts_later_offsets() {
        let mut store = DescriptorStore::new();
        let first = store.allocate(&sample_spec()).unwrap();
        let second = store.allocate(&sample_spec()).unwrap();
        assert_eq!(first.page_id, second.page_id);
        assert!(second.offset > first.offset);

        let fixups = store.free(first).unwrap();
        assert_eq!(fixups.len(), 1);
        let (page_id, old_offset, new_offset) = fixups[0];
        assert_eq!(page_id, second.page_id);
        assert_eq!(old_offset, second.offset);

        let moved_ref = DescriptorRef {
            page_id,
            offset: new_offset,
        };
        let spec = store.get(moved_ref).unwrap();
        assert_eq!(spec.attributes.len(), 2);

        assert!(store.get(first).is_err());
    }

    #[test]
    fn allocate_spills_into_new_page_when_full() {
        let mut store = DescriptorStore::new();
        let big_attrs: Vec<AttributeHeader> = (0..400)
            .map(|i| AttributeHeader::new(&format!("col{}", i), KeyType::Int32, false))
            .collect();
        let big_spec = KeySpec {
            key_types: vec![KeyType::Int32],
            attributes: big_attrs,
        };

        let first = store.allocate(&big_spec).unwrap();
        let second = store.allocate(&big_spec).unwrap();
        assert_ne!(first.page_id, second.page_id);
    }
}
