//! Data page body: an item directory (slot table) growing from the high
//! end of the page toward the low end, with payload bytes growing from the
//! header end upward (§6). Grounded on the teacher's `btree/page/leaf_page.rs`
//! slot bookkeeping, generalized from fixed-size tuples to variable-length
//! row fragments.

use crate::error::{GridError, GridResult};
use crate::pageid::PageId;
use crate::page::header::{PageHeader, PageType, PAGE_HEADER_SIZE};

const SLOT_ENTRY_SIZE: usize = 4;
const PAYLOAD_START: usize = PAGE_HEADER_SIZE + 4; // + slot_count:u16 + payload_end:u16
const TOMBSTONE_OFFSET: u16 = u16::MAX;

/// A fixed-size page holding variable-length item payloads, addressed by
/// `item_id` (the slot's index in the directory). A payload that does not
/// fit in the remaining free space is the row store's cue to fragment the
/// row across another page and append a 4-byte forward link.
pub struct DataPage {
    page_id: PageId,
    buf: Vec<u8>,
}

impl DataPage {
    pub fn new(page_id: PageId, page_size: usize) -> Self {
        let mut buf = vec![0u8; page_size];
        PageHeader::new(PageType::Data, page_id).write_to(&mut buf);
        let mut page = Self { page_id, buf };
        page.set_slot_count(0);
        page.set_payload_end(PAYLOAD_START as u16);
        page
    }

    pub fn from_bytes(page_id: PageId, buf: Vec<u8>) -> Self {
        Self { page_id, buf }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn slot_count(&self) -> u16 {
        u16::from_be_bytes(self.buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2].try_into().unwrap())
    }

    fn set_slot_count(&mut self, n: u16) {
        self.buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 2].copy_from_slice(&n.to_be_bytes());
    }

    fn payload_end(&self) -> u16 {
        u16::from_be_bytes(
            self.buf[PAGE_HEADER_SIZE + 2..PAGE_HEADER_SIZE + 4]
                .try_into()
                .unwrap(),
        )
    }

    fn set_payload_end(&mut self, v: u16) {
        self.buf[PAGE_HEADER_SIZE + 2..PAGE_HEADER_SIZE + 4].copy_from_slice(&v.to_be_bytes());
    }

    fn slot_dir_offset(&self, item_id: u16) -> usize {
        self.buf.len() - (item_id as usize + 1) * SLOT_ENTRY_SIZE
    }

    fn read_slot(&self, item_id: u16) -> Option<(u16, u16)> {
        if item_id >= self.slot_count() {
            return None;
        }
        let off = self.slot_dir_offset(item_id);
        let offset = u16::from_be_bytes(self.buf[off..off + 2].try_into().unwrap());
        let len = u16::from_be_bytes(self.buf[off + 2..off + 4].try_into().unwrap());
        Some((offset, len))
    }

    fn write_slot(&mut self, item_id: u16, offset: u16, len: u16) {
        let off = self.slot_dir_offset(item_id);
        self.buf[off..off + 2].copy_from_slice(&offset.to_be_bytes());
        self.buf[off + 2..off + 4].copy_from_slice(&len.to_be_bytes());
    }

    /// Bytes available between the payload growth pointer and the slot
    /// directory growth pointer, after accounting for one new slot entry.
    pub fn free_space(&self) -> usize {
        let slot_dir_start = self.buf.len() - self.slot_count() as usize * SLOT_ENTRY_SIZE;
        let payload_end = self.payload_end() as usize;
        slot_dir_start.saturating_sub(payload_end)
    }

    fn find_reusable_slot(&self) -> Option<u16> {
        for item_id in 0..self.slot_count() {
            if let Some((offset, len)) = self.read_slot(item_id) {
                if offset == TOMBSTONE_OFFSET && len == 0 {
                    return Some(item_id);
                }
            }
        }
        None
    }

    /// Inserts a payload, returning its `item_id`. Returns an error if the
    /// page does not have enough free space; callers fragment the row or
    /// pick another page from the free-list in that case.
    pub fn insert(&mut self, payload: &[u8]) -> GridResult<u16> {
        let needs_new_slot = self.find_reusable_slot().is_none();
        let needed = payload.len() + if needs_new_slot { SLOT_ENTRY_SIZE } else { 0 };
        if needed > self.free_space() {
            return Err(GridError::storage(
                self.page_id,
                0,
                "insufficient free space on data page",
            ));
        }

        let offset = self.payload_end();
        self.buf[offset as usize..offset as usize + payload.len()].copy_from_slice(payload);
        self.set_payload_end(offset + payload.len() as u16);

        let item_id = match self.find_reusable_slot() {
            Some(id) => id,
            None => {
                let id = self.slot_count();
                self.set_slot_count(id + 1);
                id
            }
        };
        self.write_slot(item_id, offset, payload.len() as u16);
        Ok(item_id)
    }

    /// Writes `payload` at exactly `item_id`, growing the slot directory
    /// with tombstoned filler slots if `item_id` is beyond the current
    /// slot count. Used when materializing a WAL delta during replay,
    /// where the slot assignment was already decided at first-write time
    /// and must be reproduced exactly rather than re-chosen (§4.C: "the
    /// delta materializes a row on the page ... using its itemId").
    pub fn put_at(&mut self, item_id: u16, payload: &[u8]) -> GridResult<()> {
        let needed_slots = item_id as usize + 1;
        let new_slots = needed_slots.saturating_sub(self.slot_count() as usize);
        if payload.len() + new_slots * SLOT_ENTRY_SIZE > self.free_space() {
            return Err(GridError::storage(
                self.page_id,
                item_id as u64,
                "insufficient free space to replay delta at item_id",
            ));
        }
        while (self.slot_count() as usize) < needed_slots {
            let id = self.slot_count();
            self.write_slot(id, TOMBSTONE_OFFSET, 0);
            self.set_slot_count(id + 1);
        }
        let offset = self.payload_end();
        self.buf[offset as usize..offset as usize + payload.len()].copy_from_slice(payload);
        self.set_payload_end(offset + payload.len() as u16);
        self.write_slot(item_id, offset, payload.len() as u16);
        Ok(())
    }

    pub fn get(&self, item_id: u16) -> Option<&[u8]> {
        let (offset, len) = self.read_slot(item_id)?;
        if offset == TOMBSTONE_OFFSET {
            return None;
        }
        Some(&self.buf[offset as usize..offset as usize + len as usize])
    }

    /// Overwrites in place when `new_payload` is exactly the old length;
    /// returns `Ok(true)` in that case. Otherwise removes the slot and
    /// returns `Ok(false)`, leaving the caller to re-insert (possibly on a
    /// different page via the free-list).
    pub fn update(&mut self, item_id: u16, new_payload: &[u8]) -> GridResult<bool> {
        let (offset, len) = self.read_slot(item_id).ok_or_else(|| {
            GridError::storage(self.page_id, item_id as u64, "no such item_id")
        })?;
        if offset == TOMBSTONE_OFFSET {
            return Err(GridError::storage(self.page_id, item_id as u64, "item removed"));
        }
        if new_payload.len() == len as usize {
            self.buf[offset as usize..offset as usize + len as usize].copy_from_slice(new_payload);
            return Ok(true);
        }
        self.remove(item_id)?;
        Ok(false)
    }

    pub fn remove(&mut self, item_id: u16) -> GridResult<()> {
        self.read_slot(item_id).ok_or_else(|| {
            GridError::storage(self.page_id, item_id as u64, "no such item_id")
        })?;
        self.write_slot(item_id, TOMBSTONE_OFFSET, 0);
        Ok(())
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (u16, &[u8])> {
        (0..self.slot_count()).filter_map(move |id| self.get(id).map(|p| (id, p)))
    }
}

/// Frames a row fragment with a 1-byte continuation flag followed, when
/// set, by a 4-byte big-endian forward link to the next fragment's page
/// index (§6). The flag disambiguates a terminal fragment from one with a
/// continuation, since raw row bytes could otherwise be mistaken for a
/// trailing link.
pub fn encode_fragment(data: &[u8], next_page_index: Option<u32>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(data.len() + 5);
    match next_page_index {
        Some(idx) => {
            buf.push(1);
            buf.extend_from_slice(&idx.to_be_bytes());
        }
        None => buf.push(0),
    }
    buf.extend_from_slice(data);
    buf
}

pub fn decode_fragment(fragment: &[u8]) -> GridResult<(Option<u32>, &[u8])> {
    match fragment.first() {
        Some(0) => Ok((None, &fragment[1..])),
        Some(1) => {
            if fragment.len() < 5 {
                return Err(GridError::Serialization("truncated fragment forward link".into()));
            }
            let idx = u32::from_be_bytes(fragment[1..5].try_into().unwrap());
            Ok((Some(idx), &fragment[5..]))
        }
        _ => Err(GridError::Serialization("malformed fragment header".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pageid::{PageFlag, PageId};

    fn pid() -> PageId {
        PageId::new(PageFlag::Data, 0, 1)
    }

    #[test]
    fn insert_get_round_trip() {
        let mut page = DataPage::new(pid(), 256);
        let id = page.insert(b"hello").unwrap();
        assert_eq!(page.get(id), Some(&b"hello"[..]));
    }

    #[test]
    fn update_same_size_in_place() {
        let mut page = DataPage::new(pid(), 256);
        let id = page.insert(b"hello").unwrap();
        assert!(page.update(id, b"world").unwrap());
        assert_eq!(page.get(id), Some(&b"world"[..]));
    }

    #[test]
    fn update_different_size_removes_slot() {
        let mut page = DataPage::new(pid(), 256);
        let id = page.insert(b"hello").unwrap();
        assert!(!page.update(id, b"hi").unwrap());
        assert_eq!(page.get(id), None);
    }

    #[test]
    fn remove_then_reuse_slot() {
        let mut page = DataPage::new(pid(), 256);
        let id = page.insert(b"hello").unwrap();
        page.remove(id).unwrap();
        assert_eq!(page.get(id), None);
        let id2 = page.insert(b"abc").unwrap();
        assert_eq!(id2, id);
    }

    #[test]
    fn insert_fails_when_full() {
        let mut page = DataPage::new(pid(), 64);
        loop {
            if page.insert(&[0u8; 8]).is_err() {
                break;
            }
        }
    }

    #[test]
    fn fragment_round_trip_with_continuation() {
        let encoded = encode_fragment(b"partial-row", Some(7));
        let (next, data) = decode_fragment(&encoded).unwrap();
        assert_eq!(next, Some(7));
        assert_eq!(data, b"partial-row");
    }

    #[test]
    fn put_at_materializes_payload_at_requested_item_id() {
        let mut page = DataPage::new(pid(), 256);
        page.put_at(3, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(page.get(3), Some(&[0x01, 0x02, 0x03][..]));
        assert_eq!(page.get(0), None);
        assert_eq!(page.get(2), None);
    }

    #[test]
    fn fragment_round_trip_terminal() {
        let encoded = encode_fragment(b"whole-row", None);
        let (next, data) = decode_fragment(&encoded).unwrap();
        assert_eq!(next, None);
        assert_eq!(data, b"whole-row");
    }
}
