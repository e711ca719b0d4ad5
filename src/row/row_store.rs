//! Fragmented row storage over data pages. Grounded on `page::data_page`
//! (item directory, tombstoned slots, fragment forward links) and the
//! teacher's `btree/table/table.rs` tuple insert/delete path, generalized
//! from whole-tuple-per-slot storage to rows that may span multiple pages
//! when they exceed a single page's free space (§4.F).

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{GridError, GridResult};
use crate::memory::PageMemory;
use crate::page::data_page::{decode_fragment, encode_fragment, DataPage};
use crate::pageid::{PageFlag, PageId, RowLink};

/// Free-list bucketed by free-space size class, so an insert can find a
/// page with enough room without scanning every resident data page
/// (§4.F: "free-list per cache group tracked by size bucket").
struct FreeList {
    buckets: BTreeMap<u16, Vec<PageId>>,
}

impl FreeList {
    fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }

    fn bucket_for(free_space: u16) -> u16 {
        free_space - (free_space % 64)
    }

    fn offer(&mut self, page_id: PageId, free_space: u16) {
        self.buckets
            .entry(Self::bucket_for(free_space))
            .or_insert_with(Vec::new)
            .push(page_id);
    }

    fn take_candidate(&mut self, needed: u16) -> Option<PageId> {
        let bucket = Self::bucket_for(needed);
        let (&key, _) = self.buckets.range(bucket..).next()?;
        let list = self.buckets.get_mut(&key)?;
        list.pop()
    }
}

/// Stores arbitrary-length row payloads across one or more data pages per
/// partition, fragmenting rows that don't fit on a single page and
/// chasing the forward links between fragments on read.
pub struct RowStore {
    flag: PageFlag,
    partition_id: u16,
    page_size: usize,
    free_list: RwLock<FreeList>,
}

impl RowStore {
    pub fn new(flag: PageFlag, partition_id: u16, page_size: usize) -> Self {
        Self {
            flag,
            partition_id,
            page_size,
            free_list: RwLock::new(FreeList::new()),
        }
    }

    fn fragment_capacity(&self) -> usize {
        // leave room for the fragment's own framing overhead (flag + link).
        self.page_size.saturating_sub(64)
    }

    fn page_for_insert(&self, memory: &PageMemory, needed: usize) -> GridResult<PageId> {
        let needed = needed as u16;
        if let Some(candidate) = self.free_list.write().unwrap().take_candidate(needed) {
            return Ok(candidate);
        }
        memory.allocate(self.flag as u8, self.partition_id)
    }

    fn load_page(&self, memory: &PageMemory, page_id: PageId) -> GridResult<DataPage> {
        let mut buf = vec![0u8; self.page_size];
        match memory.read(page_id, &mut buf) {
            Ok(()) => Ok(DataPage::from_bytes(page_id, buf)),
            Err(_) => Ok(DataPage::new(page_id, self.page_size)),
        }
    }

    fn store_page(&self, memory: &PageMemory, page: &DataPage) -> GridResult<()> {
        let bytes = page.as_bytes().to_vec();
        memory.mutate(page.page_id(), |b| b.copy_from_slice(&bytes))
    }

    /// Writes `payload`, possibly across several pages. Every fragment's
    /// page is allocated before any fragment is written, so each fragment
    /// (other than the last) already knows its successor's page index when
    /// it is serialized, avoiding a second pass to patch forward links.
    pub fn insert(&self, memory: &PageMemory, payload: &[u8]) -> GridResult<RowLink> {
        let cap = self.fragment_capacity();
        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&[][..]]
        } else {
            payload.chunks(cap).collect()
        };

        let mut pages = Vec::with_capacity(chunks.len());
        for _ in &chunks {
            pages.push(self.page_for_insert(memory, cap)?);
        }

        let mut first_item_id = 0u16;
        for (i, chunk) in chunks.iter().enumerate() {
            let next = if i + 1 < chunks.len() {
                Some(pages[i + 1].page_index() as u32)
            } else {
                None
            };
            let fragment = encode_fragment(chunk, next);

            let mut page = self.load_page(memory, pages[i])?;
            let item_id = page.insert(&fragment)?;
            self.free_list.write().unwrap().offer(pages[i], page.free_space() as u16);
            self.store_page(memory, &page)?;
            if i == 0 {
                first_item_id = item_id;
            }
        }

        Ok(RowLink::new(pages[0], first_item_id))
    }

    /// Reads a (possibly fragmented) row back into a single buffer.
    pub fn read(&self, memory: &PageMemory, link: RowLink) -> GridResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut current_page = link.page_id;
        let mut current_item = link.item_id;

        loop {
            let page = self.load_page(memory, current_page)?;
            let raw = page
                .get(current_item)
                .ok_or_else(|| GridError::Internal("row fragment missing".into()))?;
            let (next, data) = decode_fragment(raw)?;
            out.extend_from_slice(data);
            match next {
                Some(next_index) => {
                    current_page = current_page.with_page_index(next_index as u64);
                    current_item = 0;
                }
                None => break,
            }
        }
        Ok(out)
    }

    /// Updates a row in place when unfragmented and the new payload is the
    /// same length; otherwise removes and reinserts (§4.F).
    pub fn update(&self, memory: &PageMemory, link: RowLink, payload: &[u8]) -> GridResult<RowLink> {
        let mut page = self.load_page(memory, link.page_id)?;
        let is_single_fragment = page
            .get(link.item_id)
            .and_then(|f| decode_fragment(f).ok())
            .map(|(next, _)| next.is_none())
            .unwrap_or(false);

        if is_single_fragment {
            let framed = encode_fragment(payload, None);
            if let Ok(true) = page.update(link.item_id, &framed) {
                self.store_page(memory, &page)?;
                return Ok(link);
            }
        }
        self.remove(memory, link)?;
        self.insert(memory, payload)
    }

    pub fn remove(&self, memory: &PageMemory, link: RowLink) -> GridResult<()> {
        let mut current_page = link.page_id;
        let mut current_item = link.item_id;
        loop {
            let mut page = self.load_page(memory, current_page)?;
            let next = page
                .get(current_item)
                .and_then(|f| decode_fragment(f).ok())
                .and_then(|(next, _)| next);
            page.remove(current_item)?;
            let free = page.free_space() as u16;
            self.store_page(memory, &page)?;
            self.free_list.write().unwrap().offer(current_page, free);
            match next {
                Some(next_index) => {
                    current_page = current_page.with_page_index(next_index as u64);
                    current_item = 0;
                }
                None => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FilePageStore;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn memory() -> (PageMemory, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            FilePageStore::open(dir.path().join("data-0.bin"), 256, PageFlag::Data, 0, None).unwrap(),
        );
        let mut mem = PageMemory::new(256);
        mem.register_store(PageFlag::Data as u8, 0, store);
        (mem, dir)
    }

    #[test]
    fn insert_then_read_small_row() {
        let (mem, _dir) = memory();
        let store = RowStore::new(PageFlag::Data, 0, 256);
        let link = store.insert(&mem, b"hello world").unwrap();
        let back = store.read(&mem, link).unwrap();
        assert_eq!(back, b"hello world");
    }

    #[test]
    fn update_same_size_keeps_link() {
        let (mem, _dir) = memory();
        let store = RowStore::new(PageFlag::Data, 0, 256);
        let link = store.insert(&mem, b"abcdef").unwrap();
        let new_link = store.update(&mem, link, b"ghijkl").unwrap();
        assert_eq!(new_link.page_id.encode(), link.page_id.encode());
        assert_eq!(store.read(&mem, new_link).unwrap(), b"ghijkl");
    }

    #[test]
    fn remove_then_read_fails() {
        let (mem, _dir) = memory();
        let store = RowStore::new(PageFlag::Data, 0, 256);
        let link = store.insert(&mem, b"abc").unwrap();
        store.remove(&mem, link).unwrap();
        assert!(store.read(&mem, link).is_err());
    }

    #[test]
    fn large_row_fragments_across_pages_and_reads_back_whole() {
        let (mem, _dir) = memory();
        let store = RowStore::new(PageFlag::Data, 0, 256);
        let payload = vec![9u8; 1000];
        let link = store.insert(&mem, &payload).unwrap();
        assert_eq!(store.read(&mem, link).unwrap(), payload);
    }
}
