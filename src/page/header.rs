//! Fixed page header: `type:i16 | version:i16 | pageId:i64 | reserved...`
//! (§6). Grounded on the teacher's `btree/page/base_page.rs` +
//! `page_category.rs`, generalized to a single shared header used by every
//! page kind instead of a per-kind ad hoc prefix.

use crate::pageid::PageId;

pub const PAGE_HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum PageType {
    Data = 0,
    BTreeInternal = 1,
    BTreeLeaf = 2,
    Header = 3,
}

impl PageType {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(PageType::Data),
            1 => Some(PageType::BTreeInternal),
            2 => Some(PageType::BTreeLeaf),
            3 => Some(PageType::Header),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub page_type: PageType,
    pub version: i16,
    pub page_id: PageId,
}

impl PageHeader {
    pub fn new(page_type: PageType, page_id: PageId) -> Self {
        Self {
            page_type,
            version: 1,
            page_id,
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= PAGE_HEADER_SIZE);
        buf[0..2].copy_from_slice(&(self.page_type as i16).to_be_bytes());
        buf[2..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..12].copy_from_slice(&self.page_id.encode().to_be_bytes());
        for b in &mut buf[12..PAGE_HEADER_SIZE] {
            *b = 0;
        }
    }

    pub fn read_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return None;
        }
        let page_type = PageType::from_i16(i16::from_be_bytes(buf[0..2].try_into().unwrap()))?;
        let version = i16::from_be_bytes(buf[2..4].try_into().unwrap());
        let page_id = PageId::decode(u64::from_be_bytes(buf[4..12].try_into().unwrap()));
        Some(Self {
            page_type,
            version,
            page_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pageid::{PageFlag, PageId};

    #[test]
    fn header_round_trips() {
        let pid = PageId::new(PageFlag::Data, 3, 99);
        let h = PageHeader::new(PageType::Data, pid);
        let mut buf = vec![0u8; PAGE_HEADER_SIZE];
        h.write_to(&mut buf);
        let parsed = PageHeader::read_from(&buf).unwrap();
        assert_eq!(parsed.page_type, PageType::Data);
        assert_eq!(parsed.page_id.encode(), pid.encode());
    }
}
