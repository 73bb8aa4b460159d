//! Page types and constants for the index file.
//!
//! Every page is a 4KB memory-mapped window onto the backing file. Page 0
//! holds the file header; every other page is a B-tree node.
//!
//! Node layout (all integers big-endian):
//! - `kind`: 2 bytes (0 = internal, anything else = leaf)
//! - `n`: 2 bytes (live entry count)
//! - `n` entries of `key_size` key bytes followed by an 8-byte `i64` value

#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;
use std::io;
use std::ops::Range;

use memmap2::MmapMut;

/// Page size in bytes (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Page size as u64 for offset calculations.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// A page identifier (0-indexed page number).
pub type PageNumber = u32;

/// Page 0 holds the file header.
pub const HEADER_PAGE: PageNumber = 0;

/// Page 1 is always the root of the tree.
pub const ROOT_PAGE: PageNumber = 1;

/// Size of the node header (`kind` + `n`).
pub const NODE_HEADER_SIZE: usize = 4;

/// Width of an entry value in bytes.
pub const VALUE_SIZE: usize = 8;

/// Smallest page capacity a split can work with.
pub const MIN_CAPACITY: usize = 4;

/// Largest key size that still leaves `MIN_CAPACITY` entries per page.
pub const MAX_KEY_SIZE: usize = (PAGE_SIZE - NODE_HEADER_SIZE) / MIN_CAPACITY - VALUE_SIZE;

/// Maximum number of entries a node page can hold for the given key size.
#[must_use]
pub const fn capacity_for(key_size: usize) -> usize {
    (PAGE_SIZE - NODE_HEADER_SIZE) / (key_size + VALUE_SIZE)
}

/// Node kind stored in the first two bytes of a node page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Internal,
    Leaf,
}

impl PageKind {
    /// Decode the on-disk kind. Any nonzero value is a leaf.
    #[must_use]
    pub const fn from_raw(raw: i16) -> Self {
        if raw == 0 { Self::Internal } else { Self::Leaf }
    }

    #[must_use]
    pub const fn to_raw(self) -> i16 {
        match self {
            Self::Internal => 0,
            Self::Leaf => 1,
        }
    }
}

/// A single mapped B-tree node.
///
/// Header fields are written straight into the mapping; `sync` forces the
/// page to stable storage.
pub struct Page {
    number: PageNumber,
    key_size: usize,
    map: MmapMut,
}

impl Page {
    /// Wrap a mapping of exactly `PAGE_SIZE` bytes.
    #[must_use]
    pub fn new(number: PageNumber, key_size: usize, map: MmapMut) -> Self {
        debug_assert_eq!(map.len(), PAGE_SIZE);
        debug_assert!(key_size > 0 && key_size <= MAX_KEY_SIZE);
        Self {
            number,
            key_size,
            map,
        }
    }

    #[must_use]
    pub const fn number(&self) -> PageNumber {
        self.number
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        capacity_for(self.key_size)
    }

    #[must_use]
    pub fn kind(&self) -> PageKind {
        PageKind::from_raw(i16::from_be_bytes([self.map[0], self.map[1]]))
    }

    pub fn set_kind(&mut self, kind: PageKind) {
        self.map[0..2].copy_from_slice(&kind.to_raw().to_be_bytes());
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(u16::from_be_bytes([self.map[2], self.map[3]]))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    pub fn set_len(&mut self, n: usize) {
        debug_assert!(n <= self.capacity());
        self.map[2..4].copy_from_slice(&(n as u16).to_be_bytes());
    }

    const fn entry_size(&self) -> usize {
        self.key_size + VALUE_SIZE
    }

    const fn entry_offset(&self, i: usize) -> usize {
        NODE_HEADER_SIZE + i * self.entry_size()
    }

    /// Stored key of entry `i`, always `key_size` bytes.
    #[must_use]
    pub fn key(&self, i: usize) -> &[u8] {
        let offset = self.entry_offset(i);
        &self.map[offset..offset + self.key_size]
    }

    #[must_use]
    pub fn value(&self, i: usize) -> i64 {
        let offset = self.entry_offset(i) + self.key_size;
        let mut buf = [0u8; VALUE_SIZE];
        buf.copy_from_slice(&self.map[offset..offset + VALUE_SIZE]);
        i64::from_be_bytes(buf)
    }

    pub fn set_value(&mut self, i: usize, value: i64) {
        let offset = self.entry_offset(i) + self.key_size;
        self.map[offset..offset + VALUE_SIZE].copy_from_slice(&value.to_be_bytes());
    }

    /// Overwrite entry `i`. Keys shorter than `key_size` are zero-padded.
    pub fn set_entry(&mut self, i: usize, key: &[u8], value: i64) {
        debug_assert!(key.len() <= self.key_size);
        let offset = self.entry_offset(i);
        let slot = &mut self.map[offset..offset + self.key_size];
        slot[..key.len()].copy_from_slice(key);
        slot[key.len()..].fill(0);
        self.set_value(i, value);
    }

    /// Insert a new entry at `pos`, shifting later entries one slot right.
    pub fn insert_at(&mut self, pos: usize, key: &[u8], value: i64) {
        let n = self.len();
        debug_assert!(pos <= n && n < self.capacity());
        let start = self.entry_offset(pos);
        let end = self.entry_offset(n);
        let dest = start + self.entry_size();
        // copy_within has memmove semantics, so the overlapping shift is safe
        self.map.copy_within(start..end, dest);
        self.set_entry(pos, key, value);
        self.set_len(n + 1);
    }

    /// Raw bytes of a run of entries.
    #[must_use]
    pub fn entry_bytes(&self, range: Range<usize>) -> &[u8] {
        &self.map[self.entry_offset(range.start)..self.entry_offset(range.end)]
    }

    /// Replace the page contents with raw entry bytes taken from a page of
    /// the same key size.
    pub fn load_entries(&mut self, bytes: &[u8]) {
        let count = bytes.len() / self.entry_size();
        debug_assert_eq!(count * self.entry_size(), bytes.len());
        debug_assert!(count <= self.capacity());
        let start = self.entry_offset(0);
        self.map[start..start + bytes.len()].copy_from_slice(bytes);
        self.set_len(count);
    }

    /// Compare `key` against stored entry `i`, unsigned byte-wise.
    ///
    /// Bytes past the end of `key` compare as zero.
    #[must_use]
    pub fn compare(&self, key: &[u8], i: usize) -> Ordering {
        for (j, &stored) in self.key(i).iter().enumerate() {
            let probe = key.get(j).copied().unwrap_or(0);
            match probe.cmp(&stored) {
                Ordering::Equal => {}
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Index of the rightmost entry whose key is `<= key`.
    ///
    /// Returns `None` when every stored key is greater than `key`.
    #[must_use]
    pub fn floor(&self, key: &[u8]) -> Option<usize> {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.compare(key, mid) == Ordering::Less {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo.checked_sub(1)
    }

    /// Force the mapped page to stable storage.
    pub fn sync(&self) -> io::Result<()> {
        self.map.flush()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("number", &self.number)
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
