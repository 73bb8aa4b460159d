//! Page store: the backing file and its cache of mapped pages.
//!
//! Pages are mapped lazily the first time they are touched and stay mapped
//! until the store is closed. The cache never evicts, so its size grows
//! with the number of distinct pages visited over the life of the store.
//! Callers that need a memory bound must close and reopen the index.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::header::{FormatError, Header};
use crate::page::{
    PAGE_SIZE, PAGE_SIZE_U64, Page, PageKind, PageNumber, ROOT_PAGE, capacity_for,
};

/// Owner of the index file and every page mapped from it.
pub struct PageStore {
    file: File,
    path: PathBuf,
    key_size: usize,
    /// Number of pages in the file, header included.
    next_page: PageNumber,
    cache: HashMap<PageNumber, Page>,
}

impl PageStore {
    /// Open the index file at `path`, creating it if it is missing or empty.
    ///
    /// A `key_size` of 0 accepts whatever the file stores; it cannot be used
    /// to create a new file.
    pub fn open(path: &Path, key_size: usize) -> Result<Self, StoreError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(StoreError::Io)?;

        let len = file.metadata().map_err(StoreError::Io)?.len();
        if len == 0 {
            return Self::create(file, path, key_size);
        }

        if len % PAGE_SIZE_U64 != 0 || len < 2 * PAGE_SIZE_U64 {
            return Err(StoreError::Format(FormatError::Truncated { len }));
        }

        let mut bytes = [0u8; Header::SIZE];
        file.read_exact(&mut bytes).map_err(StoreError::Io)?;
        let header = Header::from_bytes(bytes).map_err(StoreError::Format)?;

        if key_size != 0 && key_size != header.key_size {
            return Err(StoreError::ConfigMismatch {
                requested: key_size,
                stored: header.key_size,
            });
        }

        let next_page = PageNumber::try_from(len / PAGE_SIZE_U64)
            .map_err(|_| StoreError::Format(FormatError::Truncated { len }))?;

        tracing::info!(
            "Opened index {} (key_size={}, pages={next_page})",
            path.display(),
            header.key_size
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            key_size: header.key_size,
            next_page,
            cache: HashMap::new(),
        })
    }

    /// Write the header page and the root leaf holding the sentinel key.
    fn create(mut file: File, path: &Path, key_size: usize) -> Result<Self, StoreError> {
        let header = Header::new(key_size).map_err(StoreError::Format)?;

        file.write_all(&header.to_page()).map_err(StoreError::Io)?;
        file.sync_all().map_err(StoreError::Io)?;

        let mut store = Self {
            file,
            path: path.to_path_buf(),
            key_size,
            next_page: 1,
            cache: HashMap::new(),
        };

        let root = store.allocate(PageKind::Leaf)?;
        debug_assert_eq!(root.number(), ROOT_PAGE);
        root.insert_at(0, &[], 0);
        root.sync().map_err(StoreError::Io)?;

        tracing::info!("Created index {} (key_size={key_size})", path.display());

        Ok(store)
    }

    #[must_use]
    pub const fn key_size(&self) -> usize {
        self.key_size
    }

    /// Entries per node page.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        capacity_for(self.key_size)
    }

    /// Number of pages in the file, header included.
    #[must_use]
    pub const fn page_count(&self) -> PageNumber {
        self.next_page
    }

    /// Number of pages currently mapped.
    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an empty node page of the given kind to the file.
    pub fn allocate(&mut self, kind: PageKind) -> Result<&mut Page, StoreError> {
        let number = self.next_page;
        let new_len = (u64::from(number) + 1) * PAGE_SIZE_U64;
        self.file.set_len(new_len).map_err(StoreError::Io)?;

        let map = map_page(&self.file, number).map_err(StoreError::Io)?;
        let mut page = Page::new(number, self.key_size, map);
        page.set_kind(kind);
        page.set_len(0);
        page.sync().map_err(StoreError::Io)?;

        self.next_page += 1;
        tracing::debug!("Allocated {kind:?} page {number}");

        Ok(self.cache.entry(number).insert_entry(page).into_mut())
    }

    /// Fetch a node page, mapping it on first use.
    pub fn get(&mut self, number: PageNumber) -> Result<&mut Page, StoreError> {
        if number < ROOT_PAGE || number >= self.next_page {
            return Err(StoreError::PageOutOfBounds {
                number,
                page_count: self.next_page,
            });
        }

        match self.cache.entry(number) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                tracing::trace!("Page cache miss for page {number}");
                let map = map_page(&self.file, number).map_err(StoreError::Io)?;
                let page = Page::new(number, self.key_size, map);
                if page.len() > page.capacity() {
                    return Err(StoreError::CorruptPage {
                        number,
                        entry_count: page.len(),
                        capacity: page.capacity(),
                    });
                }
                Ok(slot.insert(page))
            }
        }
    }

    /// Unmap every cached page and release the file handle.
    ///
    /// Page writes are already synced, so nothing is flushed here.
    pub fn close(mut self) {
        let mapped = self.cache.len();
        self.cache.clear();
        tracing::debug!(
            "Closed index {} ({mapped} pages were mapped)",
            self.path.display()
        );
    }
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("path", &self.path)
            .field("key_size", &self.key_size)
            .field("page_count", &self.next_page)
            .field("cached_pages", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Map page `number` of `file` read-write.
#[allow(unsafe_code)]
fn map_page(file: &File, number: PageNumber) -> io::Result<MmapMut> {
    // SAFETY: the store holds the only handle to the file for its lifetime,
    // the file is never shrunk, and the engine is single-process; the mapped
    // range therefore stays valid and is not modified behind our back.
    unsafe {
        MmapOptions::new()
            .offset(u64::from(number) * PAGE_SIZE_U64)
            .len(PAGE_SIZE)
            .map_mut(file)
    }
}

/// Errors that can occur in the page store.
#[derive(Debug)]
pub enum StoreError {
    /// I/O or mapping error.
    Io(io::Error),
    /// The file is not a valid index file.
    Format(FormatError),
    /// The caller asked for a different key size than the file stores.
    ConfigMismatch { requested: usize, stored: usize },
    /// Page number outside the node pages of the file.
    PageOutOfBounds {
        number: PageNumber,
        page_count: PageNumber,
    },
    /// A page claims more entries than it can hold.
    CorruptPage {
        number: PageNumber,
        entry_count: usize,
        capacity: usize,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Format(e) => write!(f, "format error: {e}"),
            Self::ConfigMismatch { requested, stored } => write!(
                f,
                "key size mismatch: requested {requested}, file stores {stored}"
            ),
            Self::PageOutOfBounds { number, page_count } => {
                write!(f, "page {number} out of bounds (total pages: {page_count})")
            }
            Self::CorruptPage {
                number,
                entry_count,
                capacity,
            } => write!(
                f,
                "page {number} claims {entry_count} entries (capacity {capacity})"
            ),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Format(e) => Some(e),
            Self::ConfigMismatch { .. } | Self::PageOutOfBounds { .. } | Self::CorruptPage { .. } => {
                None
            }
        }
    }
}
