//! Public index interface.
//!
//! An [`Index`] is either open, owning its [`PageStore`], or closed. Every
//! operation on a closed index returns [`IndexError::Closed`].

use std::io;
use std::path::Path;

use crate::btree::{self, TreeStats};
use crate::iter::Entries;
use crate::page::{PageNumber, ROOT_PAGE};
use crate::store::{PageStore, StoreError};

/// A disk-backed B-tree from fixed-width byte keys to `i64` values.
///
/// Not safe for concurrent use: every operation that may touch the page
/// cache takes `&mut self`.
#[derive(Debug)]
pub struct Index {
    store: Option<PageStore>,
}

impl Index {
    /// Open the index at `path`, creating it when the file is missing or
    /// empty.
    ///
    /// `key_size` must match the size stored in an existing file; 0 accepts
    /// the stored size but cannot create a new file.
    pub fn open(path: impl AsRef<Path>, key_size: usize) -> Result<Self, IndexError> {
        let store = PageStore::open(path.as_ref(), key_size)?;
        Ok(Self { store: Some(store) })
    }

    /// Insert `key`, or overwrite its value if it is already present.
    ///
    /// Keys shorter than the key size are zero-padded; longer keys are
    /// rejected.
    pub fn insert(&mut self, key: &[u8], value: i64) -> Result<(), IndexError> {
        let store = self.open_store(key)?;
        btree::insert(store, ROOT_PAGE, key, value)
    }

    /// Look up the value stored for `key`.
    pub fn search(&mut self, key: &[u8]) -> Result<Option<i64>, IndexError> {
        let store = self.open_store(key)?;
        btree::search(store, ROOT_PAGE, key)
    }

    /// Iterate over every entry in ascending key order, starting with the
    /// all-zero sentinel.
    pub fn iterate(&mut self) -> Result<Entries<'_>, IndexError> {
        let store = self.store_mut()?;
        Ok(Entries::new(store, ROOT_PAGE))
    }

    /// Walk the whole tree, checking its structure, and report its shape.
    pub fn verify(&mut self) -> Result<TreeStats, IndexError> {
        let store = self.store_mut()?;
        btree::verify(store, ROOT_PAGE)
    }

    /// Unmap all pages and release the file.
    pub fn close(&mut self) -> Result<(), IndexError> {
        self.store.take().ok_or(IndexError::Closed)?.close();
        Ok(())
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.store.is_some()
    }

    pub fn key_size(&self) -> Result<usize, IndexError> {
        Ok(self.store()?.key_size())
    }

    /// Entries per node page.
    pub fn capacity(&self) -> Result<usize, IndexError> {
        Ok(self.store()?.capacity())
    }

    /// Pages in the file, header included.
    pub fn page_count(&self) -> Result<PageNumber, IndexError> {
        Ok(self.store()?.page_count())
    }

    /// Pages currently held in the page cache.
    pub fn cached_pages(&self) -> Result<usize, IndexError> {
        Ok(self.store()?.cached_pages())
    }

    pub fn path(&self) -> Result<&Path, IndexError> {
        Ok(self.store()?.path())
    }

    fn store(&self) -> Result<&PageStore, IndexError> {
        self.store.as_ref().ok_or(IndexError::Closed)
    }

    fn store_mut(&mut self) -> Result<&mut PageStore, IndexError> {
        self.store.as_mut().ok_or(IndexError::Closed)
    }

    /// The open store, after checking `key` fits in a stored key.
    fn open_store(&mut self, key: &[u8]) -> Result<&mut PageStore, IndexError> {
        let store = self.store_mut()?;
        if key.len() > store.key_size() {
            return Err(IndexError::KeyTooLong {
                len: key.len(),
                key_size: store.key_size(),
            });
        }
        Ok(store)
    }
}

/// Errors that can occur during index operations.
#[derive(Debug)]
pub enum IndexError {
    /// Page store error (I/O, format, or key size mismatch).
    Store(StoreError),
    /// The tree structure on disk is inconsistent.
    InvariantViolation(String),
    /// Key is longer than the index key size.
    KeyTooLong { len: usize, key_size: usize },
    /// The index has been closed.
    Closed,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::InvariantViolation(detail) => write!(f, "invariant violation: {detail}"),
            Self::KeyTooLong { len, key_size } => {
                write!(f, "key of {len} bytes exceeds key size {key_size}")
            }
            Self::Closed => write!(f, "index is closed"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::InvariantViolation(_) | Self::KeyTooLong { .. } | Self::Closed => None,
        }
    }
}

impl From<StoreError> for IndexError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<io::Error> for IndexError {
    fn from(e: io::Error) -> Self {
        Self::Store(StoreError::Io(e))
    }
}
