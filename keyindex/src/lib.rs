//! Disk-backed B-tree index from fixed-width byte keys to `i64` values.
//!
//! # File Format
//!
//! The index lives in a single file of 4KB pages:
//!
//! - Page 0: header (magic number and key size)
//! - Page 1: root node, created as a leaf holding one all-zero sentinel key
//! - Remaining pages: B-tree nodes, appended as nodes split
//!
//! Pages are memory-mapped on first use and kept mapped until the index is
//! closed. Each mutated page is synced before the operation returns.
//!
//! # Usage
//!
//! ```no_run
//! use keyindex::Index;
//!
//! let mut index = Index::open("keys.idx", 4)?;
//! index.insert(&42u32.to_be_bytes(), 4200)?;
//! assert_eq!(index.search(&42u32.to_be_bytes())?, Some(4200));
//!
//! for entry in index.iterate()? {
//!     let (key, value) = entry?;
//!     println!("{key:?} -> {value}");
//! }
//! index.close()?;
//! # Ok::<(), keyindex::IndexError>(())
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod btree;
pub mod config;
mod header;
mod index;
mod iter;
mod page;
mod store;

pub use btree::TreeStats;
pub use header::{FormatError, Header, MAGIC};
pub use index::{Index, IndexError};
pub use iter::Entries;
pub use page::{
    HEADER_PAGE, MAX_KEY_SIZE, PAGE_SIZE, PageKind, PageNumber, ROOT_PAGE, VALUE_SIZE,
    capacity_for,
};
pub use store::StoreError;
