//! B-tree search, insert, and split over pages owned by a [`PageStore`].
//!
//! Every node entry is `(key, value)`. In a leaf the value is the caller's
//! payload; in an internal node it is the page number of the child whose
//! smallest key equals the entry key. Descent always follows the
//! rightmost entry whose key is `<=` the probe (the floor entry). The root
//! leaf is seeded with an all-zero sentinel key, so every probe has a
//! floor at every level.
//!
//! Inserts split full nodes on the way down, so the node being inserted
//! into always has room for the separator of a split child.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::index::IndexError;
use crate::page::{Page, PageKind, PageNumber};
use crate::store::PageStore;

/// Look up `key`, descending from `root`.
pub fn search(
    store: &mut PageStore,
    root: PageNumber,
    key: &[u8],
) -> Result<Option<i64>, IndexError> {
    let limit = store.page_count();
    let mut current = root;

    for _ in 0..limit {
        let page = store.get(current)?;
        let floor = page.floor(key);

        match (page.kind(), floor) {
            (PageKind::Leaf, None) => return Ok(None),
            (PageKind::Leaf, Some(i)) => {
                return Ok((page.compare(key, i) == Ordering::Equal).then(|| page.value(i)));
            }
            (PageKind::Internal, None) => return Err(missing_floor(page)),
            (PageKind::Internal, Some(i)) => current = child_reference(page, i, limit)?,
        }
    }

    Err(too_deep(root, limit))
}

/// Insert or update `key`, splitting `root` in place first if it is full.
pub fn insert(
    store: &mut PageStore,
    root: PageNumber,
    key: &[u8],
    value: i64,
) -> Result<(), IndexError> {
    if store.get(root)?.is_full() {
        let halves = split(store, root)?;
        tracing::debug!(
            "Split root page {root} into pages {} and {}",
            halves.left,
            halves.right
        );
    }

    insert_non_full(store, root, key, value)
}

/// The two pages produced by a split, with their smallest keys.
struct Halves {
    left: PageNumber,
    left_key: Vec<u8>,
    right: PageNumber,
    right_key: Vec<u8>,
}

/// Split a full page into two new pages of the same kind.
///
/// The lower half of the entries moves to a new left page and the upper
/// half to a new right page. The original page is rewritten as an internal
/// page with exactly two entries pointing at the halves; for the root this
/// grows the tree by one level, for any other page the parent repoints its
/// entry and the original page is left unreferenced.
fn split(store: &mut PageStore, number: PageNumber) -> Result<Halves, IndexError> {
    let (kind, lower, upper) = {
        let page = store.get(number)?;
        let n = page.len();
        let mid = n / 2;
        (
            page.kind(),
            page.entry_bytes(0..mid).to_vec(),
            page.entry_bytes(mid..n).to_vec(),
        )
    };

    let (left, left_key) = fill_new_page(store, kind, &lower)?;
    let (right, right_key) = fill_new_page(store, kind, &upper)?;

    let page = store.get(number)?;
    page.set_kind(PageKind::Internal);
    page.set_len(0);
    page.insert_at(0, &left_key, i64::from(left));
    page.insert_at(1, &right_key, i64::from(right));
    page.sync()?;

    Ok(Halves {
        left,
        left_key,
        right,
        right_key,
    })
}

/// Allocate a page, copy raw entries into it, and return its number and
/// smallest key.
fn fill_new_page(
    store: &mut PageStore,
    kind: PageKind,
    entries: &[u8],
) -> Result<(PageNumber, Vec<u8>), IndexError> {
    let page = store.allocate(kind)?;
    page.load_entries(entries);
    page.sync()?;
    Ok((page.number(), page.key(0).to_vec()))
}

/// Insert into a page known to have room, splitting full children before
/// descending into them.
fn insert_non_full(
    store: &mut PageStore,
    start: PageNumber,
    key: &[u8],
    value: i64,
) -> Result<(), IndexError> {
    let mut current = start;
    let mut levels: PageNumber = 0;

    loop {
        // splits below grow the file, so the bound is re-read each level
        let limit = store.page_count();
        levels += 1;
        if levels > limit {
            return Err(too_deep(start, limit));
        }

        let page = store.get(current)?;
        let floor = page.floor(key);

        if page.kind() == PageKind::Leaf {
            match floor {
                Some(i) if page.compare(key, i) == Ordering::Equal => page.set_value(i, value),
                _ => page.insert_at(floor.map_or(0, |i| i + 1), key, value),
            }
            page.sync()?;
            return Ok(());
        }

        let Some(i) = floor else {
            return Err(missing_floor(page));
        };
        let child = child_reference(page, i, limit)?;

        if !store.get(child)?.is_full() {
            current = child;
            continue;
        }

        let halves = split(store, child)?;
        tracing::debug!(
            "Split page {child} under page {current} into pages {} and {}",
            halves.left,
            halves.right
        );

        let page = store.get(current)?;
        page.set_entry(i, &halves.left_key, i64::from(halves.left));
        page.insert_at(i + 1, &halves.right_key, i64::from(halves.right));
        page.sync()?;

        current = if page.compare(key, i + 1) == Ordering::Less {
            halves.left
        } else {
            halves.right
        };
    }
}

/// Child page number stored in entry `i` of an internal page.
pub(crate) fn child_reference(
    page: &Page,
    i: usize,
    page_count: PageNumber,
) -> Result<PageNumber, IndexError> {
    let raw = page.value(i);
    match PageNumber::try_from(raw) {
        Ok(child) if child >= 1 && child < page_count && child != page.number() => Ok(child),
        _ => {
            tracing::error!(
                "Page {} entry {i} references child {raw} outside 1..{page_count}",
                page.number()
            );
            Err(IndexError::InvariantViolation(format!(
                "page {} entry {i} references invalid child {raw}",
                page.number()
            )))
        }
    }
}

fn missing_floor(page: &Page) -> IndexError {
    tracing::error!(
        "Internal page {} has no entry at or below the probe key",
        page.number()
    );
    IndexError::InvariantViolation(format!(
        "internal page {} has no floor entry (len {})",
        page.number(),
        page.len()
    ))
}

fn too_deep(root: PageNumber, page_count: PageNumber) -> IndexError {
    tracing::error!("Descent from page {root} exceeded {page_count} levels");
    IndexError::InvariantViolation(format!(
        "descent from page {root} visited more levels than the file has pages"
    ))
}

/// Shape of the tree as found by [`verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Number of levels, 1 for a lone root leaf.
    pub depth: usize,
    /// Node pages reachable from the root.
    pub pages: usize,
    /// Leaf pages reachable from the root.
    pub leaves: usize,
    /// Entries across all leaves, sentinel included.
    pub entries: usize,
}

/// Walk the whole tree and check its structural invariants.
///
/// Checks that every reachable page is non-empty and within capacity,
/// keys strictly ascend within and across pages, every separator equals
/// the smallest key of its child, every leaf sits at the same depth, and
/// no page is reachable along two paths.
pub fn verify(store: &mut PageStore, root: PageNumber) -> Result<TreeStats, IndexError> {
    let limit = store.page_count();
    let mut stats = TreeStats::default();
    let mut leaf_depth = None;
    let mut visited = HashSet::new();
    let mut pending = vec![Pending {
        number: root,
        depth: 1,
        upper: None,
    }];

    while let Some(Pending {
        number,
        depth,
        upper,
    }) = pending.pop()
    {
        if !visited.insert(number) {
            return Err(violation(number, "is reachable twice"));
        }

        let page = store.get(number)?;
        let (kind, n) = (page.kind(), page.len());
        if n == 0 {
            return Err(violation(number, "is empty"));
        }
        for i in 1..n {
            if page.compare(page.key(i - 1), i) != Ordering::Less {
                return Err(violation(number, &format!("keys out of order at entry {i}")));
            }
        }
        if upper
            .as_ref()
            .is_some_and(|bound| page.compare(bound, n - 1) != Ordering::Greater)
        {
            return Err(violation(number, "holds a key at or above its parent's next separator"));
        }

        stats.pages += 1;

        if kind == PageKind::Leaf {
            stats.leaves += 1;
            stats.entries += n;
            match leaf_depth {
                None => leaf_depth = Some(depth),
                Some(expected) if expected == depth => {}
                Some(expected) => {
                    return Err(violation(
                        number,
                        &format!("is a leaf at depth {depth}, expected {expected}"),
                    ));
                }
            }
            continue;
        }

        let mut children = Vec::with_capacity(n);
        for i in 0..n {
            children.push((page.key(i).to_vec(), child_reference(page, i, limit)?));
        }

        for (i, (key, child)) in children.iter().enumerate() {
            let first = store.get(*child)?;
            if first.is_empty() || first.compare(key, 0) != Ordering::Equal {
                return Err(violation(
                    number,
                    &format!("separator {i} does not match the first key of page {child}"),
                ));
            }
        }

        // pushed right to left so the leftmost child is walked first
        let mut bound = upper;
        for (key, child) in children.into_iter().rev() {
            pending.push(Pending {
                number: child,
                depth: depth + 1,
                upper: bound,
            });
            bound = Some(key);
        }
    }

    stats.depth = leaf_depth.unwrap_or(0);
    Ok(stats)
}

/// A page queued by [`verify`], with the exclusive bound its parent imposes.
struct Pending {
    number: PageNumber,
    depth: usize,
    upper: Option<Vec<u8>>,
}

fn violation(number: PageNumber, detail: &str) -> IndexError {
    tracing::error!("Page {number} {detail}");
    IndexError::InvariantViolation(format!("page {number} {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ROOT_PAGE, capacity_for};
    use tempfile::tempdir;

    fn create_test_store(key_size: usize) -> (tempfile::TempDir, PageStore) {
        let dir = tempdir().expect("create temp dir");
        let store = PageStore::open(&dir.path().join("test.idx"), key_size).expect("create store");
        (dir, store)
    }

    fn key(i: u32) -> [u8; 4] {
        i.to_be_bytes()
    }

    #[test]
    fn test_search_sentinel() {
        let (_dir, mut store) = create_test_store(4);
        assert_eq!(search(&mut store, ROOT_PAGE, &[0, 0, 0, 0]).expect("search"), Some(0));
        assert_eq!(search(&mut store, ROOT_PAGE, &[]).expect("search"), Some(0));
        assert_eq!(search(&mut store, ROOT_PAGE, &key(1)).expect("search"), None);
    }

    #[test]
    fn test_insert_update_in_leaf() {
        let (_dir, mut store) = create_test_store(4);
        insert(&mut store, ROOT_PAGE, &key(5), 100).expect("insert");
        insert(&mut store, ROOT_PAGE, &key(5), 200).expect("update");

        assert_eq!(search(&mut store, ROOT_PAGE, &key(5)).expect("search"), Some(200));
        assert_eq!(store.get(ROOT_PAGE).expect("root").len(), 2);
    }

    #[test]
    fn test_root_split_grows_tree() {
        let (_dir, mut store) = create_test_store(4);
        let capacity = capacity_for(4) as u32;

        // sentinel + (capacity - 1) keys fills the root exactly
        for i in 1..capacity {
            insert(&mut store, ROOT_PAGE, &key(i), i64::from(i)).expect("insert");
        }
        assert!(store.get(ROOT_PAGE).expect("root").is_full());
        assert_eq!(store.page_count(), 2);

        insert(&mut store, ROOT_PAGE, &key(capacity), 0).expect("insert");

        let root = store.get(ROOT_PAGE).expect("root");
        assert_eq!(root.kind(), PageKind::Internal);
        assert_eq!(root.len(), 2);
        assert_eq!(root.key(0), &[0, 0, 0, 0]);
        assert_eq!(root.value(0), 2);
        assert_eq!(root.value(1), 3);
        assert_eq!(store.page_count(), 4);

        let stats = verify(&mut store, ROOT_PAGE).expect("verify");
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.leaves, 2);
        assert_eq!(stats.entries, capacity as usize + 1);
    }

    #[test]
    fn test_child_split_keeps_balance() {
        let (_dir, mut store) = create_test_store(4);

        for i in 1..=2000u32 {
            insert(&mut store, ROOT_PAGE, &key(i), i64::from(i) * 3).expect("insert");
            if i % 250 == 0 {
                verify(&mut store, ROOT_PAGE).expect("verify");
            }
        }

        let stats = verify(&mut store, ROOT_PAGE).expect("verify");
        assert_eq!(stats.entries, 2001);
        assert_eq!(stats.depth, 2);
        assert!(stats.leaves > 2);

        for i in 1..=2000u32 {
            assert_eq!(
                search(&mut store, ROOT_PAGE, &key(i)).expect("search"),
                Some(i64::from(i) * 3),
                "mismatch at {i}"
            );
        }
    }

    #[test]
    fn test_descending_inserts() {
        let (_dir, mut store) = create_test_store(4);

        for i in (1..=1500u32).rev() {
            insert(&mut store, ROOT_PAGE, &key(i), -i64::from(i)).expect("insert");
        }

        let stats = verify(&mut store, ROOT_PAGE).expect("verify");
        assert_eq!(stats.entries, 1501);
        assert_eq!(search(&mut store, ROOT_PAGE, &key(777)).expect("search"), Some(-777));
        assert_eq!(search(&mut store, ROOT_PAGE, &key(1501)).expect("search"), None);
    }

    #[test]
    fn test_three_levels_with_wide_keys() {
        // capacity 4 forces a deep tree quickly
        let key_size = crate::page::MAX_KEY_SIZE;
        let (_dir, mut store) = create_test_store(key_size);
        assert_eq!(store.capacity(), 4);

        for i in 1..=60u32 {
            let mut wide = vec![0u8; key_size];
            wide[..4].copy_from_slice(&key(i * 7 % 61));
            insert(&mut store, ROOT_PAGE, &wide, i64::from(i)).expect("insert");
        }

        let stats = verify(&mut store, ROOT_PAGE).expect("verify");
        assert!(stats.depth >= 3, "depth was {}", stats.depth);
        assert_eq!(stats.entries, 61);
    }

    #[test]
    fn test_corrupt_child_reference() {
        let (_dir, mut store) = create_test_store(4);
        for i in 1..=400u32 {
            insert(&mut store, ROOT_PAGE, &key(i), 0).expect("insert");
        }

        let root = store.get(ROOT_PAGE).expect("root");
        root.set_value(1, 9999);

        let result = search(&mut store, ROOT_PAGE, &key(399));
        assert!(matches!(result, Err(IndexError::InvariantViolation(_))));
        let result = insert(&mut store, ROOT_PAGE, &key(399), 1);
        assert!(matches!(result, Err(IndexError::InvariantViolation(_))));
        assert!(matches!(
            verify(&mut store, ROOT_PAGE),
            Err(IndexError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let (_dir, mut store) = create_test_store(4);
        for i in 1..=400u32 {
            insert(&mut store, ROOT_PAGE, &key(i), 0).expect("insert");
        }

        let root = store.get(ROOT_PAGE).expect("root");
        root.set_value(0, i64::from(ROOT_PAGE));

        let result = search(&mut store, ROOT_PAGE, &key(1));
        assert!(matches!(result, Err(IndexError::InvariantViolation(_))));
    }

    #[test]
    fn test_verify_detects_unordered_leaf() {
        let (_dir, mut store) = create_test_store(4);
        insert(&mut store, ROOT_PAGE, &key(1), 1).expect("insert");
        insert(&mut store, ROOT_PAGE, &key(2), 2).expect("insert");

        let root = store.get(ROOT_PAGE).expect("root");
        root.set_entry(1, &key(3), 1);

        assert!(matches!(
            verify(&mut store, ROOT_PAGE),
            Err(IndexError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_verify_rejects_child_cycle() {
        let (_dir, mut store) = create_test_store(4);
        for _ in 0..200 {
            store.allocate(PageKind::Leaf).expect("allocate");
        }
        let cycle = store.allocate(PageKind::Internal).expect("allocate");
        let cycle_number = cycle.number();
        cycle.insert_at(0, &key(0), i64::from(ROOT_PAGE));

        let root = store.get(ROOT_PAGE).expect("root");
        root.set_kind(PageKind::Internal);
        root.set_value(0, i64::from(cycle_number));

        let Err(IndexError::InvariantViolation(message)) = verify(&mut store, ROOT_PAGE) else {
            panic!("cycle should be reported as a violation");
        };
        assert!(message.contains("reachable twice"), "{message}");
        assert!(matches!(
            search(&mut store, ROOT_PAGE, &key(7)),
            Err(IndexError::InvariantViolation(_))
        ));
    }
}
