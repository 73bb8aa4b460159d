//! Lazy in-order iteration over every leaf entry.

use std::iter::FusedIterator;

use crate::btree::child_reference;
use crate::index::IndexError;
use crate::page::{PageKind, PageNumber};
use crate::store::PageStore;

/// Iterator over `(key, value)` pairs in ascending key order.
///
/// Walks the tree depth-first, leftmost child first, mapping pages only as
/// it reaches them. Keys are returned at their full stored width, so short
/// keys come back zero-padded. After an error the iterator is exhausted.
pub struct Entries<'a> {
    store: &'a mut PageStore,
    /// Pages being walked and the next entry to visit in each.
    stack: Vec<(PageNumber, usize)>,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(store: &'a mut PageStore, root: PageNumber) -> Self {
        Self {
            store,
            stack: vec![(root, 0)],
        }
    }

    fn fail(&mut self, error: IndexError) -> Option<Result<(Vec<u8>, i64), IndexError>> {
        self.stack.clear();
        Some(Err(error))
    }
}

enum Step {
    Descend(PageNumber),
    Yield(Vec<u8>, i64),
}

impl Iterator for Entries<'_> {
    type Item = Result<(Vec<u8>, i64), IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &(number, index) = self.stack.last()?;
            let limit = self.store.page_count();

            if self.stack.len() > limit as usize {
                tracing::error!("Iteration reached page {number} deeper than {limit} levels");
                return self.fail(IndexError::InvariantViolation(format!(
                    "iteration below page {number} is deeper than the file"
                )));
            }

            let page = match self.store.get(number) {
                Ok(page) => page,
                Err(e) => return self.fail(e.into()),
            };

            if index >= page.len() {
                self.stack.pop();
                continue;
            }

            let step = match page.kind() {
                PageKind::Leaf => Step::Yield(page.key(index).to_vec(), page.value(index)),
                PageKind::Internal => match child_reference(page, index, limit) {
                    Ok(child) => Step::Descend(child),
                    Err(e) => return self.fail(e),
                },
            };

            if let Some(top) = self.stack.last_mut() {
                top.1 += 1;
            }

            match step {
                Step::Descend(child) => self.stack.push((child, 0)),
                Step::Yield(key, value) => return Some(Ok((key, value))),
            }
        }
    }
}

impl FusedIterator for Entries<'_> {}
