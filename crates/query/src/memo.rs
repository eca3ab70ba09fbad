//! Single-entry memo keyed on snapshot identity.

#![forbid(unsafe_code)]

use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use tabula_core::Snapshot;

struct Entry<T> {
    // Weak keeps the allocation (and so the address) reserved without keeping the snapshot alive.
    key: Weak<Snapshot>,
    value: Arc<T>,
}

pub(crate) struct Memo<T> {
    cell: ArcSwapOption<Entry<T>>,
}

impl<T> Default for Memo<T> {
    fn default() -> Self { Self { cell: ArcSwapOption::empty() } }
}

impl<T> Memo<T> {
    pub(crate) fn get(&self, snap: &Arc<Snapshot>) -> Option<Arc<T>> {
        let entry = self.cell.load_full()?;
        std::ptr::eq(entry.key.as_ptr(), Arc::as_ptr(snap)).then(|| Arc::clone(&entry.value))
    }

    pub(crate) fn insert(&self, snap: &Arc<Snapshot>, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.cell.store(Some(Arc::new(Entry { key: Arc::downgrade(snap), value: Arc::clone(&value) })));
        value
    }

    pub(crate) fn clear(&self) { self.cell.store(None); }
}
