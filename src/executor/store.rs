//! Handle registry and result store owned by the pool.

use super::task::Handle;
use std::collections::BTreeMap;

#[derive(Debug)]
enum Slot<P> {
    Pending,
    Ready(P),
}

/// Live handles (submitted, not yet retrieved) and the outcomes that have
/// arrived for them, ordered by handle.
#[derive(Debug)]
pub(crate) struct ResultStore<P> {
    slots: BTreeMap<Handle, Slot<P>>,
}

impl<P> ResultStore<P> {
    pub(crate) fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    /// Mark `handle` live. Returns false if it already was.
    pub(crate) fn register(&mut self, handle: Handle) -> bool {
        if self.slots.contains_key(&handle) {
            return false;
        }
        self.slots.insert(handle, Slot::Pending);
        true
    }

    pub(crate) fn contains(&self, handle: Handle) -> bool {
        self.slots.contains_key(&handle)
    }

    /// Store the outcome for a live handle. Outcomes for unknown handles are
    /// dropped and reported as false.
    pub(crate) fn fill(&mut self, handle: Handle, payload: P) -> bool {
        match self.slots.get_mut(&handle) {
            Some(slot) => {
                *slot = Slot::Ready(payload);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_ready(&self, handle: Handle) -> bool {
        matches!(self.slots.get(&handle), Some(Slot::Ready(_)))
    }

    /// Remove and return the outcome for `handle` if it has arrived.
    pub(crate) fn take(&mut self, handle: Handle) -> Option<P> {
        if !self.is_ready(handle) {
            return None;
        }
        match self.slots.remove(&handle) {
            Some(Slot::Ready(payload)) => Some(payload),
            _ => None,
        }
    }

    pub(crate) fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots.keys().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn ready_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }
}
