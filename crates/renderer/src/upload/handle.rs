//! Recyclable completion handles.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Opaque handle identifying one in-flight upload batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompletionHandle(usize);

impl CompletionHandle {
    /// Position of this handle in the handle table.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Table of live handles, each owning a completion signal `F` and the
/// staging allocation `S` it guards.
///
/// Retired handles are reused smallest first, keeping the table dense. The
/// allocator is not synchronized; callers serialize access.
#[derive(Debug)]
pub struct HandleAllocator<F, S> {
    slots: Vec<Option<(F, S)>>,
    free: BinaryHeap<Reverse<usize>>,
}

impl<F, S> HandleAllocator<F, S> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: BinaryHeap::new(),
        }
    }

    /// Stores a signal and its staging allocation under a new handle.
    pub fn acquire(&mut self, signal: F, staging: S) -> CompletionHandle {
        match self.free.pop() {
            Some(Reverse(index)) => {
                debug_assert!(self.slots[index].is_none(), "free handle {} is live", index);
                self.slots[index] = Some((signal, staging));
                CompletionHandle(index)
            }
            None => {
                self.slots.push(Some((signal, staging)));
                CompletionHandle(self.slots.len() - 1)
            }
        }
    }

    /// Frees `handle`, handing back its signal and staging allocation.
    ///
    /// Only valid on a live handle whose signal has been observed. Retiring a
    /// free or unknown handle is a caller bug: it asserts in debug builds and
    /// returns `None` otherwise.
    pub fn retire(&mut self, handle: CompletionHandle) -> Option<(F, S)> {
        let entry = self.slots.get_mut(handle.0).and_then(Option::take);
        debug_assert!(entry.is_some(), "retiring handle {} which is not live", handle.0);
        if entry.is_some() {
            self.free.push(Reverse(handle.0));
        }
        entry
    }

    /// The signal of a live handle.
    pub fn signal(&self, handle: CompletionHandle) -> Option<&F> {
        self.slots
            .get(handle.0)
            .and_then(Option::as_ref)
            .map(|(signal, _)| signal)
    }

    /// Returns true if `handle` is live.
    pub fn is_live(&self, handle: CompletionHandle) -> bool {
        self.signal(handle).is_some()
    }

    /// Returns true if `handle` falls inside the table, live or free.
    pub fn contains(&self, handle: CompletionHandle) -> bool {
        handle.0 < self.slots.len()
    }

    /// Number of handles ever issued and not dropped by [`Self::clear`].
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live handles.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Live handles in ascending order.
    pub fn live_handles(&self) -> Vec<CompletionHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| CompletionHandle(index))
            .collect()
    }

    /// Empties the table, handing back every live entry.
    pub fn clear(&mut self) -> Vec<(F, S)> {
        self.free.clear();
        self.slots.drain(..).flatten().collect()
    }
}

impl<F, S> Default for HandleAllocator<F, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_appends_when_nothing_is_free() {
        let mut handles = HandleAllocator::new();
        let a = handles.acquire("fence-a", 1);
        let b = handles.acquire("fence-b", 2);
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(handles.capacity(), 2);
        assert_eq!(handles.live(), 2);
    }

    #[test]
    fn test_retired_handle_is_reused() {
        let mut handles = HandleAllocator::new();
        let first = handles.acquire("fence", 10);
        assert_eq!(handles.retire(first), Some(("fence", 10)));
        assert!(!handles.is_live(first));

        let second = handles.acquire("fence-2", 20);
        assert_eq!(second, first);
        assert_eq!(handles.capacity(), 1);
    }

    #[test]
    fn test_reuse_is_smallest_first() {
        let mut handles = HandleAllocator::new();
        let issued: Vec<_> = (0..4).map(|i| handles.acquire(i, i)).collect();
        handles.retire(issued[3]);
        handles.retire(issued[1]);
        handles.retire(issued[2]);

        assert_eq!(handles.acquire(10, 10).index(), 1);
        assert_eq!(handles.acquire(11, 11).index(), 2);
        assert_eq!(handles.acquire(12, 12).index(), 3);
        assert_eq!(handles.acquire(13, 13).index(), 4);
    }

    #[test]
    fn test_live_handles_and_clear() {
        let mut handles = HandleAllocator::new();
        let a = handles.acquire('a', ());
        let b = handles.acquire('b', ());
        let c = handles.acquire('c', ());
        handles.retire(b);
        assert_eq!(handles.live_handles(), vec![a, c]);
        assert!(handles.contains(b));

        let drained = handles.clear();
        assert_eq!(drained.len(), 2);
        assert_eq!(handles.capacity(), 0);
        assert_eq!(handles.acquire('d', ()).index(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not live")]
    fn test_double_retire_asserts() {
        let mut handles = HandleAllocator::new();
        let handle = handles.acquire((), ());
        handles.retire(handle);
        handles.retire(handle);
    }
}
