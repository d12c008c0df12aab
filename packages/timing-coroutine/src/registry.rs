//! Handle registry: stable handles to movable slots.
//!
//! Backed by a generational arena so a released handle can never resolve to
//! a later coroutine that happens to reuse its arena cell.

use generational_arena::Arena;

use crate::ids::{CoroutineHandle, InstanceKey, ProcessIndex};

#[derive(Debug)]
pub struct HandleRegistry {
    instance: InstanceKey,
    entries: Arena<ProcessIndex>,
}

impl HandleRegistry {
    pub fn new(instance: InstanceKey) -> Self {
        HandleRegistry {
            instance,
            entries: Arena::new(),
        }
    }

    pub fn instance(&self) -> InstanceKey {
        self.instance
    }

    pub fn allocate(&mut self, index: ProcessIndex) -> CoroutineHandle {
        CoroutineHandle::new(self.instance, self.entries.insert(index))
    }

    /// Current slot of a live handle. `None` for foreign, finished or killed handles.
    pub fn resolve(&self, handle: CoroutineHandle) -> Option<ProcessIndex> {
        if handle.instance() != self.instance {
            return None;
        }
        self.entries.get(handle.index()).copied()
    }

    /// Point a live handle at a new slot. Returns false if the handle is dead.
    pub fn relocate(&mut self, handle: CoroutineHandle, index: ProcessIndex) -> bool {
        if handle.instance() != self.instance {
            return false;
        }
        match self.entries.get_mut(handle.index()) {
            Some(entry) => {
                *entry = index;
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, handle: CoroutineHandle) -> Option<ProcessIndex> {
        if handle.instance() != self.instance {
            return None;
        }
        self.entries.remove(handle.index())
    }

    /// Release every handle.
    ///
    /// Entries are removed one at a time so each release bumps the arena
    /// generation; `Arena::clear` would let stale handles alias new ones.
    pub fn release_all(&mut self) -> usize {
        let indices: Vec<_> = self.entries.iter().map(|(idx, _)| idx).collect();
        for idx in &indices {
            self.entries.remove(*idx);
        }
        indices.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
