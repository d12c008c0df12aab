//! Tag index: bidirectional map between slots and string tags.
//!
//! A slot carries at most one tag. A tag names any number of slots; the set
//! is ordered so bulk operations visit slots in segment/slot order.

use std::collections::{BTreeSet, HashMap};

use crate::ids::ProcessIndex;

#[derive(Debug, Default)]
pub struct TagIndex {
    by_tag: HashMap<String, BTreeSet<ProcessIndex>>,
    by_slot: HashMap<ProcessIndex, String>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag a slot, replacing any tag it already had.
    pub fn add_tag(&mut self, tag: impl Into<String>, index: ProcessIndex) {
        let tag = tag.into();
        self.remove_tag(index);
        self.by_tag.entry(tag.clone()).or_default().insert(index);
        self.by_slot.insert(index, tag);
    }

    pub fn remove_tag(&mut self, index: ProcessIndex) -> Option<String> {
        let tag = self.by_slot.remove(&index)?;
        if let Some(slots) = self.by_tag.get_mut(&tag) {
            slots.remove(&index);
            if slots.is_empty() {
                self.by_tag.remove(&tag);
            }
        }
        Some(tag)
    }

    /// Carry the tag of `from` over to `to`. Any tag previously on `to` is dropped.
    pub fn move_tag(&mut self, from: ProcessIndex, to: ProcessIndex) {
        self.remove_tag(to);
        if let Some(tag) = self.remove_tag(from) {
            self.add_tag(tag, to);
        }
    }

    pub fn tag_of(&self, index: ProcessIndex) -> Option<&str> {
        self.by_slot.get(&index).map(String::as_str)
    }

    /// Snapshot of the slots currently carrying `tag`.
    pub fn slots_with_tag(&self, tag: &str) -> Vec<ProcessIndex> {
        self.by_tag
            .get(tag)
            .map(|slots| slots.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains_tag(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_slot.clear();
    }
}
