//! Positional topic filter: values within a slot are OR'ed, slots are AND'ed.

use crate::error::WatchError;

/// Number of indexed topic positions of an EVM log.
pub const TOPIC_SLOTS: usize = 4;

/// Slot 0 holds the watched event ids (an allow-list: empty means nothing is of
/// interest). Slots 1..=3 match indexed fields; an empty slot matches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter<T> {
    slots: [Vec<T>; TOPIC_SLOTS],
}

impl<T> Default for TopicFilter<T> {
    fn default() -> Self {
        Self {
            slots: Default::default(),
        }
    }
}

impl<T: Clone + PartialEq> TopicFilter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watched event ids (slot 0).
    pub fn events(&self) -> &[T] {
        &self.slots[0]
    }

    /// True when at least one event id is watched.
    pub fn is_watching(&self) -> bool {
        !self.slots[0].is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&[T]> {
        self.slots.get(index).map(Vec::as_slice)
    }

    pub fn slots(&self) -> &[Vec<T>; TOPIC_SLOTS] {
        &self.slots
    }

    /// Append values to a slot, skipping ones already present.
    pub fn add(&mut self, index: usize, values: impl IntoIterator<Item = T>) -> Result<(), WatchError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(WatchError::InvalidFilterSlot(index))?;
        for v in values {
            if !slot.contains(&v) {
                slot.push(v);
            }
        }
        Ok(())
    }

    /// Whether an entry with these topics satisfies the filter.
    pub fn matches(&self, topics: &[T]) -> bool {
        if !self.is_watching() {
            return false;
        }
        self.slots.iter().enumerate().all(|(i, allowed)| {
            allowed.is_empty() || topics.get(i).is_some_and(|t| allowed.contains(t))
        })
    }
}
