//! Insertion Order Module
//!
//! Tracks live entries by insertion sequence for size-based eviction.

use std::collections::BTreeMap;

// == Insertion Queue ==
/// Tracks insertion order for the eviction strategy.
///
/// Keys are ordered by the sequence number assigned at insertion:
/// - First = oldest insert
/// - Last = newest insert
///
/// Reads never reorder the queue; only a fresh insert ages older entries out.
#[derive(Debug, Default)]
pub struct InsertionQueue {
    /// Identifier per insertion sequence number
    order: BTreeMap<u64, String>,
}

impl InsertionQueue {
    // == Constructor ==
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
        }
    }

    // == Push ==
    /// Records a freshly inserted identifier.
    pub fn push(&mut self, seq: u64, identifier: &str) {
        self.order.insert(seq, identifier.to_string());
    }

    // == Remove ==
    /// Removes an insertion from the queue.
    pub fn remove(&mut self, seq: u64) -> Option<String> {
        self.order.remove(&seq)
    }

    // == Peek Oldest ==
    /// Returns the oldest insertion without removing it.
    pub fn peek_oldest(&self) -> Option<(u64, &str)> {
        self.order
            .first_key_value()
            .map(|(seq, identifier)| (*seq, identifier.as_str()))
    }

    // == Iter ==
    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        self.order
            .iter()
            .map(|(seq, identifier)| (*seq, identifier.as_str()))
    }

    // == Length ==
    /// Returns the number of tracked insertions.
    pub fn len(&self) -> usize {
        self.order.len()
    }
}
