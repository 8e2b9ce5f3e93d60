//! Shared-string table and the string accounting counters the auditor reconciles.
//!
//! Interned strings live in the heap as shared-string blocks; the table maps
//! text to the block so identical strings share one block and one count.
//! Privately owned (malloc) strings bypass the table but are tallied in the
//! same counters, since both kinds contribute to the string totals.

use ahash::AHashMap;

use crate::{
    heap::{BlockData, BlockId, Category, Heap},
    types::OwnedString,
};

/// Running string totals, maintained incrementally by the table.
///
/// The auditor recomputes all four by scanning the string blocks and reports
/// each one that disagrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StringStats {
    /// Number of live string blocks.
    pub distinct: u64,
    /// Sum of the stored counts of all string blocks.
    pub references: u64,
    /// Bytes of all live strings, one terminator each.
    pub distinct_bytes: u64,
    /// Bytes weighted by stored count.
    pub allocated_bytes: u64,
}

/// Cost of one string in the byte counters: its text plus a terminator.
#[inline]
#[must_use]
pub fn string_cost(text: &str) -> u64 {
    text.len() as u64 + 1
}

#[derive(Debug, Default)]
pub struct StringTable {
    shared: AHashMap<String, BlockId>,
    stats: StringStats,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stats(&self) -> &StringStats {
        &self.stats
    }

    /// Mutable access to the counters, for repair or fault injection.
    pub fn stats_mut(&mut self) -> &mut StringStats {
        &mut self.stats
    }

    /// Number of distinct interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty()
    }

    /// Looks up an interned string without taking a reference.
    #[must_use]
    pub fn find(&self, text: &str) -> Option<BlockId> {
        self.shared.get(text).copied()
    }

    /// Returns a new reference to the shared string for `text`, creating it if needed.
    pub fn intern(&mut self, heap: &mut Heap, text: &str) -> BlockId {
        if let Some(&id) = self.shared.get(text)
            && heap.inc_ref(id)
        {
            self.count_reference(text);
            return id;
        }
        let id = heap.allocate(Category::SharedString, BlockData::SharedString(text.to_owned()), "make_shared_string");
        self.shared.insert(text.to_owned(), id);
        self.count_new_block(text);
        id
    }

    /// Allocates a privately owned string with a stored count of one.
    pub fn new_owned(&mut self, heap: &mut Heap, text: String) -> BlockId {
        self.count_new_block(&text);
        heap.allocate(
            Category::MallocString,
            BlockData::OwnedString(OwnedString::new(text)),
            "new_string",
        )
    }

    /// Adds a reference to a string block of either kind.
    pub fn retain(&mut self, heap: &Heap, id: BlockId) -> bool {
        let Some(cost) = string_block_cost(heap, id) else {
            return false;
        };
        heap.inc_ref(id);
        self.stats.references += 1;
        self.stats.allocated_bytes += cost;
        true
    }

    /// Drops a reference to a string block, freeing it and updating the totals
    /// when it was the last one.
    pub fn release(&mut self, heap: &mut Heap, id: BlockId) {
        let Some(cost) = string_block_cost(heap, id) else {
            return;
        };
        self.stats.references = self.stats.references.saturating_sub(1);
        self.stats.allocated_bytes = self.stats.allocated_bytes.saturating_sub(cost);
        if let Some(block) = heap.dec_ref(id) {
            self.stats.distinct = self.stats.distinct.saturating_sub(1);
            self.stats.distinct_bytes = self.stats.distinct_bytes.saturating_sub(cost);
            if let BlockData::SharedString(text) = block.into_data() {
                self.shared.remove(&text);
            }
        }
    }

    fn count_new_block(&mut self, text: &str) {
        let cost = string_cost(text);
        self.stats.distinct += 1;
        self.stats.distinct_bytes += cost;
        self.count_reference(text);
    }

    fn count_reference(&mut self, text: &str) {
        self.stats.references += 1;
        self.stats.allocated_bytes += string_cost(text);
    }
}

fn string_block_cost(heap: &Heap, id: BlockId) -> Option<u64> {
    match heap.data(id)? {
        BlockData::SharedString(text) => Some(string_cost(text)),
        BlockData::OwnedString(s) => Some(string_cost(&s.text)),
        _ => None,
    }
}
