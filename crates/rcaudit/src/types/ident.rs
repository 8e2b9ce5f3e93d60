use crate::heap::BlockId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentKind {
    Builtin,
    SimulFunction,
    Global,
    Local,
    Define,
}

impl IdentKind {
    /// Permanent identifiers live as long as the driver and own a
    /// permanent-identifier block.
    #[must_use]
    pub fn is_permanent(self) -> bool {
        matches!(self, Self::Builtin | Self::SimulFunction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentEntry {
    pub name: String,
    pub kind: IdentKind,
    /// Backing permanent-identifier block, for permanent kinds.
    pub block: Option<BlockId>,
}

/// Compiler identifier hash table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentTable {
    pub buckets: Vec<Vec<IdentEntry>>,
}

impl IdentTable {
    #[must_use]
    pub fn with_buckets(count: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); count.max(1)],
        }
    }

    pub fn insert(&mut self, entry: IdentEntry) {
        let bucket = bucket_of(&entry.name, self.buckets.len());
        self.buckets[bucket].push(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &IdentEntry> {
        self.buckets.iter().flatten()
    }
}

fn bucket_of(name: &str, buckets: usize) -> usize {
    let hash = name
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(usize::from(b)));
    hash % buckets
}
