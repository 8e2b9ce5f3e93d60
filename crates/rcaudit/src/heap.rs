use std::{
    borrow::Cow,
    cell::Cell,
    collections::BTreeMap,
    fmt,
};

use strum::{Display, EnumCount, EnumIter, FromRepr, IntoStaticStr};

use crate::{
    types::{CallOut, FunctionPtr, IdentTable, MapNode, MapTable, Mapping, Object, OwnedString, Program, Sentence, Session},
    value::{ARRAY_HEADER_SIZE, VALUE_SIZE, Value},
};

/// Stable handle to a block in the registry.
///
/// The slot index is reused after a block is freed; the generation is bumped on
/// every reuse so a stale handle never resolves to the block that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct BlockId {
    index: u32,
    generation: u32,
}

impl BlockId {
    /// Returns the raw slot index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Returns how many times the slot had been reused when this handle was issued.
    #[inline]
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Coarse class of a block category, the high byte of a block tag.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoStaticStr, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum BlockClass {
    Temporary = 1,
    Permanent = 2,
    Compiler = 3,
    Data = 4,
    Misc = 5,
}

/// Every kind of block the allocator hands out.
///
/// The discriminant is the category's minor number (the low byte of its tag),
/// which is what the raw registry dump prints. The set is closed: a new kind of
/// block must be added here, and every exhaustive match below will then demand
/// a decision about how the auditor treats it.
#[repr(u8)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    IntoStaticStr,
    EnumIter,
    EnumCount,
    FromRepr,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Category {
    #[strum(serialize = "temporary block")]
    Temporary = 1,
    #[strum(serialize = "permanent block")]
    Permanent = 2,
    #[strum(serialize = "compiler block")]
    CompilerScratch = 3,
    #[strum(serialize = "miscellaneous block")]
    Misc = 5,
    #[strum(serialize = "program")]
    Program = 11,
    #[strum(serialize = "call_out")]
    CallOut = 12,
    #[strum(serialize = "interactive")]
    Interactive = 13,
    #[strum(serialize = "ed block")]
    Ed = 14,
    #[strum(serialize = "include list")]
    IncludeList = 16,
    #[strum(serialize = "permanent identifier")]
    PermIdent = 17,
    #[strum(serialize = "identifier hash table")]
    IdentTable = 18,
    #[strum(serialize = "reserved block")]
    Reserved = 19,
    #[strum(serialize = "mudlib stat block")]
    MudlibStats = 20,
    #[strum(serialize = "object")]
    Object = 21,
    #[strum(serialize = "object table")]
    ObjectTable = 22,
    #[strum(serialize = "config table")]
    ConfigTable = 23,
    #[strum(serialize = "simul_efun table")]
    SimulTable = 24,
    #[strum(serialize = "sentence")]
    Sentence = 25,
    #[strum(serialize = "string table")]
    StringTable = 26,
    #[strum(serialize = "uid")]
    Uid = 28,
    #[strum(serialize = "object name")]
    ObjectName = 29,
    #[strum(serialize = "predefine")]
    Predefine = 30,
    #[strum(serialize = "line number block")]
    LineNumbers = 31,
    #[strum(serialize = "compiler local block")]
    CompilerLocals = 32,
    #[strum(serialize = "input_to")]
    InputTo = 38,
    #[strum(serialize = "string")]
    PlainString = 40,
    #[strum(serialize = "malloc string")]
    MallocString = 41,
    #[strum(serialize = "shared string")]
    SharedString = 42,
    #[strum(serialize = "function pointer")]
    Function = 43,
    #[strum(serialize = "array")]
    Array = 44,
    #[strum(serialize = "mapping")]
    Mapping = 45,
    #[strum(serialize = "mapping node")]
    MapNode = 46,
    #[strum(serialize = "mapping table")]
    MapTable = 47,
    #[strum(serialize = "buffer")]
    Buffer = 48,
    #[strum(serialize = "class")]
    Class = 49,
}

impl Category {
    /// The category's minor number, as printed by the raw dump.
    #[inline]
    #[must_use]
    pub fn minor(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn class(self) -> BlockClass {
        match self {
            Self::Temporary => BlockClass::Temporary,
            Self::CompilerScratch | Self::CompilerLocals | Self::LineNumbers | Self::IncludeList => {
                BlockClass::Compiler
            }
            Self::Misc | Self::Ed | Self::MudlibStats | Self::Uid => BlockClass::Misc,
            Self::MallocString
            | Self::SharedString
            | Self::PlainString
            | Self::Array
            | Self::Class
            | Self::Mapping
            | Self::MapNode
            | Self::MapTable
            | Self::Function
            | Self::Buffer
            | Self::Sentence
            | Self::CallOut
            | Self::InputTo => BlockClass::Data,
            Self::Permanent
            | Self::Program
            | Self::Interactive
            | Self::PermIdent
            | Self::IdentTable
            | Self::Reserved
            | Self::Object
            | Self::ObjectTable
            | Self::ConfigTable
            | Self::SimulTable
            | Self::StringTable
            | Self::ObjectName
            | Self::Predefine => BlockClass::Permanent,
        }
    }

    /// Full 16-bit tag: class in the high byte, minor number in the low byte.
    #[must_use]
    pub fn tag(self) -> u16 {
        (u16::from(self.class() as u8) << 8) | u16::from(self.minor())
    }

    /// Categories whose blocks carry a stored reference count that the auditor verifies.
    #[must_use]
    pub fn is_counted(self) -> bool {
        matches!(
            self,
            Self::MallocString
                | Self::SharedString
                | Self::Array
                | Self::Class
                | Self::Mapping
                | Self::Function
                | Self::Buffer
                | Self::Object
                | Self::Program
        )
    }

    /// Categories that are not reference counted but must be reached from a
    /// root or an owning block during every pass; an unreached one is an orphan.
    #[must_use]
    pub fn requires_mark(self) -> bool {
        matches!(
            self,
            Self::Sentence
                | Self::ObjectName
                | Self::PermIdent
                | Self::MapTable
                | Self::MapNode
                | Self::LineNumbers
                | Self::Interactive
                | Self::Predefine
                | Self::PlainString
                | Self::MudlibStats
        )
    }

    /// Categories that should never survive between audit passes.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Temporary | Self::CompilerScratch | Self::Misc)
    }
}

/// Payload of a heap block.
///
/// Bookkeeping blocks the auditor never looks inside are `Opaque`; everything
/// that owns further references has its own variant.
#[derive(Debug)]
pub enum BlockData {
    Opaque,
    /// Raw text owned by the block: object names, config strings, predefines.
    Text(String),
    OwnedString(OwnedString),
    SharedString(String),
    /// Elements of an array or class block.
    Array(Vec<Value>),
    Buffer(Vec<u8>),
    Mapping(Mapping),
    MapTable(MapTable),
    MapNode(MapNode),
    Function(FunctionPtr),
    Object(Object),
    Program(Program),
    Sentence(Sentence),
    Session(Session),
    CallOut(CallOut),
    IdentTable(IdentTable),
}

/// Header size charged for every string block on top of its text.
pub const STRING_HEADER_SIZE: usize = 8;

impl BlockData {
    /// Byte size the allocator records for a freshly allocated block.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        match self {
            Self::Opaque => 0,
            Self::Text(text) | Self::SharedString(text) => STRING_HEADER_SIZE + text.len() + 1,
            Self::OwnedString(s) => STRING_HEADER_SIZE + s.text.len() + 1,
            Self::Array(items) => ARRAY_HEADER_SIZE + VALUE_SIZE * items.len(),
            Self::Buffer(bytes) => 16 + bytes.len(),
            Self::Mapping(_) => 32,
            Self::MapTable(table) => 16 + 8 * table.nodes.len(),
            Self::MapNode(_) => 8 + 2 * VALUE_SIZE,
            Self::Function(_) => 48,
            Self::Object(ob) => 96 + VALUE_SIZE * ob.variables.len(),
            Self::Program(prog) => {
                128 + 8 * (prog.inherits.len() + prog.function_names.len() + prog.variable_names.len() + prog.strings.len())
            }
            Self::Sentence(_) => 40,
            Self::Session(session) => {
                96 + session.input_to.as_ref().map_or(0, |input| VALUE_SIZE * input.carryover.len())
            }
            Self::CallOut(call) => 48 + VALUE_SIZE * call.args.len(),
            Self::IdentTable(table) => 3 * 8 * table.buckets.len(),
        }
    }
}

/// Per-pass scratch state, meaningless outside one audit.
#[derive(Debug, Default)]
struct Scratch {
    expected: Cell<u32>,
    expected_func: Cell<u32>,
    visited: Cell<bool>,
}

/// One allocator-managed block.
///
/// The stored count lives in a `Cell` so `inc_ref` only needs shared access, and
/// so does the audit scratch: the auditor walks the registry by shared reference
/// while bumping the counters of the blocks each entry points at.
#[derive(Debug)]
pub struct HeapBlock {
    category: Category,
    size: usize,
    refcount: Cell<u32>,
    description: Cow<'static, str>,
    serial: u64,
    tick: u64,
    audit_exempt: bool,
    scratch: Scratch,
    data: BlockData,
}

impl HeapBlock {
    #[must_use]
    pub fn category(&self) -> Category {
        self.category
    }

    /// Byte size recorded by the allocator when the block was created or last resized.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The reference count the runtime is carrying.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refcount.get()
    }

    /// The count recomputed by the most recent audit pass.
    #[must_use]
    pub fn expected_refs(&self) -> u32 {
        self.scratch.expected.get()
    }

    /// Number of closures found pointing into this program's code by the last pass.
    #[must_use]
    pub fn expected_function_refs(&self) -> u32 {
        self.scratch.expected_func.get()
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Allocation serial number, unique for the lifetime of the heap.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Scheduler tick at which the block was allocated.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub fn is_audit_exempt(&self) -> bool {
        self.audit_exempt
    }

    #[must_use]
    pub fn data(&self) -> &BlockData {
        &self.data
    }

    pub(crate) fn reset_scratch(&self) {
        self.scratch.expected.set(0);
        self.scratch.expected_func.set(0);
        self.scratch.visited.set(false);
    }

    pub(crate) fn bump_expected(&self) {
        self.scratch.expected.set(self.scratch.expected.get() + 1);
    }

    pub(crate) fn bump_expected_func(&self) {
        self.scratch.expected_func.set(self.scratch.expected_func.get() + 1);
    }

    /// Sets the visited flag, returning whether it was already set.
    pub(crate) fn mark_visited(&self) -> bool {
        self.scratch.visited.replace(true)
    }

    pub(crate) fn visited(&self) -> bool {
        self.scratch.visited.get()
    }

    pub(crate) fn clear_visited(&self) {
        self.scratch.visited.set(false);
    }

    pub(crate) fn into_data(self) -> BlockData {
        self.data
    }
}

/// Block count and byte total for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Tally {
    pub blocks: u64,
    pub bytes: u64,
}

/// Snapshot of the registry grouped by category.
///
/// `by_category` uses a `BTreeMap` so iteration follows category order, which
/// keeps the summary table and the dump deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CategoryStats {
    /// Total number of live blocks.
    pub live_blocks: usize,
    /// Number of freed slots waiting for reuse.
    pub free_slots: usize,
    /// Live plus free.
    pub total_slots: usize,
    /// Sum of the recorded sizes of all live blocks.
    pub total_bytes: u64,
    /// Live blocks and bytes per category. Categories with no blocks are absent.
    pub by_category: BTreeMap<Category, Tally>,
}

impl CategoryStats {
    pub(crate) fn record(&mut self, block: &HeapBlock) {
        self.live_blocks += 1;
        self.total_bytes += block.size as u64;
        let tally = self.by_category.entry(block.category).or_default();
        tally.blocks += 1;
        tally.bytes += block.size as u64;
    }

    /// Returns the tally for `category`, zero when no block of it is live.
    #[must_use]
    pub fn tally(&self, category: Category) -> Tally {
        self.by_category.get(&category).copied().unwrap_or_default()
    }
}

/// Arena holding every allocated block.
///
/// Freed slots go on a free list and are reused by later allocations, bumping
/// the slot generation so old handles stop resolving.
#[derive(Debug, Default)]
pub struct Heap {
    entries: Vec<Option<HeapBlock>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    next_serial: u64,
    tick: u64,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            generations: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Current scheduler tick stamped on new allocations.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance_tick(&mut self) {
        self.tick += 1;
    }

    /// Allocates a block with a stored count of one, sized from its payload.
    pub fn allocate(&mut self, category: Category, data: BlockData, description: impl Into<Cow<'static, str>>) -> BlockId {
        let size = data.estimate_size();
        self.allocate_sized(category, data, size, description)
    }

    /// Allocates a block with an explicit recorded size.
    pub fn allocate_sized(
        &mut self,
        category: Category,
        data: BlockData,
        size: usize,
        description: impl Into<Cow<'static, str>>,
    ) -> BlockId {
        self.next_serial += 1;
        let block = HeapBlock {
            category,
            size,
            refcount: Cell::new(1),
            description: description.into(),
            serial: self.next_serial,
            tick: self.tick,
            audit_exempt: false,
            scratch: Scratch::default(),
            data,
        };

        if let Some(index) = self.free_list.pop() {
            let slot = index as usize;
            self.generations[slot] = self.generations[slot].wrapping_add(1);
            self.entries[slot] = Some(block);
            BlockId {
                index,
                generation: self.generations[slot],
            }
        } else {
            let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
            self.entries.push(Some(block));
            self.generations.push(0);
            BlockId { index, generation: 0 }
        }
    }

    /// Returns the block behind `id`, or `None` when it was freed or the slot reused.
    #[must_use]
    pub fn get(&self, id: BlockId) -> Option<&HeapBlock> {
        if self.generations.get(id.index()).copied() != Some(id.generation) {
            return None;
        }
        self.entries.get(id.index())?.as_ref()
    }

    #[must_use]
    pub fn data(&self, id: BlockId) -> Option<&BlockData> {
        self.get(id).map(HeapBlock::data)
    }

    pub fn data_mut(&mut self, id: BlockId) -> Option<&mut BlockData> {
        self.get_mut(id).map(|block| &mut block.data)
    }

    fn get_mut(&mut self, id: BlockId) -> Option<&mut HeapBlock> {
        if self.generations.get(id.index()).copied() != Some(id.generation) {
            return None;
        }
        self.entries.get_mut(id.index())?.as_mut()
    }

    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.get(id).is_some()
    }

    /// Increments the stored count. Returns `false` when `id` is stale.
    pub fn inc_ref(&self, id: BlockId) -> bool {
        match self.get(id) {
            Some(block) => {
                block.refcount.set(block.refcount.get() + 1);
                true
            }
            None => false,
        }
    }

    /// Decrements the stored count and removes the block once it drops to zero.
    ///
    /// The removed block is returned so the caller can release whatever it owned.
    pub fn dec_ref(&mut self, id: BlockId) -> Option<HeapBlock> {
        let block = self.get(id)?;
        let count = block.refcount.get();
        if count > 1 {
            block.refcount.set(count - 1);
            return None;
        }
        self.remove(id)
    }

    /// Removes a block regardless of its stored count.
    pub fn remove(&mut self, id: BlockId) -> Option<HeapBlock> {
        self.get(id)?;
        let block = self.entries[id.index()].take();
        self.free_list.push(id.index);
        block
    }

    /// Overwrites the stored count, bypassing normal accounting.
    ///
    /// Meant for fault injection and for repair tooling; ordinary code goes
    /// through `inc_ref`/`dec_ref`.
    pub fn set_refcount(&self, id: BlockId, count: u32) -> bool {
        match self.get(id) {
            Some(block) => {
                block.refcount.set(count);
                true
            }
            None => false,
        }
    }

    /// Re-records the block's byte size, e.g. after the runtime grew it in place.
    pub fn set_size(&mut self, id: BlockId, size: usize) -> bool {
        match self.get_mut(id) {
            Some(block) => {
                block.size = size;
                true
            }
            None => false,
        }
    }

    /// Flags a block as exempt from ref-count verification.
    ///
    /// Used for blocks whose references are held by a subsystem that cannot yet
    /// report them; the auditor skips the comparison and says so in its report.
    pub fn set_audit_exempt(&mut self, id: BlockId, exempt: bool) -> bool {
        match self.get_mut(id) {
            Some(block) => {
                block.audit_exempt = exempt;
                true
            }
            None => false,
        }
    }

    /// Iterates live blocks in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &HeapBlock)> {
        self.entries.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|block| {
                (
                    BlockId {
                        index: u32::try_from(index).unwrap_or(u32::MAX),
                        generation: self.generations[index],
                    },
                    block,
                )
            })
        })
    }

    /// Number of live blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scans every slot and groups live blocks by category.
    #[must_use]
    pub fn stats(&self) -> CategoryStats {
        let mut stats = CategoryStats::default();
        for slot in &self.entries {
            match slot {
                Some(block) => stats.record(block),
                None => stats.free_slots += 1,
            }
        }
        stats.total_slots = self.entries.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn reused_slot_invalidates_old_handle() {
        let mut heap = Heap::new();
        let first = heap.allocate(Category::Buffer, BlockData::Buffer(vec![1, 2]), "buffer");
        assert!(heap.dec_ref(first).is_some());
        let second = heap.allocate(Category::Buffer, BlockData::Buffer(vec![3]), "buffer");
        assert_eq!(first.index(), second.index());
        assert!(heap.get(first).is_none());
        assert!(heap.get(second).is_some());
    }

    #[test]
    fn dec_ref_keeps_block_until_last_reference() {
        let mut heap = Heap::new();
        let id = heap.allocate(Category::Buffer, BlockData::Buffer(Vec::new()), "buffer");
        heap.inc_ref(id);
        assert!(heap.dec_ref(id).is_none());
        assert_eq!(heap.get(id).map(HeapBlock::refcount), Some(1));
        assert!(heap.dec_ref(id).is_some());
        assert!(!heap.contains(id));
    }

    #[test]
    fn every_category_has_at_most_one_audit_role() {
        for category in Category::iter() {
            let roles = [category.is_counted(), category.requires_mark(), category.is_transient()];
            assert!(roles.iter().filter(|&&r| r).count() <= 1, "{category} has overlapping roles");
        }
    }

    #[test]
    fn stats_track_free_slots() {
        let mut heap = Heap::new();
        let a = heap.allocate(Category::Buffer, BlockData::Buffer(vec![0; 4]), "a");
        heap.allocate(Category::Buffer, BlockData::Buffer(vec![0; 4]), "b");
        heap.dec_ref(a);
        let stats = heap.stats();
        assert_eq!(stats.live_blocks, 1);
        assert_eq!(stats.free_slots, 1);
        assert_eq!(stats.total_slots, 2);
        assert_eq!(stats.tally(Category::Buffer), Tally { blocks: 1, bytes: 20 });
    }
}
