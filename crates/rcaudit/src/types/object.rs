use smallvec::SmallVec;

use crate::{heap::BlockId, value::Value};

/// Payload of an object block.
#[derive(Debug, PartialEq)]
pub struct Object {
    /// Object-name block, owned exclusively.
    pub name: BlockId,
    /// Compiled program; `None` while the object is swapped out.
    pub program: Option<BlockId>,
    pub variables: Vec<Value>,
    /// Command sentences registered by this object, owned exclusively.
    pub sentences: SmallVec<[BlockId; 2]>,
    /// Shared-string name under which the object is registered as living.
    pub living_name: Option<BlockId>,
    /// Shared-string filename of a program this one was replaced by.
    pub replaced_program: Option<BlockId>,
    /// Shared-string privilege label.
    pub privs: Option<BlockId>,
}

/// Where a sentence dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceTarget {
    /// A function pointer block, counted.
    Function(BlockId),
    /// A shared-string function name, counted.
    Name(BlockId),
}

/// A command binding or input continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Object the sentence belongs to. Not counted by the sentence itself.
    pub owner: BlockId,
    pub target: SentenceTarget,
    /// Shared-string verb, counted.
    pub verb: Option<BlockId>,
}
