use crate::{heap::BlockId, value::Value};

/// Payload of a mapping block. The table is owned exclusively and not counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub table: BlockId,
}

/// Hash table of a mapping, pointing at its node blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapTable {
    pub nodes: Vec<BlockId>,
}

/// One key/value pair. Both values own a reference.
#[derive(Debug, PartialEq)]
pub struct MapNode {
    pub key: Value,
    pub value: Value,
}
