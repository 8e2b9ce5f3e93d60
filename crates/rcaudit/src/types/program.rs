use crate::heap::BlockId;

/// An inherited program and where its functions and variables start in the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inherit {
    pub program: BlockId,
    pub function_offset: usize,
    pub variable_offset: usize,
}

/// Payload of a program block. Every name and literal is a counted shared string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub filename: BlockId,
    pub inherits: Vec<Inherit>,
    /// `None` for undefined prototypes.
    pub function_names: Vec<Option<BlockId>>,
    pub variable_names: Vec<BlockId>,
    pub strings: Vec<BlockId>,
    /// Line-number block, owned exclusively.
    pub line_info: Option<BlockId>,
    /// Closures currently pinning code in this program.
    pub func_ref: u32,
    /// Functions including inherited ones.
    pub total_functions: usize,
    /// Variables including inherited ones; the size of an instance's variable block.
    pub total_variables: usize,
}
