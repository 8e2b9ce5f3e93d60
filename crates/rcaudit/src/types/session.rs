use smallvec::SmallVec;

use crate::{heap::BlockId, value::Value};

/// Custom "what?" message of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMessage {
    Function(BlockId),
    Text(BlockId),
}

/// Pending `input_to`: the sentence to dispatch and the values carried over to it.
#[derive(Debug, PartialEq)]
pub struct InputContinuation {
    pub sentence: BlockId,
    pub carryover: SmallVec<[Value; 2]>,
}

/// Payload of an interactive block, one per connected user.
#[derive(Debug, PartialEq)]
pub struct Session {
    /// Object the connection is attached to; counted.
    pub object: BlockId,
    pub input_to: Option<InputContinuation>,
    pub fail_message: Option<FailMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Function(BlockId),
    Name(BlockId),
}

/// Payload of a call_out block: a timer scheduled to call back into an object.
#[derive(Debug, PartialEq)]
pub struct CallOut {
    pub target: CallTarget,
    /// Object the call is made on, counted when present.
    pub object: Option<BlockId>,
    pub args: Vec<Value>,
    pub due: u64,
}
