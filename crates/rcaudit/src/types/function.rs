use crate::heap::BlockId;

/// What a closure calls when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Globally named function, by index into the simul table.
    Named { index: u16 },
    /// Built-in operation.
    Builtin { index: u16 },
    /// Function defined in the owner's program.
    ///
    /// A closure that cannot be rebound to another object pins the owner's
    /// program and counts toward its function-reference total.
    Local { index: u16, bindable: bool },
    /// Anonymous function compiled into `program`; always counts toward its
    /// function-reference total.
    Functional { program: BlockId },
}

/// Payload of a function pointer block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionPtr {
    pub kind: FunctionKind,
    /// Owning object; holds one reference when present.
    pub owner: Option<BlockId>,
    /// Bound argument array; holds one reference when present.
    pub args: Option<BlockId>,
}

impl FunctionPtr {
    /// Program whose function-reference total this closure contributes to,
    /// given the owner's current program.
    #[must_use]
    pub fn pinned_program(&self, owner_program: Option<BlockId>) -> Option<BlockId> {
        match self.kind {
            FunctionKind::Functional { program } => Some(program),
            FunctionKind::Local { bindable: false, .. } => owner_program,
            FunctionKind::Local { bindable: true, .. } | FunctionKind::Named { .. } | FunctionKind::Builtin { .. } => {
                None
            }
        }
    }
}
