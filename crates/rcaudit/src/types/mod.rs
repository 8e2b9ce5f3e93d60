//! Payload types for the block categories that own further references.

mod function;
mod ident;
mod mapping;
mod object;
mod program;
mod session;

pub use function::{FunctionKind, FunctionPtr};
pub use ident::{IdentEntry, IdentKind, IdentTable};
pub use mapping::{MapNode, MapTable, Mapping};
pub use object::{Object, Sentence, SentenceTarget};
pub use program::{Inherit, Program};
pub use session::{CallOut, CallTarget, FailMessage, InputContinuation, Session};

/// A privately owned string together with the length the runtime believes it has.
///
/// The declared length is cached separately from the text so that an in-place
/// write that forgets to update it shows up in the audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedString {
    pub text: String,
    pub len: usize,
}

impl OwnedString {
    #[must_use]
    pub fn new(text: String) -> Self {
        let len = text.len();
        Self { text, len }
    }
}
