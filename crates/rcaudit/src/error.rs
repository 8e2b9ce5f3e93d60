use std::{fmt, io, path::PathBuf};

use crate::{
    audit::AuditReport,
    heap::{BlockId, Category},
};

/// Error returned by the strict audit entry point.
#[derive(Debug)]
pub enum AuditError {
    /// At least one fatal diagnostic was found.
    ///
    /// Carries the complete report so the caller can print every finding
    /// before stopping.
    Corrupted(Box<AuditReport>),
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupted(report) => {
                write!(
                    f,
                    "heap corrupted: {} fatal finding(s)\n{}",
                    report.fatal_count(),
                    report.text()
                )
            }
        }
    }
}

impl std::error::Error for AuditError {}

/// Error returned by the raw registry dump.
#[derive(Debug)]
pub enum DumpError {
    /// Path rejected by the configured dump root.
    InvalidPath { path: PathBuf },
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPath { path } => write!(f, "invalid path '{}' for writing", path.display()),
            Self::Io { path, source } => write!(f, "unable to write '{}': {source}", path.display()),
        }
    }
}

impl std::error::Error for DumpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPath { .. } => None,
            Self::Io { source, .. } => Some(source),
        }
    }
}

/// Error returned when loading an `AuditConfig`.
#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid audit config: {err}"),
            Self::Invalid { field, reason } => write!(f, "invalid audit config field `{field}`: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err)
    }
}

/// Error returned by the engine-side helpers on `RuntimeContext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The handle does not resolve to a live block.
    Freed(BlockId),
    /// The block exists but belongs to another category.
    WrongCategory {
        id: BlockId,
        expected: Category,
        found: Category,
    },
    /// Variable slot out of range for the object's program.
    VariableIndex { index: usize, len: usize },
    /// The object is swapped out and has no program loaded.
    SwappedOut(BlockId),
    /// Closures still pin code in the program, so it cannot be unloaded.
    ProgramPinned { program: BlockId, func_refs: u32 },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Freed(id) => write!(f, "block {id} has been freed"),
            Self::WrongCategory { id, expected, found } => {
                write!(f, "block {id} is a {found}, expected a {expected}")
            }
            Self::VariableIndex { index, len } => {
                write!(f, "variable index {index} out of range for {len} variable(s)")
            }
            Self::SwappedOut(id) => write!(f, "object {id} is swapped out"),
            Self::ProgramPinned { program, func_refs } => {
                write!(f, "program {program} is pinned by {func_refs} closure(s)")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
