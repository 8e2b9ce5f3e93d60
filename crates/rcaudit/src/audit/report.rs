use std::fmt::{self, Write};

use crate::{
    heap::{BlockId, Category, CategoryStats},
    tracer::{AuditPhase, AuditTracer},
};

use super::RootKind;

/// First line of every full report.
pub const REPORT_HEADER: &str = "Performing memory tests ...";

/// How serious a diagnostic is.
///
/// Ordered from least to most severe. `Accounting` and `CountMismatch` are
/// fatal: they make the strict entry point fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Note,
    Orphan,
    Cardinality,
    Structural,
    /// Engine counters or string totals disagree with the registry, or a
    /// reference does not resolve to a block of its category.
    Accounting,
    CountMismatch,
}

impl Severity {
    #[must_use]
    pub fn is_fatal(self) -> bool {
        self >= Self::Accounting
    }
}

/// One finding of an audit pass.
///
/// `Display` renders the line that goes into the report text.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Stored count differs from the number of references found.
    CountMismatch {
        category: Category,
        description: String,
        stored: u32,
        expected: u32,
        /// Rendered elements, for arrays.
        contents: Option<String>,
    },
    /// A program's closure count differs from the closures found pinning it.
    FunctionRefMismatch { program: String, stored: u32, expected: u32 },
    /// An aggregate's recorded byte size disagrees with its element count.
    SizeMismatch {
        category: Category,
        description: String,
        recorded: usize,
        implied: usize,
    },
    /// An owned string's cached length disagrees with its text.
    StringLength { text: String, declared: usize, actual: usize },
    /// More blocks of a singleton-like category than its ceiling allows.
    Cardinality { category: Category, count: u64, ceiling: u64 },
    /// A block that should be reachable was not reached.
    Orphan { category: Category, description: String },
    /// A block of a category that should not exist between passes.
    Unexpected {
        category: Category,
        description: String,
        tag: u16,
    },
    /// An engine-maintained counter disagrees with the registry.
    Aggregate {
        counter: &'static str,
        stored: u64,
        actual: u64,
    },
    /// Mapping-table blocks do not match the mapping counter.
    MapTables { tables: u64, mappings: u64 },
    /// A string-table total disagrees with the string blocks.
    StringStat {
        counter: &'static str,
        stored: u64,
        actual: u64,
    },
    /// An object block absent from both the live and the destructed list.
    NotInObjectList { name: String },
    /// An object without a loaded program; its program is not counted.
    Swapped { name: String },
    /// A reference to a freed block.
    Dangling {
        origin: String,
        target: BlockId,
        expected: Category,
    },
    /// A reference to a live block of the wrong category.
    WrongCategory {
        origin: String,
        target: BlockId,
        expected: Category,
        found: Category,
    },
    /// An exclusively owned block reached from more than one owner.
    MultipleOwners {
        category: Category,
        description: String,
        origin: String,
    },
    /// A counted block whose verification was skipped.
    Exempt { category: Category, description: String },
}

impl Diagnostic {
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::CountMismatch { .. } | Self::FunctionRefMismatch { .. } => Severity::CountMismatch,
            Self::Aggregate { .. } | Self::StringStat { .. } | Self::Dangling { .. } | Self::WrongCategory { .. } => {
                Severity::Accounting
            }
            Self::SizeMismatch { .. }
            | Self::StringLength { .. }
            | Self::MapTables { .. }
            | Self::NotInObjectList { .. }
            | Self::MultipleOwners { .. } => Severity::Structural,
            Self::Cardinality { .. } | Self::Unexpected { .. } => Severity::Cardinality,
            Self::Orphan { .. } => Severity::Orphan,
            Self::Swapped { .. } | Self::Exempt { .. } => Severity::Note,
        }
    }

    #[must_use]
    pub fn is_count_mismatch(&self) -> bool {
        self.severity() == Severity::CountMismatch
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity().is_fatal()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CountMismatch {
                category,
                description,
                stored,
                expected,
                contents,
            } => {
                write!(
                    f,
                    "bad ref count for {category} ({description}), is {stored} - should be {expected}"
                )?;
                if let Some(contents) = contents {
                    write!(f, "\n{contents}")?;
                }
                Ok(())
            }
            Self::FunctionRefMismatch {
                program,
                stored,
                expected,
            } => write!(
                f,
                "bad function ref count for program ({program}), is {stored} - should be {expected}"
            ),
            Self::SizeMismatch {
                category,
                description,
                recorded,
                implied,
            } => write!(
                f,
                "{category} size doesn't match block size: {description} (block {recorded}, contents {implied})"
            ),
            Self::StringLength { text, declared, actual } => {
                write!(f, "malloc'ed string length is incorrect: {text:?}: is {declared} should be {actual}")
            }
            Self::Cardinality {
                category,
                count,
                ceiling,
            } => write!(
                f,
                "WARNING: {count} {category} blocks allocated, at most {ceiling} expected."
            ),
            Self::Orphan { category, description } => write!(f, "WARNING: found orphan {category}: {description}"),
            Self::Unexpected {
                category,
                description,
                tag,
            } => write!(f, "WARNING: found {category}: {description} {tag:04x}"),
            Self::Aggregate { counter, stored, actual } | Self::StringStat { counter, stored, actual } => {
                write!(f, "WARNING: {counter} is: {stored} should be: {actual}")
            }
            Self::MapTables { tables, mappings } => {
                write!(f, "WARNING: {tables} tables for {mappings} mappings")
            }
            Self::NotInObjectList { name } => write!(f, "WARNING: {name} not in object list."),
            Self::Swapped { name } => write!(f, "{name} is swapped out; program not counted."),
            Self::Dangling {
                origin,
                target,
                expected,
            } => write!(f, "WARNING: {origin} holds a dangling {expected} reference {target}"),
            Self::WrongCategory {
                origin,
                target,
                expected,
                found,
            } => write!(
                f,
                "WARNING: {origin} holds a {expected} reference {target} to a {found}"
            ),
            Self::MultipleOwners {
                category,
                description,
                origin,
            } => write!(
                f,
                "WARNING: {category} ({description}) has multiple owners, again reached from {origin}"
            ),
            Self::Exempt { category, description } => {
                write!(f, "skipped audit-exempt {category} ({description})")
            }
        }
    }
}

/// Result of one audit pass.
///
/// `text` is the human-readable report handed back to the scripting layer;
/// `diagnostics` holds the same findings in structured form.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AuditReport {
    text: String,
    diagnostics: Vec<Diagnostic>,
    blocks_scanned: usize,
    exempted: usize,
    summary: Option<CategoryStats>,
}

impl AuditReport {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of blocks in the registry when the pass ran.
    #[must_use]
    pub fn blocks_scanned(&self) -> usize {
        self.blocks_scanned
    }

    /// Number of audit-exempt blocks skipped by verification.
    #[must_use]
    pub fn exempted(&self) -> usize {
        self.exempted
    }

    /// Per-category table, present when the pass ran verbose.
    #[must_use]
    pub fn summary(&self) -> Option<&CategoryStats> {
        self.summary.as_ref()
    }

    #[must_use]
    pub fn count_mismatches(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_count_mismatch()).count()
    }

    #[must_use]
    pub fn has_count_mismatch(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_count_mismatch)
    }

    /// Diagnostics that fail the strict entry point.
    #[must_use]
    pub fn fatal_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_fatal()).count()
    }

    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_fatal)
    }

    /// True when nothing above `Severity::Note` was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.diagnostics.iter().all(|d| d.severity() == Severity::Note)
    }

    /// Diagnostics at or above `severity`.
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.severity() >= severity)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Accumulates a report and forwards each event to the tracer.
pub(crate) struct ReportBuilder<'t, Tr: AuditTracer> {
    report: AuditReport,
    tracer: &'t mut Tr,
}

impl<'t, Tr: AuditTracer> ReportBuilder<'t, Tr> {
    pub fn new(tracer: &'t mut Tr) -> Self {
        Self {
            report: AuditReport::default(),
            tracer,
        }
    }

    pub fn line(&mut self, line: &str) {
        self.report.text.push_str(line);
        self.report.text.push('\n');
    }

    pub fn phase(&mut self, phase: AuditPhase) {
        self.tracer.on_phase(phase);
    }

    pub fn root(&mut self, kind: RootKind, target: BlockId) {
        self.tracer.on_root(kind, target);
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        self.tracer.on_diagnostic(&diagnostic);
        let _ = writeln!(self.report.text, "{diagnostic}");
        self.report.diagnostics.push(diagnostic);
    }

    pub fn exempt(&mut self, id: BlockId, category: Category, description: String) {
        self.tracer.on_exempt(id, category);
        self.report.exempted += 1;
        self.emit(Diagnostic::Exempt { category, description });
    }

    /// Appends the per-category table.
    pub fn summary(&mut self, stats: CategoryStats) {
        const RULE: &str = "------------------------------ ------ --------";
        let text = &mut self.report.text;
        let _ = writeln!(text, "\n{:<30} {:>6} {:>8}", "source", "blks", "total");
        let _ = writeln!(text, "{RULE}");
        for (category, tally) in &stats.by_category {
            let _ = writeln!(text, "{:<30} {:>6} {:>8}", category.to_string(), tally.blocks, tally.bytes);
        }
        let _ = writeln!(text, "{RULE}");
        let _ = writeln!(text, "{:<30} {:>6} {:>8}", "total", stats.live_blocks, stats.total_bytes);
        self.report.summary = Some(stats);
    }

    pub fn finish(mut self, blocks_scanned: usize) -> AuditReport {
        self.report.blocks_scanned = blocks_scanned;
        self.tracer.on_finish(blocks_scanned, self.report.diagnostics.len());
        self.report
    }
}
