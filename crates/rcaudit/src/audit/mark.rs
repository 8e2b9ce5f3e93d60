use std::fmt;

use crate::{
    heap::{BlockId, Category, Heap, HeapBlock},
    tracer::AuditTracer,
    types::{Sentence, SentenceTarget},
    value::Value,
};

use super::{
    RootKind,
    report::{Diagnostic, ReportBuilder},
    roots::RootSink,
};

/// Where the reference currently being followed comes from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Origin {
    Root(RootKind),
    Block(BlockId, Category),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(kind) => write!(f, "root {kind}"),
            Self::Block(id, category) => write!(f, "{category} {id}"),
        }
    }
}

/// Applies references to the per-block scratch state.
///
/// Counted blocks get their expected count bumped once per reference;
/// exclusively owned blocks get their visited flag set. A reference that does
/// not resolve, or resolves to the wrong category, is reported and dropped.
pub(crate) struct Marker<'a, 't, Tr: AuditTracer> {
    heap: &'a Heap,
    report: &'a mut ReportBuilder<'t, Tr>,
    origin: Origin,
}

impl<'a, 't, Tr: AuditTracer> Marker<'a, 't, Tr> {
    pub fn new(heap: &'a Heap, report: &'a mut ReportBuilder<'t, Tr>) -> Self {
        Self {
            heap,
            report,
            origin: Origin::Root(RootKind::LiveObject),
        }
    }

    pub fn set_origin(&mut self, origin: Origin) {
        self.origin = origin;
    }

    pub fn report(&mut self) -> &mut ReportBuilder<'t, Tr> {
        &mut *self.report
    }

    fn resolve(&mut self, id: BlockId, expected: Category) -> Option<&'a HeapBlock> {
        if let Origin::Root(kind) = self.origin {
            self.report.root(kind, id);
        }
        let heap = self.heap;
        match heap.get(id) {
            None => {
                self.report.emit(Diagnostic::Dangling {
                    origin: self.origin.to_string(),
                    target: id,
                    expected,
                });
                None
            }
            Some(block) if block.category() != expected => {
                self.report.emit(Diagnostic::WrongCategory {
                    origin: self.origin.to_string(),
                    target: id,
                    expected,
                    found: block.category(),
                });
                None
            }
            Some(block) => Some(block),
        }
    }

    /// Records one counted reference.
    pub fn count(&mut self, id: BlockId, expected: Category) {
        if let Some(block) = self.resolve(id, expected) {
            block.bump_expected();
        }
    }

    pub fn visit(&mut self, value: &Value) {
        if let (Some(id), Some(category)) = (value.ref_id(), value.expected_category()) {
            self.count(id, category);
        }
    }

    pub fn visit_all<'v>(&mut self, values: impl IntoIterator<Item = &'v Value>) {
        for value in values {
            self.visit(value);
        }
    }

    /// Marks an exclusively owned block as reached. Reaching it a second time
    /// means two owners share it.
    pub fn mark(&mut self, id: BlockId, expected: Category) {
        if let Some(block) = self.resolve(id, expected)
            && block.mark_visited()
        {
            self.report.emit(Diagnostic::MultipleOwners {
                category: expected,
                description: block.description().to_owned(),
                origin: self.origin.to_string(),
            });
        }
    }

    /// Records a closure pinning code in `program`.
    pub fn count_function_ref(&mut self, program: BlockId) {
        if let Some(block) = self.resolve(program, Category::Program) {
            block.bump_expected_func();
        }
    }

    /// Counts what a sentence refers to. The owner is not counted here.
    pub fn mark_sentence(&mut self, sentence: &Sentence) {
        match sentence.target {
            SentenceTarget::Function(fp) => self.count(fp, Category::Function),
            SentenceTarget::Name(name) => self.count(name, Category::SharedString),
        }
        if let Some(verb) = sentence.verb {
            self.count(verb, Category::SharedString);
        }
    }
}

impl<Tr: AuditTracer> RootSink for Marker<'_, '_, Tr> {
    fn count(&mut self, id: BlockId, category: Category) {
        Marker::count(self, id, category);
    }

    fn visit(&mut self, value: &Value) {
        Marker::visit(self, value);
    }

    fn mark(&mut self, id: BlockId, category: Category) {
        Marker::mark(self, id, category);
    }
}
