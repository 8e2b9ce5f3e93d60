//! Reset, reconciliation and verification phases.

use crate::{
    config::{AuditConfig, AuditFlags, CardinalityLimits},
    heap::{BlockData, Category, CategoryStats, Heap, HeapBlock},
    intern::{StringStats, StringTable, string_cost},
    runtime::RuntimeContext,
    tracer::AuditTracer,
    types::SentenceTarget,
    value::{object_name, render_array, string_text},
};

use super::report::{Diagnostic, ReportBuilder};

/// Clears every block's scratch state and reports blocks that should not
/// outlive the operation that allocated them.
///
/// Reset-only passes skip temporary and compiler blocks but still report
/// miscellaneous ones.
pub(super) fn reset_blocks<Tr: AuditTracer>(heap: &Heap, flags: AuditFlags, report: &mut ReportBuilder<'_, Tr>) {
    for (_, block) in heap.iter() {
        block.reset_scratch();
        let category = block.category();
        if category.is_transient() && (!flags.reset_only || category == Category::Misc) {
            report.emit(Diagnostic::Unexpected {
                category,
                description: block.description().to_owned(),
                tag: category.tag(),
            });
        }
        if let BlockData::OwnedString(s) = block.data()
            && s.len != s.text.len()
        {
            report.emit(Diagnostic::StringLength {
                text: s.text.clone(),
                declared: s.len,
                actual: s.text.len(),
            });
        }
    }
}

pub(super) fn check_cardinality<Tr: AuditTracer>(
    census: &CategoryStats,
    limits: &CardinalityLimits,
    report: &mut ReportBuilder<'_, Tr>,
) {
    for (category, ceiling) in limits.bounded() {
        let count = census.tally(category).blocks;
        if count > ceiling {
            report.emit(Diagnostic::Cardinality {
                category,
                count,
                ceiling,
            });
        }
    }
}

/// Compares the engine's running counters with the census.
pub(super) fn check_aggregates<Tr: AuditTracer>(
    census: &CategoryStats,
    ctx: &RuntimeContext,
    report: &mut ReportBuilder<'_, Tr>,
) {
    let counters = ctx.counters();
    let roots = ctx.roots();
    let call_outs = census.tally(Category::CallOut);
    let arrays = census.tally(Category::Array);
    let classes = census.tally(Category::Class);

    let checks = [
        ("call_out bytes", counters.call_out_bytes, call_outs.bytes),
        ("pending call_outs", roots.call_outs.len() as u64, call_outs.blocks),
        ("sentences", counters.sentences, census.tally(Category::Sentence).blocks),
        ("objects", counters.objects, census.tally(Category::Object).blocks),
        ("program blocks", counters.program_blocks, census.tally(Category::Program).blocks),
        ("arrays", counters.arrays, arrays.blocks),
        ("array bytes", counters.array_bytes, arrays.bytes),
        ("classes", counters.classes, classes.blocks),
        ("class bytes", counters.class_bytes, classes.bytes),
        ("mappings", counters.mappings, census.tally(Category::Mapping).blocks),
        ("sessions", roots.sessions.len() as u64, census.tally(Category::Interactive).blocks),
    ];
    for (counter, stored, actual) in checks {
        if stored != actual {
            report.emit(Diagnostic::Aggregate { counter, stored, actual });
        }
    }

    let tables = census.tally(Category::MapTable).blocks;
    if tables != counters.mappings {
        report.emit(Diagnostic::MapTables {
            tables,
            mappings: counters.mappings,
        });
    }
}

/// Recomputes the string totals from the string blocks and reports each
/// counter that disagrees.
pub(super) fn check_string_stats<Tr: AuditTracer>(
    heap: &Heap,
    strings: &StringTable,
    report: &mut ReportBuilder<'_, Tr>,
) {
    let mut actual = StringStats::default();
    for (_, block) in heap.iter() {
        let text = match block.data() {
            BlockData::SharedString(text) => text.as_str(),
            BlockData::OwnedString(s) => s.text.as_str(),
            _ => continue,
        };
        let cost = string_cost(text);
        let refs = u64::from(block.refcount());
        actual.distinct += 1;
        actual.distinct_bytes += cost;
        actual.references += refs;
        actual.allocated_bytes += refs * cost;
    }

    let stored = strings.stats();
    let checks = [
        ("distinct strings", stored.distinct, actual.distinct),
        ("string references", stored.references, actual.references),
        ("distinct string bytes", stored.distinct_bytes, actual.distinct_bytes),
        ("allocated string bytes", stored.allocated_bytes, actual.allocated_bytes),
    ];
    for (counter, stored, actual) in checks {
        if stored != actual {
            report.emit(Diagnostic::StringStat { counter, stored, actual });
        }
    }
}

/// Compares stored counts with recomputed ones, reports unreached blocks and
/// clears the visited flags.
pub(super) fn verify_blocks<Tr: AuditTracer>(heap: &Heap, config: &AuditConfig, report: &mut ReportBuilder<'_, Tr>) {
    for (id, block) in heap.iter() {
        let category = block.category();
        if category.is_counted() {
            if block.is_audit_exempt() {
                report.exempt(id, category, describe(heap, block));
            } else {
                verify_counts(heap, block, config, report);
            }
        } else if category.requires_mark() && !block.visited() {
            report.emit(Diagnostic::Orphan {
                category,
                description: describe_orphan(heap, block),
            });
        } else if category == Category::Ed {
            report.emit(Diagnostic::Unexpected {
                category,
                description: block.description().to_owned(),
                tag: category.tag(),
            });
        }
        block.clear_visited();
    }
}

fn verify_counts<Tr: AuditTracer>(heap: &Heap, block: &HeapBlock, config: &AuditConfig, report: &mut ReportBuilder<'_, Tr>) {
    if block.refcount() != block.expected_refs() {
        let contents = match block.data() {
            BlockData::Array(items) if block.category() == Category::Array => {
                Some(render_array(heap, items, config.render_depth))
            }
            _ => None,
        };
        report.emit(Diagnostic::CountMismatch {
            category: block.category(),
            description: describe(heap, block),
            stored: block.refcount(),
            expected: block.expected_refs(),
            contents,
        });
    }
    if let BlockData::Program(prog) = block.data()
        && prog.func_ref != block.expected_function_refs()
    {
        report.emit(Diagnostic::FunctionRefMismatch {
            program: describe(heap, block),
            stored: prog.func_ref,
            expected: block.expected_function_refs(),
        });
    }
}

/// Identifies a counted block in a diagnostic.
fn describe(heap: &Heap, block: &HeapBlock) -> String {
    match block.data() {
        BlockData::Object(ob) => string_text(heap, ob.name).unwrap_or("<unnamed>").to_owned(),
        BlockData::Program(prog) => string_text(heap, prog.filename).unwrap_or("<unnamed>").to_owned(),
        BlockData::Function(ptr) => {
            let owner = ptr.owner.and_then(|ob| object_name(heap, ob)).unwrap_or("(null)");
            format!("owned by {owner}")
        }
        BlockData::SharedString(text) => format!("{text:?}"),
        BlockData::OwnedString(s) => format!("{:?}", s.text),
        _ => block.description().to_owned(),
    }
}

/// Identifies an unreached block in an orphan warning.
fn describe_orphan(heap: &Heap, block: &HeapBlock) -> String {
    match block.data() {
        BlockData::Sentence(sentence) => {
            let owner = object_name(heap, sentence.owner).unwrap_or("(null)");
            let target = match sentence.target {
                SentenceTarget::Name(name) => string_text(heap, name).unwrap_or("(null)"),
                SentenceTarget::Function(_) => "<function>",
            };
            format!("{owner}:{target} - {}", block.description())
        }
        BlockData::Text(text) => format!("{text:?} ({})", block.description()),
        _ => block.description().to_owned(),
    }
}
