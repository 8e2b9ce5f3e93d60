//! Reference-count audit.
//!
//! One pass runs these phases in order:
//!
//! 1. **Reset**: clear every block's scratch state and flag transient blocks
//!    that outlived the operation that allocated them.
//! 2. **Reconcile**: compare category ceilings, the engine's aggregate
//!    counters and the string totals against a census of the registry.
//! 3. **Roots**: count the references held by the runtime itself (sessions,
//!    stacks, timers, the object lists, registered root providers).
//! 4. **Scan**: count the references held by every block.
//! 5. **Verify**: compare each stored count with the recomputed one, report
//!    unreached blocks, and clear the visited flags.
//!
//! The pass borrows the `RuntimeContext` mutably for its whole duration, so
//! nothing can allocate, free or re-enter the auditor while it runs. Apart
//! from the scratch fields nothing in the heap is modified.

mod mark;
mod report;
mod roots;
mod scan;
mod verify;

use ahash::AHashSet;

pub use report::{AuditReport, Diagnostic, REPORT_HEADER, Severity};
pub use roots::{RootKind, RootProvider, RootSink};

use crate::{
    config::AuditFlags,
    error::AuditError,
    heap::BlockId,
    runtime::RuntimeContext,
    tracer::{AuditPhase, AuditTracer, LogTracer, NoopTracer},
};

use self::{mark::Marker, report::ReportBuilder};

/// Runs one audit pass and returns its report.
///
/// Never fails: every inconsistency becomes a diagnostic. In reset-only mode
/// the scratch state is cleared and only the reset-phase checks and, when
/// verbose, the summary table are reported.
pub fn check_all_blocks(ctx: &mut RuntimeContext, flags: AuditFlags) -> AuditReport {
    check_all_blocks_with_tracer(ctx, flags, &mut NoopTracer)
}

/// Like [`check_all_blocks`], reporting progress to `tracer`.
pub fn check_all_blocks_with_tracer<Tr: AuditTracer>(
    ctx: &mut RuntimeContext,
    flags: AuditFlags,
    tracer: &mut Tr,
) -> AuditReport {
    let ctx: &RuntimeContext = ctx;
    let heap = ctx.heap();
    let mut report = ReportBuilder::new(tracer);

    report.phase(AuditPhase::Reset);
    if !flags.reset_only {
        report.line(REPORT_HEADER);
    }
    verify::reset_blocks(heap, flags, &mut report);
    let census = heap.stats();
    if flags.reset_only {
        if flags.verbose {
            report.summary(census);
        }
        return report.finish(heap.len());
    }

    report.phase(AuditPhase::Reconcile);
    verify::check_cardinality(&census, &ctx.config().ceilings, &mut report);
    verify::check_aggregates(&census, ctx, &mut report);
    verify::check_string_stats(heap, ctx.strings(), &mut report);

    let listed: AHashSet<BlockId> = ctx
        .roots()
        .objects
        .iter()
        .chain(&ctx.roots().destructed)
        .copied()
        .collect();
    {
        let mut marker = Marker::new(heap, &mut report);
        marker.report().phase(AuditPhase::Roots);
        roots::mark_roots(ctx, &mut marker);
        marker.report().phase(AuditPhase::Scan);
        scan::scan_registry(heap, &listed, &mut marker);
    }

    report.phase(AuditPhase::Verify);
    verify::verify_blocks(heap, ctx.config(), &mut report);
    if flags.verbose {
        report.summary(census);
    }
    report.finish(heap.len())
}

/// Runs a pass and fails on any fatal diagnostic: a wrong stored count, a
/// drifted engine counter or string total, or a reference that does not
/// resolve.
///
/// Structural warnings, orphans and cardinality warnings do not fail the
/// pass; they are still in the returned report.
pub fn check_all_blocks_strict(ctx: &mut RuntimeContext, flags: AuditFlags) -> Result<AuditReport, AuditError> {
    check_all_blocks_strict_with_tracer(ctx, flags, &mut NoopTracer)
}

pub fn check_all_blocks_strict_with_tracer<Tr: AuditTracer>(
    ctx: &mut RuntimeContext,
    flags: AuditFlags,
    tracer: &mut Tr,
) -> Result<AuditReport, AuditError> {
    let report = check_all_blocks_with_tracer(ctx, flags, tracer);
    if report.has_fatal() {
        Err(AuditError::Corrupted(Box::new(report)))
    } else {
        Ok(report)
    }
}

/// Internal consistency check for debug builds: audits the heap and aborts
/// the process after printing the full report if the strict pass fails.
pub fn self_check(ctx: &mut RuntimeContext) {
    if let Err(err) = check_all_blocks_strict_with_tracer(ctx, AuditFlags::default(), &mut LogTracer) {
        log::error!("heap self-check failed, aborting");
        eprint!("{err}");
        std::process::abort();
    }
}
