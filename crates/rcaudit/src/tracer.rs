//! Audit pass tracing.
//!
//! The [`AuditTracer`] trait defines hook points at the interesting moments of a
//! pass: phase changes, every root reference handed to the marker, every
//! diagnostic, and every exempt block skipped during verification. The auditor
//! is generic over the tracer, so [`NoopTracer`] compiles away entirely.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (default) |
//! | [`StderrTracer`] | Human-readable progress log to stderr |
//! | [`LogTracer`] | Forwards events to the `log` facade |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |
//!
//! ```ignore
//! let mut tracer = RecordingTracer::new();
//! let report = check_all_blocks_with_tracer(&mut ctx, AuditFlags::default(), &mut tracer);
//! for event in tracer.events() { ... }
//! ```

use std::fmt;

use crate::{
    audit::{Diagnostic, RootKind},
    heap::{BlockId, Category},
};

/// Phases of one audit pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuditPhase {
    /// Scratch state cleared, census and transient-block checks.
    Reset,
    /// Cardinality, aggregate counter and string table reconciliation.
    Reconcile,
    /// References from the runtime's root set.
    Roots,
    /// References from every block in the registry.
    Scan,
    /// Stored counts compared with recomputed ones, orphans reported.
    Verify,
}

/// Trace event recorded by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    Phase(AuditPhase),
    Root { kind: RootKind, target: BlockId },
    Diagnostic(Diagnostic),
    Exempt { id: BlockId, category: Category },
    Finished { blocks: usize, diagnostics: usize },
}

/// Hooks called by the auditor.
///
/// All methods default to no-ops, so implementations only override what they
/// care about.
pub trait AuditTracer: fmt::Debug {
    #[inline(always)]
    fn on_phase(&mut self, _phase: AuditPhase) {}

    /// Called for each reference the root enumerator contributes.
    #[inline(always)]
    fn on_root(&mut self, _kind: RootKind, _target: BlockId) {}

    #[inline(always)]
    fn on_diagnostic(&mut self, _diagnostic: &Diagnostic) {}

    /// Called when verification skips an audit-exempt block.
    #[inline(always)]
    fn on_exempt(&mut self, _id: BlockId, _category: Category) {}

    /// Called once at the end of the pass.
    ///
    /// # Arguments
    /// * `blocks` - Number of blocks in the registry
    /// * `diagnostics` - Number of diagnostics in the report
    #[inline(always)]
    fn on_finish(&mut self, _blocks: usize, _diagnostics: usize) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl AuditTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Prints pass progress to stderr.
///
/// Output format:
/// ```text
/// --- audit: reset
/// --- audit: roots
///   root session -> #4.0
/// !!! bad ref count for array (allocate_array), is 1 - should be 2
/// --- audit: done, 37 blocks, 1 diagnostic(s)
/// ```
#[derive(Debug)]
pub struct StderrTracer {
    /// Maximum number of root lines to print. None = unlimited.
    limit: Option<usize>,
    /// Root lines printed so far.
    count: usize,
    /// Whether root output has been cut off.
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limit: None,
            count: 0,
            stopped: false,
        }
    }

    /// Creates a tracer that stops printing root references after `limit` lines.
    ///
    /// Phases and diagnostics are always printed.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
            stopped: false,
        }
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTracer for StderrTracer {
    fn on_phase(&mut self, phase: AuditPhase) {
        eprintln!("--- audit: {phase}");
    }

    fn on_root(&mut self, kind: RootKind, target: BlockId) {
        if self.stopped {
            return;
        }
        eprintln!("  root {kind} -> {target}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- root trace limit reached ({limit} references) ---");
            self.stopped = true;
        }
    }

    fn on_diagnostic(&mut self, diagnostic: &Diagnostic) {
        eprintln!("!!! {diagnostic}");
    }

    fn on_exempt(&mut self, id: BlockId, category: Category) {
        eprintln!("  skip exempt {category} {id}");
    }

    fn on_finish(&mut self, blocks: usize, diagnostics: usize) {
        eprintln!("--- audit: done, {blocks} blocks, {diagnostics} diagnostic(s)");
    }
}

// ============================================================================
// LogTracer
// ============================================================================

/// Forwards events to the `log` facade.
///
/// Phases and completion go to `debug`, root references to `trace`, and
/// diagnostics to `warn` (count mismatches to `error`).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTracer;

impl AuditTracer for LogTracer {
    fn on_phase(&mut self, phase: AuditPhase) {
        log::debug!("audit phase: {phase}");
    }

    fn on_root(&mut self, kind: RootKind, target: BlockId) {
        log::trace!("audit root {kind} -> {target}");
    }

    fn on_diagnostic(&mut self, diagnostic: &Diagnostic) {
        if diagnostic.is_fatal() {
            log::error!("{diagnostic}");
        } else {
            log::warn!("{diagnostic}");
        }
    }

    fn on_exempt(&mut self, id: BlockId, category: Category) {
        log::debug!("audit skipped exempt {category} {id}");
    }

    fn on_finish(&mut self, blocks: usize, diagnostics: usize) {
        log::debug!("audit finished: {blocks} blocks, {diagnostics} diagnostic(s)");
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Records every event in order.
///
/// Allocates per event; a full pass over a large heap records one event per
/// root reference, so use `with_limit` when only the start is interesting.
#[derive(Debug)]
pub struct RecordingTracer {
    events: Vec<AuditEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            limit: None,
        }
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<AuditEvent> {
        self.events
    }

    /// Root references recorded for `kind`.
    pub fn roots_of(&self, kind: RootKind) -> impl Iterator<Item = BlockId> + '_ {
        self.events.iter().filter_map(move |event| match event {
            AuditEvent::Root { kind: k, target } if *k == kind => Some(*target),
            _ => None,
        })
    }

    fn push(&mut self, event: AuditEvent) {
        if self.limit.is_some_and(|l| self.events.len() >= l) {
            return;
        }
        self.events.push(event);
    }
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTracer for RecordingTracer {
    fn on_phase(&mut self, phase: AuditPhase) {
        self.push(AuditEvent::Phase(phase));
    }

    fn on_root(&mut self, kind: RootKind, target: BlockId) {
        self.push(AuditEvent::Root { kind, target });
    }

    fn on_diagnostic(&mut self, diagnostic: &Diagnostic) {
        self.push(AuditEvent::Diagnostic(diagnostic.clone()));
    }

    fn on_exempt(&mut self, id: BlockId, category: Category) {
        self.push(AuditEvent::Exempt { id, category });
    }

    fn on_finish(&mut self, blocks: usize, diagnostics: usize) {
        self.push(AuditEvent::Finished { blocks, diagnostics });
    }
}
