#![doc = include_str!("../../../README.md")]

// first: the block registry everything else is built on
mod heap;

pub mod audit;
mod config;
pub mod dump;
mod error;
mod intern;
pub mod listing;
mod runtime;
pub mod tracer;
pub mod types;
mod value;

pub use crate::{
    audit::{
        AuditReport, Diagnostic, REPORT_HEADER, RootKind, RootProvider, RootSink, Severity, check_all_blocks,
        check_all_blocks_strict, check_all_blocks_strict_with_tracer, check_all_blocks_with_tracer, self_check,
    },
    config::{AuditConfig, AuditFlags, CardinalityLimits, MAX_RENDER_DEPTH},
    dump::{DumpSummary, dump_registry, write_registry},
    error::{AuditError, ConfigError, DumpError, RuntimeError},
    heap::{
        BlockClass, BlockData, BlockId, Category, CategoryStats, Heap, HeapBlock, STRING_HEADER_SIZE, Tally,
    },
    intern::{StringStats, StringTable, string_cost},
    listing::{program_listing, write_listing},
    runtime::{ObjectLabel, ProgramSource, Roots, RuntimeContext, RuntimeCounters},
    tracer::{AuditEvent, AuditPhase, AuditTracer, LogTracer, NoopTracer, RecordingTracer, StderrTracer},
    value::{
        ARRAY_HEADER_SIZE, DEFAULT_RENDER_DEPTH, VALUE_SIZE, Value, object_name, render_array, render_value,
        string_text,
    },
};
