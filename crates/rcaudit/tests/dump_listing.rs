//! Tests for the raw registry dump and the program listing.

use std::{fs, path::PathBuf};

use pretty_assertions::assert_eq;
use rcaudit::{
    AuditConfig, BlockId, Category, DumpError, ProgramSource, RuntimeContext, RuntimeError, Value, dump_registry,
    program_listing, write_registry,
};

fn world() -> (RuntimeContext, BlockId, BlockId) {
    let mut ctx = RuntimeContext::new();
    let base = ctx
        .new_program(ProgramSource::new("std/base.c").function("create").variable("id"))
        .unwrap();
    let room = ctx
        .new_program(
            ProgramSource::new("std/room.c")
                .inherit(base)
                .function("init")
                .variable("exits")
                .string("A quiet room.\nNothing happens here, or anywhere else."),
        )
        .unwrap();
    let ob = ctx.new_object("std/room#1", room).unwrap();
    ctx.release_block(room);
    ctx.release_block(base);
    let items = ctx.new_array(vec![Value::Number(1)]);
    ctx.set_variable(ob, 1, items).unwrap();
    (ctx, base, room)
}

/// A scratch path unique to this test process.
fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rcaudit-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

// =============================================================================
// 1. Registry dump
// =============================================================================

/// One line per block between the header and the totals.
#[test]
fn dump_lists_every_block() {
    let (ctx, _, _) = world();
    let mut out = Vec::new();
    let summary = write_registry(ctx.heap(), &mut out, None).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(summary.chunks as usize, ctx.heap().len());
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "          id     gametick          ptr   tag      sz desc");
    assert_eq!(lines[ctx.heap().len() + 1], format!("total =    {:>8}", summary.total_bytes));
    assert!(text.contains("\ncategories:\n\n"), "{text}");
}

/// Block lines carry serial, tick, slot, class:minor tag, size and
/// description.
#[test]
fn dump_filter_restricts_block_lines() {
    let (ctx, _, _) = world();
    let mut out = Vec::new();
    let summary = write_registry(ctx.heap(), &mut out, Some(Category::Array)).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(summary.chunks, 1);
    assert_eq!(summary.total_bytes, 40);
    let line = text.lines().nth(1).unwrap();
    assert!(line.ends_with(" 4:044      40 allocate_array"), "{line}");
    assert!(text.contains("\n  44:          1         40\n"), "{text}");
    assert!(text.contains("\n  11:          2 "), "category table covers the whole registry:\n{text}");
}

/// An empty heap dumps only the header, zero totals and an all-zero table.
#[test]
fn empty_heap_dump() {
    let ctx = RuntimeContext::new();
    let mut out = Vec::new();
    let summary = write_registry(ctx.heap(), &mut out, None).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(summary.chunks, 0);
    assert!(
        text.contains("total =           0\n# chunks =        0\nave. bytes per chunk =    0.00\n"),
        "{text}"
    );
}

/// Dumping to a file writes the same text as dumping to memory.
#[test]
fn dump_to_file_matches_in_memory_dump() {
    let (ctx, _, _) = world();
    let path = scratch_dir("file").join("heap.dump");
    let summary = dump_registry(&ctx, &path, None).unwrap();

    let mut expected = Vec::new();
    write_registry(ctx.heap(), &mut expected, None).unwrap();
    assert_eq!(fs::read(&path).unwrap(), expected);
    assert_eq!(summary.chunks as usize, ctx.heap().len());
    fs::remove_file(&path).unwrap();
}

/// With a dump root, paths resolve under it and cannot climb out.
#[test]
fn dump_root_confines_paths() {
    let (mut ctx, _, _) = world();
    let root = scratch_dir("root");
    ctx.set_config(AuditConfig::new().with_dump_root(&root));

    dump_registry(&ctx, "/heap.dump", Some(Category::Program)).unwrap();
    assert!(root.join("heap.dump").is_file());
    fs::remove_file(root.join("heap.dump")).unwrap();

    let err = dump_registry(&ctx, "../heap.dump", None).unwrap_err();
    assert!(matches!(err, DumpError::InvalidPath { .. }), "{err}");
    assert!(err.to_string().starts_with("invalid path '../heap.dump'"), "{err}");
}

/// A path in a missing directory is an I/O error naming the path.
#[test]
fn dump_reports_io_errors() {
    let (ctx, _, _) = world();
    let path = scratch_dir("io").join("missing").join("heap.dump");
    let err = dump_registry(&ctx, &path, None).unwrap_err();
    assert!(matches!(err, DumpError::Io { .. }), "{err}");
    assert!(std::error::Error::source(&err).is_some());
}

// =============================================================================
// 2. Program listing
// =============================================================================

/// The listing shows inherits with their offsets, then the details of the
/// program and of everything it inherits.
#[test]
fn listing_shows_inherits_and_details() {
    let (ctx, _, room) = world();
    let listing = program_listing(ctx.heap(), room).unwrap();
    let lines: Vec<&str> = listing.lines().collect();

    assert_eq!(
        lines[..6],
        [
            "NAME: /std/room.c",
            "INHERITS:",
            "\tname                    fio    vio",
            "\t----------------        ---    ---",
            "\tstd/base.c                0      0",
            "FUNCTIONS:",
        ]
    );
    assert_eq!(lines[6], "   0: init");
    assert!(listing.contains(";;;  *** Detailed info for std/room.c ***\nVARIABLES:\n   0: exits\n"), "{listing}");
    assert!(
        listing.contains("STRINGS:\n   0: A quiet room.\\nNothing happens he...\n"),
        "{listing}"
    );
    assert!(listing.contains(";;;  *** Detailed info for std/base.c ***\nVARIABLES:\n   0: id\n"), "{listing}");
}

/// Only program blocks can be listed.
#[test]
fn listing_rejects_non_programs() {
    let (ctx, _, _) = world();
    let ob = ctx.roots().objects[0];
    assert_eq!(
        program_listing(ctx.heap(), ob),
        Err(RuntimeError::WrongCategory {
            id: ob,
            expected: Category::Program,
            found: Category::Object,
        })
    );
}
