//! Tests for the reconciliation and structural checks: category ceilings,
//! aggregate counters, string totals, orphans, transient blocks and the
//! per-block consistency checks made while scanning.

use pretty_assertions::assert_eq;
use rcaudit::{
    AuditConfig, AuditFlags, BlockData, BlockId, CardinalityLimits, Category, Diagnostic, ProgramSource,
    RuntimeContext, Severity, Value, check_all_blocks, types::IdentKind,
};

fn room_world() -> (RuntimeContext, BlockId) {
    let mut ctx = RuntimeContext::new();
    let prog = ctx
        .new_program(
            ProgramSource::new("std/room.c")
                .function("do_look")
                .variable("items")
                .variable("extra"),
        )
        .unwrap();
    let room = ctx.new_object("std/room#1", prog).unwrap();
    ctx.release_block(prog);
    (ctx, room)
}

fn id_of(value: &Value) -> BlockId {
    value.ref_id().expect("value holds a block")
}

fn warnings(text: &str) -> Vec<&str> {
    text.lines().filter(|line| line.starts_with("WARNING")).collect()
}

// =============================================================================
// 1. Cardinality
// =============================================================================

/// Three config tables against a ceiling of one give exactly one warning.
#[test]
fn too_many_config_tables_warn_once() {
    let (mut ctx, _) = room_world();
    for _ in 0..3 {
        ctx.allocate_block(Category::ConfigTable, 64, "read_config");
    }

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(
        report.diagnostics(),
        &[Diagnostic::Cardinality {
            category: Category::ConfigTable,
            count: 3,
            ceiling: 1,
        }]
    );
    assert_eq!(
        warnings(report.text()),
        vec!["WARNING: 3 config table blocks allocated, at most 1 expected."]
    );
}

/// A single config table is within its ceiling.
#[test]
fn single_config_table_is_fine() {
    let (mut ctx, _) = room_world();
    ctx.allocate_block(Category::ConfigTable, 64, "read_config");

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(report.is_clean(), "unexpected diagnostics:\n{}", report.text());
}

/// Configured ceilings replace the stock ones.
#[test]
fn configured_ceilings_are_honoured() {
    let (mut ctx, _) = room_world();
    ctx.set_config(AuditConfig::new().with_ceilings(CardinalityLimits {
        config_tables: 5,
        ..CardinalityLimits::default()
    }));
    for _ in 0..3 {
        ctx.allocate_block(Category::ConfigTable, 64, "read_config");
    }

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(report.is_clean(), "unexpected diagnostics:\n{}", report.text());
}

/// Object tables allow two blocks and warn on the third.
#[test]
fn object_table_ceiling_is_two() {
    let (mut ctx, _) = room_world();
    ctx.allocate_block(Category::ObjectTable, 128, "init_otable");
    ctx.allocate_block(Category::ObjectTable, 128, "init_otable");
    assert!(check_all_blocks(&mut ctx, AuditFlags::default()).is_clean());

    ctx.allocate_block(Category::ObjectTable, 128, "init_otable");
    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(
        warnings(report.text()),
        vec!["WARNING: 3 object table blocks allocated, at most 2 expected."]
    );
}

// =============================================================================
// 2. Aggregate counters
// =============================================================================

/// A drifted array counter is reported with both values.
#[test]
fn array_counter_drift_is_reported() {
    let (mut ctx, room) = room_world();
    let arr = ctx.new_array(vec![Value::Number(1)]);
    ctx.set_variable(room, 0, arr).unwrap();
    ctx.counters_mut().arrays += 1;

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(warnings(report.text()), vec!["WARNING: arrays is: 2 should be: 1"]);
}

/// The mapping counter is checked against both mapping and table blocks.
#[test]
fn mapping_counter_drift_reports_tables_too() {
    let (mut ctx, room) = room_world();
    let map = ctx.new_mapping(vec![(Value::Number(1), Value::Number(2))]);
    ctx.set_variable(room, 0, map).unwrap();
    ctx.counters_mut().mappings += 1;

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(
        report.diagnostics(),
        &[
            Diagnostic::Aggregate {
                counter: "mappings",
                stored: 2,
                actual: 1,
            },
            Diagnostic::MapTables { tables: 1, mappings: 2 },
        ]
    );
}

/// Removing a call_out from the pending queue without freeing it shows up
/// in the queue length check and as an unretained reference to its object.
#[test]
fn call_out_queue_drift_is_reported() {
    let (mut ctx, room) = room_world();
    ctx.call_out(room, "reset", Vec::new(), 10).unwrap();
    ctx.roots_mut().call_outs.clear();

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(
        report.diagnostics().contains(&Diagnostic::Aggregate {
            counter: "pending call_outs",
            stored: 0,
            actual: 1,
        }),
        "missing queue warning:\n{}",
        report.text()
    );
    assert!(report.has_count_mismatch());
}

// =============================================================================
// 3. String totals
// =============================================================================

/// Corrupting one string counter gives exactly one line naming it.
#[test]
fn string_reference_total_drift_is_reported_alone() {
    let (mut ctx, room) = room_world();
    let s = ctx.new_shared_string("lamp");
    ctx.set_variable(room, 0, s).unwrap();
    let before = ctx.strings().stats().references;
    ctx.strings_mut().stats_mut().references += 1;

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    let lines = warnings(report.text());
    assert_eq!(lines.len(), 1, "expected one warning, got:\n{}", report.text());
    assert_eq!(
        lines[0],
        format!("WARNING: string references is: {} should be: {before}", before + 1)
    );
}

/// Owned strings count toward the totals like shared ones.
#[test]
fn owned_strings_are_part_of_the_totals() {
    let (mut ctx, room) = room_world();
    let s = ctx.new_malloc_string("a dusty lamp");
    let id = id_of(&s);
    ctx.set_variable(room, 0, s).unwrap();
    assert!(ctx.retain_block(id));
    ctx.set_variable(room, 1, Value::String(id)).unwrap();

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(report.is_clean(), "unexpected diagnostics:\n{}", report.text());
}

// =============================================================================
// 4. Orphans and transient blocks
// =============================================================================

/// A sentence detached from its object is an orphan described by owner and
/// target.
#[test]
fn detached_sentence_is_an_orphan() {
    let (mut ctx, room) = room_world();
    ctx.add_action(room, "do_look", "look").unwrap();
    if let Some(BlockData::Object(ob)) = ctx.heap_mut().data_mut(room) {
        ob.sentences.clear();
    }

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(
        report
            .text()
            .contains("WARNING: found orphan sentence: std/room#1:do_look - add_action\n"),
        "missing orphan line:\n{}",
        report.text()
    );
}

/// A config string dropped from the root list is an orphan.
#[test]
fn unlisted_config_string_is_an_orphan() {
    let (mut ctx, _) = room_world();
    ctx.add_config_string("/log/debug.log");
    assert!(check_all_blocks(&mut ctx, AuditFlags::default()).is_clean());

    ctx.roots_mut().config_strings.clear();
    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(
        warnings(report.text()),
        vec![r#"WARNING: found orphan string: "/log/debug.log" (config file)"#]
    );
    assert_eq!(report.at_least(Severity::Orphan).count(), 1);
}

/// Permanent identifiers are reached through the identifier table only.
#[test]
fn permanent_identifiers_need_their_table() {
    let (mut ctx, _) = room_world();
    let table = ctx.new_ident_table(
        8,
        &[
            ("write", IdentKind::Builtin),
            ("tell_room", IdentKind::SimulFunction),
            ("x", IdentKind::Local),
        ],
    );
    assert!(check_all_blocks(&mut ctx, AuditFlags::default()).is_clean());

    assert!(ctx.free_block(table));
    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    let orphans: Vec<_> = report
        .diagnostics()
        .iter()
        .filter(|d| matches!(d, Diagnostic::Orphan { category: Category::PermIdent, .. }))
        .collect();
    assert_eq!(orphans.len(), 2, "got:\n{}", report.text());
}

/// Temporary, compiler scratch and miscellaneous blocks should not exist
/// between passes; each is reported with its tag.
#[test]
fn transient_blocks_are_reported_with_tag() {
    let (mut ctx, _) = room_world();
    ctx.allocate_block(Category::Temporary, 16, "scratch");
    ctx.allocate_block(Category::Misc, 32, "misc");

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(
        warnings(report.text()),
        vec![
            "WARNING: found temporary block: scratch 0101",
            "WARNING: found miscellaneous block: misc 0505",
        ]
    );
}

/// Leftover editor buffers are reported during verification.
#[test]
fn editor_buffer_is_unexpected() {
    let (mut ctx, _) = room_world();
    ctx.allocate_block(Category::Ed, 256, "ed_start");

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(warnings(report.text()), vec!["WARNING: found ed block: ed_start 050e"]);
}

// =============================================================================
// 5. Structural checks
// =============================================================================

/// An owned string whose cached length disagrees with its text is reported.
#[test]
fn owned_string_length_mismatch_is_reported() {
    let (mut ctx, room) = room_world();
    let s = ctx.new_malloc_string("hello");
    let id = id_of(&s);
    ctx.set_variable(room, 0, s).unwrap();
    if let Some(BlockData::OwnedString(owned)) = ctx.heap_mut().data_mut(id) {
        owned.len = 3;
    }

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(
        report.diagnostics(),
        &[Diagnostic::StringLength {
            text: "hello".to_owned(),
            declared: 3,
            actual: 5,
        }]
    );
    assert_eq!(
        report.text().lines().nth(1),
        Some(r#"malloc'ed string length is incorrect: "hello": is 3 should be 5"#)
    );
}

/// An array whose recorded size disagrees with its element count is reported.
#[test]
fn array_size_mismatch_is_reported() {
    let (mut ctx, room) = room_world();
    let arr = ctx.new_array(vec![Value::Number(1), Value::Number(2)]);
    let id = id_of(&arr);
    ctx.set_variable(room, 0, arr).unwrap();
    ctx.heap_mut().set_size(id, 10);

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(
        report.diagnostics().iter().any(|d| matches!(
            d,
            Diagnostic::SizeMismatch { category: Category::Array, recorded: 10, .. }
        )),
        "missing size warning:\n{}",
        report.text()
    );
}

/// Empty classes carry no element slots and are not size checked.
#[test]
fn empty_class_is_not_size_checked() {
    let (mut ctx, room) = room_world();
    let class = ctx.new_class(Vec::new());
    let id = id_of(&class);
    ctx.set_variable(room, 0, class).unwrap();
    ctx.heap_mut().set_size(id, 999);

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(
        !report
            .diagnostics()
            .iter()
            .any(|d| matches!(d, Diagnostic::SizeMismatch { .. })),
        "unexpected size warning:\n{}",
        report.text()
    );
}

/// Two mappings sharing one table name the table once as shared; the table
/// they no longer use is an orphan.
#[test]
fn shared_map_table_is_reported() {
    let (mut ctx, room) = room_world();
    let first = ctx.new_mapping(Vec::new());
    let second = ctx.new_mapping(Vec::new());
    let (first_id, second_id) = (id_of(&first), id_of(&second));
    ctx.set_variable(room, 0, first).unwrap();
    ctx.set_variable(room, 1, second).unwrap();
    let Some(BlockData::Mapping(map)) = ctx.heap().data(first_id) else {
        panic!("mapping block expected");
    };
    let shared = map.table;
    if let Some(BlockData::Mapping(map)) = ctx.heap_mut().data_mut(second_id) {
        map.table = shared;
    }

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    let origin = format!("{} {second_id}", Category::Mapping);
    assert!(
        matches!(
            report.diagnostics(),
            [
                Diagnostic::MultipleOwners { category: Category::MapTable, origin: found, .. },
                Diagnostic::Orphan { category: Category::MapTable, .. },
            ] if *found == origin
        ),
        "{}",
        report.text()
    );
    let line = format!("WARNING: mapping table (new_map_table) has multiple owners, again reached from {origin}\n");
    assert!(report.text().contains(&line), "{}", report.text());
    assert!(!report.has_fatal());
}

/// An object missing from both object lists is reported by name, and the
/// list reference it lost shows up as a bad count.
#[test]
fn object_missing_from_lists_is_reported() {
    let (mut ctx, _) = room_world();
    ctx.roots_mut().objects.clear();

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(
        report.text().contains("WARNING: std/room#1 not in object list.\n"),
        "missing list warning:\n{}",
        report.text()
    );
    assert!(
        report
            .text()
            .contains("bad ref count for object (std/room#1), is 1 - should be 0"),
        "missing count line:\n{}",
        report.text()
    );
}

/// Destructed objects still awaiting release are listed and audit clean.
#[test]
fn destructed_objects_are_listed() {
    let (mut ctx, room) = room_world();
    ctx.add_action(room, "do_look", "look").unwrap();
    ctx.destruct_object(room).unwrap();

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(report.is_clean(), "unexpected diagnostics:\n{}", report.text());

    ctx.flush_destructed();
    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(report.is_clean(), "unexpected diagnostics:\n{}", report.text());
    assert!(ctx.heap().is_empty(), "{} blocks left", ctx.heap().len());
}

/// A swapped-out object is noted and its program is not counted.
#[test]
fn swapped_out_object_is_noted() {
    let (mut ctx, room) = room_world();
    ctx.swap_out(room).unwrap();

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(
        report.diagnostics(),
        &[Diagnostic::Swapped {
            name: "std/room#1".to_owned()
        }]
    );
    assert!(report.is_clean());
    assert_eq!(ctx.counters().program_blocks, 0);
}
