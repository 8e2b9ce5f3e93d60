//! Tests for root enumeration: every reference held by the runtime itself
//! must be counted exactly once, and forgetting one shows up as a bad count.

use pretty_assertions::assert_eq;
use rcaudit::{
    AuditEvent, AuditFlags, BlockId, Category, Diagnostic, ObjectLabel, ProgramSource, RecordingTracer, RootKind,
    RootProvider, RootSink, RuntimeContext, Value, check_all_blocks, check_all_blocks_with_tracer,
    types::FunctionKind,
};

fn room_world() -> (RuntimeContext, BlockId) {
    let mut ctx = RuntimeContext::new();
    let prog = ctx
        .new_program(
            ProgramSource::new("std/player.c")
                .function("get_name")
                .function("heart_beat")
                .variable("name")
                .variable("inventory"),
        )
        .unwrap();
    let player = ctx.new_object("std/player#7", prog).unwrap();
    ctx.release_block(prog);
    (ctx, player)
}

fn id_of(value: &Value) -> BlockId {
    value.ref_id().expect("value holds a block")
}

fn assert_clean(ctx: &mut RuntimeContext) {
    let report = check_all_blocks(ctx, AuditFlags::default());
    assert!(report.is_clean(), "unexpected diagnostics:\n{}", report.text());
}

// =============================================================================
// 1. Sessions
// =============================================================================

/// A session counts its object once, on top of the live-object list.
#[test]
fn session_counts_its_object_once() {
    let (mut ctx, player) = room_world();
    ctx.connect_session(player).unwrap();

    assert_clean(&mut ctx);
    let block = ctx.heap().get(player).unwrap();
    assert_eq!(block.refcount(), 2);
    assert_eq!(block.expected_refs(), 2);
}

/// A pending input redirect holds its sentence, the sentence's owner and
/// every carried value.
#[test]
fn input_redirect_holds_owner_and_carryover() {
    let (mut ctx, player) = room_world();
    let session = ctx.connect_session(player).unwrap();
    let carried = ctx.new_array(vec![Value::Number(3)]);
    let carried_id = id_of(&carried);
    let note = ctx.new_shared_string("password");
    ctx.set_input_to(session, "get_name", vec![carried, note]).unwrap();

    assert_clean(&mut ctx);
    assert_eq!(ctx.heap().get(player).unwrap().expected_refs(), 3);
    assert_eq!(ctx.heap().get(carried_id).unwrap().expected_refs(), 1);

    ctx.clear_input_to(session).unwrap();
    assert_clean(&mut ctx);
    assert!(ctx.heap().get(carried_id).is_none(), "carried array should be freed");
    assert_eq!(ctx.heap().get(player).unwrap().refcount(), 2);
}

/// Replacing a redirect releases the previous one.
#[test]
fn replaced_input_redirect_is_released() {
    let (mut ctx, player) = room_world();
    let session = ctx.connect_session(player).unwrap();
    ctx.set_input_to(session, "get_name", Vec::new()).unwrap();
    ctx.set_input_to(session, "heart_beat", Vec::new()).unwrap();

    assert_clean(&mut ctx);
    assert_eq!(ctx.counters().sentences, 1);
}

/// Text and closure fail messages are both counted.
#[test]
fn fail_messages_are_counted() {
    let (mut ctx, player) = room_world();
    let session = ctx.connect_session(player).unwrap();
    ctx.set_fail_message(session, "Huh?").unwrap();
    assert_clean(&mut ctx);

    let fp = ctx
        .new_function(FunctionKind::Local { index: 0, bindable: false }, Some(player), Vec::new())
        .unwrap();
    ctx.set_fail_function(session, id_of(&fp)).unwrap();
    assert_clean(&mut ctx);
    assert!(ctx.strings().find("Huh?").is_none(), "old message should be released");
}

/// Disconnecting drops everything the session held.
#[test]
fn disconnect_releases_session_references() {
    let (mut ctx, player) = room_world();
    let session = ctx.connect_session(player).unwrap();
    ctx.set_input_to(session, "get_name", Vec::new()).unwrap();
    ctx.set_fail_message(session, "Huh?").unwrap();
    ctx.disconnect_session(session).unwrap();

    assert_clean(&mut ctx);
    assert_eq!(ctx.heap().get(player).unwrap().refcount(), 1);
    assert!(ctx.heap().get(session).is_none());
}

/// Dropping a session from the root list leaves it an orphan and its
/// object over-counted.
#[test]
fn unlisted_session_is_an_orphan() {
    let (mut ctx, player) = room_world();
    ctx.connect_session(player).unwrap();
    ctx.roots_mut().sessions.clear();

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(
        report
            .diagnostics()
            .iter()
            .any(|d| matches!(d, Diagnostic::Orphan { category: Category::Interactive, .. })),
        "missing orphan:\n{}",
        report.text()
    );
    assert!(
        report
            .text()
            .contains("bad ref count for object (std/player#7), is 2 - should be 1"),
        "missing count line:\n{}",
        report.text()
    );
}

// =============================================================================
// 2. Interpreter and driver roots
// =============================================================================

/// The default fail message holds the shared string with a trailing newline.
#[test]
fn default_fail_message_holds_its_string() {
    let (mut ctx, _) = room_world();
    ctx.set_default_fail_message(Some("What?"));
    assert_clean(&mut ctx);

    ctx.roots_mut().default_fail_message = None;
    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(
        report
            .text()
            .contains(r#"bad ref count for shared string ("What?\n"), is 1 - should be 0"#),
        "missing count line:\n{}",
        report.text()
    );
}

/// Replacing the default fail message releases the old string.
#[test]
fn default_fail_message_replacement_releases_old_text() {
    let (mut ctx, _) = room_world();
    ctx.set_default_fail_message(Some("What?"));
    ctx.set_default_fail_message(Some("Eh?"));
    assert!(ctx.strings().find("What?\n").is_none());
    assert_clean(&mut ctx);

    ctx.set_default_fail_message(None);
    assert!(ctx.strings().find("Eh?\n").is_none());
    assert_clean(&mut ctx);
}

/// Values on the stack and the last apply result are roots.
#[test]
fn stack_and_apply_return_are_roots() {
    let (mut ctx, player) = room_world();
    let on_stack = ctx.new_array(vec![Value::Real(0.5)]);
    ctx.push_stack(on_stack);
    let ob = ctx.object_value(player).unwrap();
    ctx.push_stack(ob);
    let result = ctx.new_shared_string("ok");
    ctx.set_apply_return(result);
    assert_clean(&mut ctx);

    let replaced = ctx.new_buffer(vec![1, 2]);
    ctx.set_apply_return(replaced);
    assert!(ctx.strings().find("ok").is_none());
    assert_clean(&mut ctx);
}

/// A value popped off the stack and then forgotten leaks one reference.
#[test]
fn forgotten_stack_value_is_reported() {
    let (mut ctx, _) = room_world();
    let arr = ctx.new_array(Vec::new());
    ctx.push_stack(arr);
    let popped = ctx.pop_stack().unwrap();
    assert!(matches!(popped, Value::Array(_)));

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(
        report.text().lines().filter(|l| l.starts_with("bad ref count")).collect::<Vec<_>>(),
        vec!["bad ref count for array (allocate_array), is 1 - should be 0"]
    );
}

/// Master, simul owner and command givers each hold a reference.
#[test]
fn driver_object_roots_are_counted() {
    let (mut ctx, player) = room_world();
    ctx.set_master(player).unwrap();
    ctx.set_simul_owner(player).unwrap();
    ctx.push_command_giver(player).unwrap();
    ctx.push_command_giver(player).unwrap();
    assert_clean(&mut ctx);
    assert_eq!(ctx.heap().get(player).unwrap().expected_refs(), 5);

    ctx.pop_command_giver();
    ctx.pop_command_giver();
    assert_clean(&mut ctx);
    assert_eq!(ctx.heap().get(player).unwrap().refcount(), 3);
}

/// Pending call_outs hold their function name, object and arguments.
#[test]
fn call_outs_hold_their_arguments() {
    let (mut ctx, player) = room_world();
    let arg = ctx.new_mapping(Vec::new());
    let call = ctx.call_out(player, "heart_beat", vec![arg, Value::Number(2)], 5).unwrap();
    assert_clean(&mut ctx);
    assert!(ctx.counters().call_out_bytes > 0);

    ctx.remove_call_out(call).unwrap();
    assert_clean(&mut ctx);
    assert_eq!(ctx.counters().call_out_bytes, 0);
    assert_eq!(ctx.counters().mappings, 0);
}

/// Simul names, predefines, cached address names and object labels all
/// audit clean when registered through the runtime.
#[test]
fn name_tables_and_labels_are_counted() {
    let (mut ctx, player) = room_world();
    ctx.add_simul_name("tell_room");
    ctx.add_predefine("__VERSION__");
    ctx.cache_address_name("mud.example.org");
    ctx.set_object_label(player, ObjectLabel::LivingName, Some("aragorn")).unwrap();
    ctx.set_object_label(player, ObjectLabel::Privs, Some("wizard")).unwrap();
    ctx.set_object_label(player, ObjectLabel::ReplacedProgram, Some("std/player.c"))
        .unwrap();
    assert_clean(&mut ctx);

    ctx.set_object_label(player, ObjectLabel::Privs, None).unwrap();
    assert!(ctx.strings().find("wizard").is_none());
    assert_clean(&mut ctx);
}

/// A sentence on the free list is reachable and not an orphan.
#[test]
fn free_sentences_are_reachable() {
    let (mut ctx, player) = room_world();
    let sentence = ctx.add_action(player, "get_name", "name").unwrap();
    if let Some(rcaudit::BlockData::Object(ob)) = ctx.heap_mut().data_mut(player) {
        ob.sentences.clear();
    }
    ctx.roots_mut().free_sentences.push(sentence);

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert!(
        !report
            .diagnostics()
            .iter()
            .any(|d| matches!(d, Diagnostic::Orphan { .. })),
        "unexpected orphan:\n{}",
        report.text()
    );
}

/// Closures registered as commands are counted through their sentence.
#[test]
fn closure_commands_are_counted() {
    let (mut ctx, player) = room_world();
    let fp = ctx
        .new_function(FunctionKind::Local { index: 1, bindable: true }, Some(player), Vec::new())
        .unwrap();
    ctx.add_action_closure(player, fp, "beat").unwrap();
    assert_clean(&mut ctx);
    assert_eq!(ctx.heap().get(player).unwrap().expected_refs(), 2);
}

// =============================================================================
// 3. Root providers
// =============================================================================

/// A subsystem cache holding array references the core runtime does not
/// know about.
#[derive(Debug)]
struct ArrayCache {
    held: Vec<BlockId>,
}

impl RootProvider for ArrayCache {
    fn mark_roots(&self, sink: &mut dyn RootSink) {
        for &id in &self.held {
            sink.count(id, Category::Array);
        }
    }
}

/// References held outside the root set are bad counts until their holder
/// registers as a root provider.
#[test]
fn registered_provider_accounts_for_its_references() {
    let (mut ctx, _) = room_world();
    let Value::Array(cached) = ctx.new_array(vec![Value::Number(42)]) else {
        unreachable!("new_array returns an array");
    };

    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(report.count_mismatches(), 1, "{}", report.text());

    ctx.register_root_provider("array cache", Box::new(ArrayCache { held: vec![cached] }));
    assert_clean(&mut ctx);

    assert!(ctx.unregister_root_provider("array cache").is_some());
    let report = check_all_blocks(&mut ctx, AuditFlags::default());
    assert_eq!(report.count_mismatches(), 1, "{}", report.text());
}

// =============================================================================
// 4. Root tracing
// =============================================================================

/// The tracer sees every root reference, tagged with its kind.
#[test]
fn tracer_reports_roots_by_kind() {
    let (mut ctx, player) = room_world();
    let session = ctx.connect_session(player).unwrap();
    ctx.set_master(player).unwrap();
    let mut tracer = RecordingTracer::new();

    let report = check_all_blocks_with_tracer(&mut ctx, AuditFlags::default(), &mut tracer);
    assert!(report.is_clean(), "{}", report.text());

    assert_eq!(tracer.roots_of(RootKind::Session).collect::<Vec<_>>(), vec![session, player]);
    assert_eq!(tracer.roots_of(RootKind::Master).collect::<Vec<_>>(), vec![player]);
    assert_eq!(tracer.roots_of(RootKind::LiveObject).collect::<Vec<_>>(), vec![player]);
    assert!(matches!(
        tracer.events().last(),
        Some(AuditEvent::Finished { diagnostics: 0, .. })
    ));
}
