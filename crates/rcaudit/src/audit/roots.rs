//! References held from outside the block graph.

use std::fmt;

use crate::{
    heap::{BlockData, BlockId, Category, Heap},
    runtime::RuntimeContext,
    tracer::AuditTracer,
    types::{CallTarget, FailMessage},
    value::Value,
};

use super::mark::{Marker, Origin};

/// Which part of the root set a reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RootKind {
    Session,
    InputTo,
    FailMessage,
    DefaultFailMessage,
    ConfigString,
    Stack,
    ApplyReturn,
    CommandGiver,
    CallOut,
    FreeSentence,
    SimulName,
    Predefine,
    AddressName,
    Master,
    SimulOwner,
    LiveObject,
    DestructedObject,
    External,
}

/// Receives root references from a [`RootProvider`].
pub trait RootSink {
    /// One counted reference to a block of `category`.
    fn count(&mut self, id: BlockId, category: Category);
    /// The reference a value holds, if any.
    fn visit(&mut self, value: &Value);
    /// An exclusively owned block that must not be reported as an orphan.
    fn mark(&mut self, id: BlockId, category: Category);
}

/// A subsystem that holds references the core root set does not know about.
///
/// Registered on the `RuntimeContext`; called once per pass, after the
/// built-in roots. Every reference it holds must be reported exactly once or
/// the referent shows up with a bad count.
pub trait RootProvider: fmt::Debug {
    fn mark_roots(&self, sink: &mut dyn RootSink);
}

pub(super) fn mark_roots<Tr: AuditTracer>(ctx: &RuntimeContext, marker: &mut Marker<'_, '_, Tr>) {
    let heap = ctx.heap();
    let roots = ctx.roots();

    for &session in &roots.sessions {
        mark_session(heap, session, marker);
    }

    marker.set_origin(Origin::Root(RootKind::DefaultFailMessage));
    if let Some(text) = roots.default_fail_message.as_deref()
        && let Some(id) = ctx.strings().find(&format!("{text}\n"))
    {
        marker.count(id, Category::SharedString);
    }

    marker.set_origin(Origin::Root(RootKind::ConfigString));
    for &id in &roots.config_strings {
        marker.mark(id, Category::PlainString);
    }

    marker.set_origin(Origin::Root(RootKind::Stack));
    marker.visit_all(&roots.stack);
    marker.set_origin(Origin::Root(RootKind::ApplyReturn));
    marker.visit(&roots.apply_return);

    marker.set_origin(Origin::Root(RootKind::CommandGiver));
    for &ob in &roots.command_givers {
        marker.count(ob, Category::Object);
    }

    marker.set_origin(Origin::Root(RootKind::CallOut));
    for &call in &roots.call_outs {
        marker.mark(call, Category::CallOut);
        let Some(BlockData::CallOut(call)) = heap.data(call) else {
            continue;
        };
        match call.target {
            CallTarget::Function(fp) => marker.count(fp, Category::Function),
            CallTarget::Name(name) => marker.count(name, Category::SharedString),
        }
        if let Some(ob) = call.object {
            marker.count(ob, Category::Object);
        }
        marker.visit_all(&call.args);
    }

    marker.set_origin(Origin::Root(RootKind::FreeSentence));
    for &sentence in &roots.free_sentences {
        marker.mark(sentence, Category::Sentence);
    }

    marker.set_origin(Origin::Root(RootKind::SimulName));
    for &name in &roots.simul_names {
        marker.count(name, Category::SharedString);
    }
    marker.set_origin(Origin::Root(RootKind::Predefine));
    for &define in &roots.predefines {
        marker.mark(define, Category::Predefine);
    }
    marker.set_origin(Origin::Root(RootKind::AddressName));
    for &name in &roots.address_names {
        marker.count(name, Category::SharedString);
    }

    marker.set_origin(Origin::Root(RootKind::Master));
    if let Some(master) = roots.master {
        marker.count(master, Category::Object);
    }
    marker.set_origin(Origin::Root(RootKind::SimulOwner));
    if let Some(owner) = roots.simul_owner {
        marker.count(owner, Category::Object);
    }

    marker.set_origin(Origin::Root(RootKind::LiveObject));
    for &ob in &roots.objects {
        marker.count(ob, Category::Object);
    }
    marker.set_origin(Origin::Root(RootKind::DestructedObject));
    for &ob in &roots.destructed {
        marker.count(ob, Category::Object);
    }

    marker.set_origin(Origin::Root(RootKind::External));
    for (name, provider) in ctx.root_providers() {
        log::trace!("marking roots of provider {name}");
        provider.mark_roots(marker);
    }
}

/// A connected session holds one reference to its object, plus whatever its
/// pending input redirect and fail message refer to.
fn mark_session<Tr: AuditTracer>(heap: &Heap, id: BlockId, marker: &mut Marker<'_, '_, Tr>) {
    marker.set_origin(Origin::Root(RootKind::Session));
    marker.mark(id, Category::Interactive);
    let Some(BlockData::Session(session)) = heap.data(id) else {
        return;
    };
    marker.count(session.object, Category::Object);

    if let Some(input) = &session.input_to {
        marker.set_origin(Origin::Root(RootKind::InputTo));
        marker.mark(input.sentence, Category::Sentence);
        if let Some(BlockData::Sentence(sentence)) = heap.data(input.sentence) {
            marker.count(sentence.owner, Category::Object);
            marker.mark_sentence(sentence);
        }
        marker.visit_all(&input.carryover);
    }

    marker.set_origin(Origin::Root(RootKind::FailMessage));
    match session.fail_message {
        Some(FailMessage::Function(fp)) => marker.count(fp, Category::Function),
        Some(FailMessage::Text(text)) => marker.count(text, Category::SharedString),
        None => {}
    }
}
