//! Walks every block and accounts for the references it holds.

use ahash::AHashSet;

use crate::{
    heap::{BlockData, BlockId, Category, Heap, HeapBlock},
    tracer::AuditTracer,
    types::{FunctionPtr, Mapping, Object, Program},
    value::{ARRAY_HEADER_SIZE, VALUE_SIZE, Value, object_name},
};

use super::{
    mark::{Marker, Origin},
    report::Diagnostic,
};

/// `listed` holds every object on the live or destructed list; an object
/// block missing from it is reported.
pub(super) fn scan_registry<Tr: AuditTracer>(heap: &Heap, listed: &AHashSet<BlockId>, marker: &mut Marker<'_, '_, Tr>) {
    for (id, block) in heap.iter() {
        marker.set_origin(Origin::Block(id, block.category()));
        match block.data() {
            BlockData::Array(items) => {
                check_aggregate_size(block, items, marker);
                marker.visit_all(items);
            }
            BlockData::Mapping(map) => mark_mapping(heap, map, marker),
            BlockData::Function(ptr) => mark_function(heap, ptr, marker),
            BlockData::Object(ob) => {
                mark_object(heap, ob, marker);
                if !listed.contains(&id) {
                    let name = object_name(heap, id).unwrap_or("<unnamed>").to_owned();
                    marker.report().emit(Diagnostic::NotInObjectList { name });
                }
            }
            BlockData::Program(prog) => mark_program(prog, marker),
            BlockData::IdentTable(table) => {
                for entry in table.entries() {
                    if entry.kind.is_permanent()
                        && let Some(ident) = entry.block
                    {
                        marker.mark(ident, Category::PermIdent);
                    }
                }
            }
            // Sessions, call_outs and sentences are reached from roots and owners;
            // the remaining payloads hold no references.
            BlockData::Session(_)
            | BlockData::CallOut(_)
            | BlockData::Sentence(_)
            | BlockData::MapTable(_)
            | BlockData::MapNode(_)
            | BlockData::Opaque
            | BlockData::Text(_)
            | BlockData::OwnedString(_)
            | BlockData::SharedString(_)
            | BlockData::Buffer(_) => {}
        }
    }
}

/// Empty classes are allocated without element slots, so only non-empty ones
/// are size checked.
fn check_aggregate_size<Tr: AuditTracer>(block: &HeapBlock, items: &[Value], marker: &mut Marker<'_, '_, Tr>) {
    if block.category() == Category::Class && items.is_empty() {
        return;
    }
    let implied = ARRAY_HEADER_SIZE + VALUE_SIZE * items.len();
    if block.size() != implied {
        marker.report().emit(Diagnostic::SizeMismatch {
            category: block.category(),
            description: block.description().to_owned(),
            recorded: block.size(),
            implied,
        });
    }
}

fn mark_mapping<Tr: AuditTracer>(heap: &Heap, map: &Mapping, marker: &mut Marker<'_, '_, Tr>) {
    marker.mark(map.table, Category::MapTable);
    let Some(BlockData::MapTable(table)) = heap.data(map.table) else {
        return;
    };
    for &node in &table.nodes {
        marker.mark(node, Category::MapNode);
        if let Some(BlockData::MapNode(node)) = heap.data(node) {
            marker.visit(&node.key);
            marker.visit(&node.value);
        }
    }
}

fn mark_function<Tr: AuditTracer>(heap: &Heap, ptr: &FunctionPtr, marker: &mut Marker<'_, '_, Tr>) {
    if let Some(args) = ptr.args {
        marker.count(args, Category::Array);
    }
    let owner_program = match ptr.owner {
        Some(owner) => {
            marker.count(owner, Category::Object);
            match heap.data(owner) {
                Some(BlockData::Object(ob)) => ob.program,
                _ => None,
            }
        }
        None => None,
    };
    if let Some(program) = ptr.pinned_program(owner_program) {
        marker.count_function_ref(program);
    }
}

fn mark_object<Tr: AuditTracer>(heap: &Heap, ob: &Object, marker: &mut Marker<'_, '_, Tr>) {
    match ob.program {
        Some(program) => marker.count(program, Category::Program),
        None => {
            let name = match heap.data(ob.name) {
                Some(BlockData::Text(name)) => name.clone(),
                _ => "<unnamed>".to_owned(),
            };
            marker.report().emit(Diagnostic::Swapped { name });
        }
    }
    marker.mark(ob.name, Category::ObjectName);
    for label in [ob.replaced_program, ob.privs, ob.living_name].into_iter().flatten() {
        marker.count(label, Category::SharedString);
    }
    for &sentence in &ob.sentences {
        marker.mark(sentence, Category::Sentence);
        if let Some(BlockData::Sentence(sentence)) = heap.data(sentence) {
            marker.mark_sentence(sentence);
        }
    }
    marker.visit_all(&ob.variables);
}

fn mark_program<Tr: AuditTracer>(prog: &Program, marker: &mut Marker<'_, '_, Tr>) {
    if let Some(lines) = prog.line_info {
        marker.mark(lines, Category::LineNumbers);
    }
    for inherit in &prog.inherits {
        marker.count(inherit.program, Category::Program);
    }
    for &name in prog.function_names.iter().flatten() {
        marker.count(name, Category::SharedString);
    }
    for &literal in &prog.strings {
        marker.count(literal, Category::SharedString);
    }
    for &name in &prog.variable_names {
        marker.count(name, Category::SharedString);
    }
    marker.count(prog.filename, Category::SharedString);
}
