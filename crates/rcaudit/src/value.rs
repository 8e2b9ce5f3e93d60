//! Runtime values and their human-readable rendering.

use std::fmt::Write;

use crate::heap::{BlockData, BlockId, Category, Heap};

/// Bytes occupied by one value slot inside an aggregate.
pub const VALUE_SIZE: usize = 16;

/// Fixed header of an array or class block, before its value slots.
pub const ARRAY_HEADER_SIZE: usize = 24;

/// How many levels of nested aggregates `render_array` expands before eliding.
pub const DEFAULT_RENDER_DEPTH: usize = 2;

/// A value held in a variable, an aggregate slot, a stack slot or a closure.
///
/// Variants that carry a `BlockId` own one reference to that block. `Value` is
/// deliberately not `Clone`: duplicating one without bumping the referent's
/// count is exactly the bug the auditor exists to find, so copies go through
/// `RuntimeContext::clone_value`.
#[derive(Debug, PartialEq)]
pub enum Value {
    Number(i64),
    Real(f64),
    /// Privately owned string (malloc string category).
    String(BlockId),
    /// Interned string shared through the string table.
    SharedString(BlockId),
    Array(BlockId),
    Class(BlockId),
    Mapping(BlockId),
    Function(BlockId),
    Buffer(BlockId),
    Object(BlockId),
}

impl Default for Value {
    fn default() -> Self {
        Self::Number(0)
    }
}

impl Value {
    /// The block this value holds a reference to, if any.
    #[must_use]
    pub fn ref_id(&self) -> Option<BlockId> {
        match self {
            Self::Number(_) | Self::Real(_) => None,
            Self::String(id)
            | Self::SharedString(id)
            | Self::Array(id)
            | Self::Class(id)
            | Self::Mapping(id)
            | Self::Function(id)
            | Self::Buffer(id)
            | Self::Object(id) => Some(*id),
        }
    }

    /// The category the referenced block must belong to.
    #[must_use]
    pub fn expected_category(&self) -> Option<Category> {
        Some(match self {
            Self::Number(_) | Self::Real(_) => return None,
            Self::String(_) => Category::MallocString,
            Self::SharedString(_) => Category::SharedString,
            Self::Array(_) => Category::Array,
            Self::Class(_) => Category::Class,
            Self::Mapping(_) => Category::Mapping,
            Self::Function(_) => Category::Function,
            Self::Buffer(_) => Category::Buffer,
            Self::Object(_) => Category::Object,
        })
    }

    /// Copies a value without touching any count.
    ///
    /// Only for places that hold a borrowed view, such as the audit renderer.
    /// Storing the result anywhere leaves the referent under-counted.
    #[must_use]
    pub fn copy_unaccounted(&self) -> Self {
        match self {
            Self::Number(n) => Self::Number(*n),
            Self::Real(r) => Self::Real(*r),
            Self::String(id) => Self::String(*id),
            Self::SharedString(id) => Self::SharedString(*id),
            Self::Array(id) => Self::Array(*id),
            Self::Class(id) => Self::Class(*id),
            Self::Mapping(id) => Self::Mapping(*id),
            Self::Function(id) => Self::Function(*id),
            Self::Buffer(id) => Self::Buffer(*id),
            Self::Object(id) => Self::Object(*id),
        }
    }
}

/// Renders a single value the way diagnostics print it.
#[must_use]
pub fn render_value(heap: &Heap, value: &Value, max_depth: usize) -> String {
    let mut out = String::new();
    write_value(heap, value, 0, max_depth, &mut out);
    out
}

/// Renders an array's elements as `({ a, b, c })`.
///
/// Nested arrays are expanded while `depth < max_depth` and printed as
/// `({ ... })` past that, which also bounds the output on cyclic structures.
#[must_use]
pub fn render_array(heap: &Heap, items: &[Value], max_depth: usize) -> String {
    let mut out = String::new();
    write_items(heap, items, 0, max_depth, &mut out);
    out
}

fn write_items(heap: &Heap, items: &[Value], depth: usize, max_depth: usize, out: &mut String) {
    out.push_str("({ ");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_value(heap, item, depth, max_depth, out);
    }
    out.push_str(" })");
}

fn write_value(heap: &Heap, value: &Value, depth: usize, max_depth: usize, out: &mut String) {
    match value {
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Real(r) => {
            let _ = write!(out, "{r:.6}");
        }
        Value::String(id) | Value::SharedString(id) => match heap.data(*id) {
            Some(BlockData::SharedString(text)) => {
                let _ = write!(out, "\"{text}\"");
            }
            Some(BlockData::OwnedString(s)) => {
                let _ = write!(out, "\"{}\"", s.text);
            }
            _ => out.push_str("<freed string>"),
        },
        Value::Array(id) => match heap.data(*id) {
            Some(BlockData::Array(items)) if depth < max_depth => write_items(heap, items, depth + 1, max_depth, out),
            Some(BlockData::Array(_)) => out.push_str("({ ... })"),
            _ => out.push_str("<freed array>"),
        },
        Value::Class(_) => out.push_str("<class>"),
        Value::Buffer(_) => out.push_str("<buffer>"),
        Value::Function(_) => out.push_str("<function>"),
        Value::Mapping(_) => out.push_str("<mapping>"),
        Value::Object(id) => {
            let _ = write!(out, "OBJ({})", object_name(heap, *id).unwrap_or("<freed>"));
        }
    }
}

/// Name of the object behind `id`, read through its name block.
#[must_use]
pub fn object_name(heap: &Heap, id: BlockId) -> Option<&str> {
    let BlockData::Object(ob) = heap.data(id)? else {
        return None;
    };
    match heap.data(ob.name)? {
        BlockData::Text(name) => Some(name),
        _ => None,
    }
}

/// Text of a string block of any string category.
#[must_use]
pub fn string_text(heap: &Heap, id: BlockId) -> Option<&str> {
    match heap.data(id)? {
        BlockData::Text(text) | BlockData::SharedString(text) => Some(text),
        BlockData::OwnedString(s) => Some(&s.text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(heap: &mut Heap, items: Vec<Value>) -> Value {
        Value::Array(heap.allocate(Category::Array, BlockData::Array(items), "test"))
    }

    #[test]
    fn flat_array_renders_all_elements() {
        let mut heap = Heap::new();
        let s = heap.allocate(Category::SharedString, BlockData::SharedString("x".to_owned()), "str");
        let items = vec![Value::Number(1), Value::SharedString(s), Value::Buffer(s)];
        assert_eq!(render_array(&heap, &items, DEFAULT_RENDER_DEPTH), r#"({ 1, "x", <buffer> })"#);
    }

    #[test]
    fn nesting_past_the_depth_cap_is_elided() {
        let mut heap = Heap::new();
        let innermost = array(&mut heap, vec![Value::Number(3)]);
        let inner = array(&mut heap, vec![Value::Number(2), innermost]);
        let outer = array(&mut heap, vec![Value::Number(1), inner]);
        let items = vec![outer];
        assert_eq!(
            render_array(&heap, &items, DEFAULT_RENDER_DEPTH),
            "({ ({ 1, ({ 2, ({ ... }) }) }) })"
        );
    }

    #[test]
    fn freed_referent_renders_placeholder() {
        let mut heap = Heap::new();
        let Value::Array(id) = array(&mut heap, Vec::new()) else {
            unreachable!()
        };
        heap.dec_ref(id);
        assert_eq!(render_value(&heap, &Value::Array(id), 2), "<freed array>");
    }
}
