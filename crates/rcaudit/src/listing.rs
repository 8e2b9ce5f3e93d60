//! Human-readable program listing: inherits, functions, variables and string
//! literals of a program block and everything it inherits.

use std::fmt::{self, Write};

use crate::{
    error::RuntimeError,
    heap::{BlockData, BlockId, Category, Heap},
    types::Program,
    value::string_text,
};

/// Longest string literal printed before truncation.
const MAX_LITERAL: usize = 32;

/// Renders the listing for `program` into a string.
pub fn program_listing(heap: &Heap, program: BlockId) -> Result<String, RuntimeError> {
    let prog = program_of(heap, program)?;
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_listing(heap, prog, &mut out);
    Ok(out)
}

fn program_of(heap: &Heap, id: BlockId) -> Result<&Program, RuntimeError> {
    let block = heap.get(id).ok_or(RuntimeError::Freed(id))?;
    match block.data() {
        BlockData::Program(prog) => Ok(prog),
        _ => Err(RuntimeError::WrongCategory {
            id,
            expected: Category::Program,
            found: block.category(),
        }),
    }
}

/// Writes the listing of `prog` to `out`.
pub fn write_listing(heap: &Heap, prog: &Program, out: &mut impl Write) -> fmt::Result {
    writeln!(out, "NAME: /{}", name(heap, prog.filename))?;

    writeln!(out, "INHERITS:")?;
    writeln!(out, "\tname                    fio    vio")?;
    writeln!(out, "\t----------------        ---    ---")?;
    for inherit in &prog.inherits {
        let parent = match heap.data(inherit.program) {
            Some(BlockData::Program(parent)) => name(heap, parent.filename),
            _ => "<freed>",
        };
        writeln!(
            out,
            "\t{parent:<20}  {:>5}  {:>5}",
            inherit.function_offset, inherit.variable_offset
        )?;
    }

    writeln!(out, "FUNCTIONS:")?;
    for (index, &function) in prog.function_names.iter().enumerate() {
        let function = function.map_or("<undefined>", |id| name(heap, id));
        writeln!(out, "{index:>4}: {function}")?;
    }

    write_details(heap, prog, out)?;
    for inherit in &prog.inherits {
        if let Some(BlockData::Program(parent)) = heap.data(inherit.program) {
            writeln!(out)?;
            write_details(heap, parent, out)?;
        }
    }
    Ok(())
}

fn write_details(heap: &Heap, prog: &Program, out: &mut impl Write) -> fmt::Result {
    writeln!(out, ";;;  *** Detailed info for {} ***", name(heap, prog.filename))?;
    writeln!(out, "VARIABLES:")?;
    for (index, &variable) in prog.variable_names.iter().enumerate() {
        writeln!(out, "{index:>4}: {}", name(heap, variable))?;
    }
    writeln!(out, "STRINGS:")?;
    for (index, &literal) in prog.strings.iter().enumerate() {
        writeln!(out, "{index:>4}: {}", escape_literal(name(heap, literal)))?;
    }
    Ok(())
}

fn name(heap: &Heap, id: BlockId) -> &str {
    string_text(heap, id).unwrap_or("<freed>")
}

/// Shows at most `MAX_LITERAL` characters with newlines escaped, marking
/// truncation with `...`.
fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len().min(MAX_LITERAL) + 3);
    for (i, c) in text.chars().enumerate() {
        if i == MAX_LITERAL {
            out.push_str("...");
            break;
        }
        if c == '\n' {
            out.push_str("\\n");
        } else {
            out.push(c);
        }
    }
    out
}
