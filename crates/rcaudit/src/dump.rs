//! Raw registry dump.
//!
//! Writes one line per live block, then totals and a per-category table:
//!
//! ```text
//!           id     gametick          ptr   tag      sz desc
//!            1            0          0x0 4:044      56 allocate_array
//! total =          56
//! # chunks =        1
//! ave. bytes per chunk =   56.00
//!
//! categories:
//!
//!   44:          1         56
//! ```

use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::{Component, Path, PathBuf},
};

use strum::IntoEnumIterator;

use crate::{
    error::DumpError,
    heap::{Category, CategoryStats, Heap},
    runtime::RuntimeContext,
};

/// Totals of the blocks a dump listed.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct DumpSummary {
    pub total_bytes: u64,
    pub chunks: u64,
}

impl DumpSummary {
    /// Mean block size, zero for an empty dump.
    #[must_use]
    pub fn average(&self) -> f64 {
        if self.chunks == 0 {
            0.0
        } else {
            self.total_bytes as f64 / self.chunks as f64
        }
    }
}

impl fmt::Display for DumpSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total =    {:>8}", self.total_bytes)?;
        writeln!(f, "# chunks = {:>8}", self.chunks)?;
        writeln!(f, "ave. bytes per chunk = {:>7.2}", self.average())
    }
}

/// Writes the dump for `ctx` to `path`.
///
/// With a `dump_root` configured the path is resolved under it and must not
/// escape it. `filter` restricts the block lines to one category; the
/// category table always covers the whole registry.
pub fn dump_registry(
    ctx: &RuntimeContext,
    path: impl AsRef<Path>,
    filter: Option<Category>,
) -> Result<DumpSummary, DumpError> {
    let path = resolve_path(ctx.config().dump_root.as_deref(), path.as_ref())?;
    let io_err = |source: io::Error| DumpError::Io {
        path: path.clone(),
        source,
    };
    let file = File::create(&path).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    let summary = write_registry(ctx.heap(), &mut out, filter).map_err(io_err)?;
    out.flush().map_err(io_err)?;
    log::debug!(
        "dumped {} block(s), {} bytes to {}",
        summary.chunks,
        summary.total_bytes,
        path.display()
    );
    Ok(summary)
}

/// Writes the dump to any writer.
pub fn write_registry<W: Write>(heap: &Heap, out: &mut W, filter: Option<Category>) -> io::Result<DumpSummary> {
    writeln!(
        out,
        "{:>12} {:>12} {:>12} {:>5} {:>7} desc",
        "id", "gametick", "ptr", "tag", "sz"
    )?;
    let mut summary = DumpSummary::default();
    for (id, block) in heap.iter() {
        let category = block.category();
        if filter.is_some_and(|wanted| wanted != category) {
            continue;
        }
        writeln!(
            out,
            "{:>12} {:>12} {:>#12x} {}:{:03} {:>7} {}",
            block.serial(),
            block.tick(),
            id.index(),
            category.class() as u8,
            category.minor(),
            block.size(),
            block.description()
        )?;
        summary.total_bytes += block.size() as u64;
        summary.chunks += 1;
    }
    write!(out, "{summary}")?;
    write_categories(out, &heap.stats())?;
    Ok(summary)
}

fn write_categories<W: Write>(out: &mut W, stats: &CategoryStats) -> io::Result<()> {
    writeln!(out, "\ncategories:\n")?;
    for category in Category::iter() {
        let tally = stats.tally(category);
        writeln!(out, "{:>4}: {:>10} {:>10}", category.minor(), tally.blocks, tally.bytes)?;
    }
    Ok(())
}

fn resolve_path(root: Option<&Path>, path: &Path) -> Result<PathBuf, DumpError> {
    let invalid = || DumpError::InvalidPath {
        path: path.to_path_buf(),
    };
    if path.as_os_str().is_empty() {
        return Err(invalid());
    }
    let Some(root) = root else {
        return Ok(path.to_path_buf());
    };
    let mut resolved = root.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return Err(invalid()),
        }
    }
    if resolved == root {
        return Err(invalid());
    }
    Ok(resolved)
}
