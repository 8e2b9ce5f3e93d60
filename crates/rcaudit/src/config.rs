use std::path::{Path, PathBuf};

use crate::{error::ConfigError, heap::Category, value::DEFAULT_RENDER_DEPTH};

/// Upper bound on `render_depth` accepted from a config file.
pub const MAX_RENDER_DEPTH: usize = 16;

/// Behaviour switches for one audit pass.
///
/// Mirrors the integer flag word accepted at the scripting boundary: bit 0
/// appends a per-category summary table, bit 1 runs only the reset phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuditFlags {
    pub verbose: bool,
    pub reset_only: bool,
}

impl AuditFlags {
    pub const VERBOSE: i64 = 1;
    pub const RESET_ONLY: i64 = 2;

    /// Decodes a flag word. Unknown bits are ignored.
    #[must_use]
    pub const fn from_bits(bits: i64) -> Self {
        Self {
            verbose: bits & Self::VERBOSE != 0,
            reset_only: bits & Self::RESET_ONLY != 0,
        }
    }

    #[must_use]
    pub const fn bits(self) -> i64 {
        let mut bits = 0;
        if self.verbose {
            bits |= Self::VERBOSE;
        }
        if self.reset_only {
            bits |= Self::RESET_ONLY;
        }
        bits
    }

    #[must_use]
    pub const fn verbose() -> Self {
        Self::from_bits(Self::VERBOSE)
    }

    #[must_use]
    pub const fn reset_only() -> Self {
        Self::from_bits(Self::RESET_ONLY)
    }
}

/// Maximum number of blocks expected to exist for each singleton-like category.
///
/// Exceeding a ceiling yields one warning per category per pass. Use
/// `CardinalityLimits::default()` for the stock ceilings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CardinalityLimits {
    pub config_tables: u64,
    pub string_tables: u64,
    pub ident_tables: u64,
    pub include_lists: u64,
    pub reserved: u64,
    pub object_tables: u64,
    pub simul_tables: u64,
    pub compiler_locals: u64,
}

impl Default for CardinalityLimits {
    fn default() -> Self {
        Self {
            config_tables: 1,
            string_tables: 1,
            ident_tables: 1,
            include_lists: 1,
            reserved: 1,
            object_tables: 2,
            simul_tables: 3,
            compiler_locals: 3,
        }
    }
}

impl CardinalityLimits {
    /// Ceiling for `category`, or `None` if the category is unbounded.
    #[must_use]
    pub fn ceiling(&self, category: Category) -> Option<u64> {
        Some(match category {
            Category::ConfigTable => self.config_tables,
            Category::StringTable => self.string_tables,
            Category::IdentTable => self.ident_tables,
            Category::IncludeList => self.include_lists,
            Category::Reserved => self.reserved,
            Category::ObjectTable => self.object_tables,
            Category::SimulTable => self.simul_tables,
            Category::CompilerLocals => self.compiler_locals,
            _ => return None,
        })
    }

    /// Bounded categories with their ceilings, in report order.
    #[must_use]
    pub fn bounded(&self) -> [(Category, u64); 8] {
        [
            (Category::SimulTable, self.simul_tables),
            (Category::IncludeList, self.include_lists),
            (Category::IdentTable, self.ident_tables),
            (Category::Reserved, self.reserved),
            (Category::ObjectTable, self.object_tables),
            (Category::ConfigTable, self.config_tables),
            (Category::StringTable, self.string_tables),
            (Category::CompilerLocals, self.compiler_locals),
        ]
    }
}

/// Auditor configuration, owned by the `RuntimeContext`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub ceilings: CardinalityLimits,
    /// Levels of nested arrays expanded when printing a mismatched array.
    pub render_depth: usize,
    /// Directory the raw dump may write into. `None` permits any path.
    pub dump_root: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            ceilings: CardinalityLimits::default(),
            render_depth: DEFAULT_RENDER_DEPTH,
            dump_root: None,
        }
    }
}

impl AuditConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render_depth > MAX_RENDER_DEPTH {
            return Err(ConfigError::Invalid {
                field: "render_depth",
                reason: format!("{} exceeds the maximum of {MAX_RENDER_DEPTH}", self.render_depth),
            });
        }
        if let Some(root) = &self.dump_root
            && root.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid {
                field: "dump_root",
                reason: "must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn with_ceilings(mut self, ceilings: CardinalityLimits) -> Self {
        self.ceilings = ceilings;
        self
    }

    #[must_use]
    pub fn with_render_depth(mut self, depth: usize) -> Self {
        self.render_depth = depth;
        self
    }

    #[must_use]
    pub fn with_dump_root(mut self, root: impl AsRef<Path>) -> Self {
        self.dump_root = Some(root.as_ref().to_path_buf());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_word_decodes_both_bits() {
        assert_eq!(AuditFlags::from_bits(0), AuditFlags::default());
        assert_eq!(
            AuditFlags::from_bits(3),
            AuditFlags {
                verbose: true,
                reset_only: true,
            }
        );
        assert_eq!(AuditFlags::from_bits(-4), AuditFlags::default());
        assert_eq!(AuditFlags::verbose().bits(), 1);
    }

    #[test]
    fn unbounded_categories_have_no_ceiling() {
        let limits = CardinalityLimits::default();
        assert_eq!(limits.ceiling(Category::Array), None);
        assert_eq!(limits.ceiling(Category::SimulTable), Some(3));
    }
}
