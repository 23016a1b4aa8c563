use std::fmt;

use serde::{Deserialize, Serialize};

/// The independently scanned cleanup categories shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Junk,
    BigFiles,
    Social,
    Leftovers,
    Registry,
    SystemSlim,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 6] = [
        ModuleKind::Junk,
        ModuleKind::BigFiles,
        ModuleKind::Social,
        ModuleKind::Leftovers,
        ModuleKind::Registry,
        ModuleKind::SystemSlim,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleKind::Junk => "junk",
            ModuleKind::BigFiles => "big_files",
            ModuleKind::Social => "social",
            ModuleKind::Leftovers => "leftovers",
            ModuleKind::Registry => "registry",
            ModuleKind::SystemSlim => "system_slim",
        }
    }

    /// Only the big-files scan can be stopped midway.
    pub fn supports_cancel(self) -> bool {
        matches!(self, ModuleKind::BigFiles)
    }

    /// Modules whose scans stream path-by-path progress.
    pub fn streams_progress(self) -> bool {
        matches!(
            self,
            ModuleKind::Junk | ModuleKind::BigFiles | ModuleKind::Leftovers
        )
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
