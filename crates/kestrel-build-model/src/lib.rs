//! Shared project/build model types used across Kestrel build system integrations.

mod model;

pub use model::*;

use std::fmt;
use std::path::Path;

/// Lightweight file path matcher for build file watching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathPattern {
    /// Matches a file by its exact file name (no directory components).
    ExactFileName(&'static str),
    /// Matches a path via a glob pattern (`globset` syntax).
    Glob(&'static str),
}

impl PathPattern {
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            PathPattern::ExactFileName(name) => path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n == *name),
            PathPattern::Glob(pattern) => match globset::Glob::new(pattern) {
                Ok(glob) => glob.compile_matcher().is_match(path),
                Err(_) => false,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildSystemError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unknown module `{name}`")]
    UnknownModule { name: String },

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl BuildSystemError {
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Object-safe build-system provider abstraction.
///
/// The resolver only ever talks to providers through this trait; concrete provider types are
/// registered in an ordered list.
pub trait BuildSystemProvider: Send + Sync + fmt::Debug {
    /// Stable identifier used in logs (e.g. `gradle`, `convention`).
    fn id(&self) -> &'static str;

    /// File names whose presence in a directory indicates this provider applies.
    fn marker_files(&self) -> &[&'static str];

    /// Tie-break between providers whose markers match the same directory. Higher wins.
    fn priority(&self) -> i32;

    /// Build a project model for the workspace rooted at `root`.
    fn resolve(&self, root: &Path, variant: &str) -> Result<ProjectModel, BuildSystemError>;

    /// Resolve a single module by name.
    fn resolve_module(&self, root: &Path, name: &str) -> Result<ModuleInfo, BuildSystemError>;

    /// Path patterns for build-related files that should trigger reloads.
    fn watch_files(&self) -> Vec<PathPattern> {
        Vec::new()
    }

    fn detect(&self, dir: &Path) -> bool {
        self.marker_files()
            .iter()
            .any(|marker| dir.join(marker).is_file())
    }
}
