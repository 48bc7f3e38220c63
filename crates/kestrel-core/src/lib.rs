//! Core shared types for Kestrel.
//!
//! This crate is intentionally small: plain value types shared by the project model, the
//! analysis session and the editor-facing publishers.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A zero-based position in a text document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    #[inline]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A half-open range inside a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[inline]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    #[inline]
    pub const fn empty(at: Position) -> Self {
        Self { start: at, end: at }
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// A point in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    pub path: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(path: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            path: path.into(),
            line,
            column,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line + 1, self.column + 1)
    }
}

/// A range in a specific source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub path: PathBuf,
    pub range: Range,
}

impl SourceRange {
    pub fn new(path: impl Into<PathBuf>, range: Range) -> Self {
        Self {
            path: path.into(),
            range,
        }
    }

    pub fn start(&self) -> SourceLocation {
        SourceLocation::new(&self.path, self.range.start.line, self.range.start.column)
    }
}

/// A textual edit described by a range replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

impl TextEdit {
    #[inline]
    pub fn new(range: Range, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }

    pub fn insert(at: Position, text: impl Into<String>) -> Self {
        Self::new(Range::empty(at), text)
    }
}

/// A [`TextEdit`] targeting a particular file (rename and other multi-file refactorings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    pub path: PathBuf,
    pub edit: TextEdit,
}

impl FileEdit {
    pub fn new(path: impl AsRef<Path>, edit: TextEdit) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            edit,
        }
    }
}

/// Render a panic payload (as returned by `catch_unwind`) as a string.
pub fn panic_payload_to_str(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_owned()
    }
}
