//! The semantic engine capability consumed by the session, plus the data it produces.

use std::path::Path;
use std::sync::Arc;

use kestrel_build_model::ProjectModel;
use kestrel_core::{FileEdit, Position, Range, SourceLocation, SourceRange};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FacadeError {
    #[error("semantic engine error: {0}")]
    Engine(String),

    #[error("failed to construct semantic facade: {0}")]
    Construction(String),

    #[error("semantic facade panicked: {0}")]
    Panicked(String),

    #[error("semantic facade has been disposed")]
    Disposed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FacadeError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}

pub type FacadeResult<T> = Result<T, FacadeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickFix {
    pub title: String,
    pub edits: Vec<FileEdit>,
}

/// One diagnostic for a file. Recomputed per analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    pub severity: Severity,
    pub message: String,
    pub range: Range,
    pub code: Option<String>,
    pub quick_fixes: Vec<QuickFix>,
}

impl DiagnosticInfo {
    pub fn new(severity: Severity, message: impl Into<String>, range: Range) -> Self {
        Self {
            severity,
            message: message.into(),
            range,
            code: None,
            quick_fixes: Vec::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Package,
    Class,
    Interface,
    Object,
    Enum,
    EnumEntry,
    TypeAlias,
    Function,
    Constructor,
    Property,
    Parameter,
    LocalVariable,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub location: SourceLocation,
    pub container_name: Option<String>,
    pub signature: Option<String>,
    pub fully_qualified_name: Option<String>,
}

impl ResolvedSymbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, location: SourceLocation) -> Self {
        Self {
            name: name.into(),
            kind,
            location,
            container_name: None,
            signature: None,
            fully_qualified_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    /// Rendered as it would appear in source, e.g. `List<String>?`.
    pub display: String,
    pub fully_qualified_name: Option<String>,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionCandidate {
    pub label: String,
    pub kind: Option<SymbolKind>,
    pub detail: Option<String>,
    pub insert_text: Option<String>,
}

/// What a rename will touch, produced by [`SemanticFacade::prepare_rename`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameContext {
    pub symbol: ResolvedSymbol,
    /// The identifier occurrence the rename was requested on.
    pub range: SourceRange,
}

/// Capability interface of the semantic engine (parsing, resolution, diagnostics).
///
/// Every method may fail; callers treat a failure as "no result". Implementations are shared
/// between threads. Calls that mutate analysis state ([`update_file_content`]) are serialized
/// against reads of the same instance by [`crate::SessionSnapshot`].
///
/// [`update_file_content`]: SemanticFacade::update_file_content
pub trait SemanticFacade: Send + Sync {
    fn diagnostics(&self, path: &Path) -> FacadeResult<Vec<DiagnosticInfo>>;

    fn resolve_at_position(&self, path: &Path, position: Position)
        -> FacadeResult<Option<ResolvedSymbol>>;

    fn type_at(&self, path: &Path, position: Position) -> FacadeResult<Option<TypeInfo>>;

    /// Symbols declared in `path`.
    fn file_symbols(&self, path: &Path) -> FacadeResult<Vec<ResolvedSymbol>>;

    fn completions(&self, path: &Path, position: Position)
        -> FacadeResult<Vec<CompletionCandidate>>;

    fn find_references(&self, symbol: &ResolvedSymbol) -> FacadeResult<Vec<SourceLocation>>;

    fn find_implementations(&self, symbol: &ResolvedSymbol) -> FacadeResult<Vec<SourceLocation>>;

    fn type_definition_location(
        &self,
        path: &Path,
        position: Position,
    ) -> FacadeResult<Option<SourceLocation>>;

    fn prepare_rename(&self, path: &Path, position: Position)
        -> FacadeResult<Option<RenameContext>>;

    fn compute_rename(&self, context: &RenameContext, new_name: &str)
        -> FacadeResult<Vec<FileEdit>>;

    fn documentation(&self, symbol: &ResolvedSymbol) -> FacadeResult<Option<String>>;

    fn update_file_content(&self, path: &Path, text: &str) -> FacadeResult<()>;

    /// Release engine resources. Called at most once per instance by the session.
    fn dispose(&self);
}

/// Builds a facade bound to a project model.
pub trait FacadeFactory: Send + Sync {
    fn create(&self, model: &ProjectModel) -> FacadeResult<Arc<dyn SemanticFacade>>;
}

impl<F> FacadeFactory for F
where
    F: Fn(&ProjectModel) -> FacadeResult<Arc<dyn SemanticFacade>> + Send + Sync,
{
    fn create(&self, model: &ProjectModel) -> FacadeResult<Arc<dyn SemanticFacade>> {
        self(model)
    }
}

/// Degraded facade installed when construction fails. Answers everything with nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFacade;

impl SemanticFacade for NoopFacade {
    fn diagnostics(&self, _path: &Path) -> FacadeResult<Vec<DiagnosticInfo>> {
        Ok(Vec::new())
    }

    fn resolve_at_position(
        &self,
        _path: &Path,
        _position: Position,
    ) -> FacadeResult<Option<ResolvedSymbol>> {
        Ok(None)
    }

    fn type_at(&self, _path: &Path, _position: Position) -> FacadeResult<Option<TypeInfo>> {
        Ok(None)
    }

    fn file_symbols(&self, _path: &Path) -> FacadeResult<Vec<ResolvedSymbol>> {
        Ok(Vec::new())
    }

    fn completions(
        &self,
        _path: &Path,
        _position: Position,
    ) -> FacadeResult<Vec<CompletionCandidate>> {
        Ok(Vec::new())
    }

    fn find_references(&self, _symbol: &ResolvedSymbol) -> FacadeResult<Vec<SourceLocation>> {
        Ok(Vec::new())
    }

    fn find_implementations(&self, _symbol: &ResolvedSymbol) -> FacadeResult<Vec<SourceLocation>> {
        Ok(Vec::new())
    }

    fn type_definition_location(
        &self,
        _path: &Path,
        _position: Position,
    ) -> FacadeResult<Option<SourceLocation>> {
        Ok(None)
    }

    fn prepare_rename(
        &self,
        _path: &Path,
        _position: Position,
    ) -> FacadeResult<Option<RenameContext>> {
        Ok(None)
    }

    fn compute_rename(
        &self,
        _context: &RenameContext,
        _new_name: &str,
    ) -> FacadeResult<Vec<FileEdit>> {
        Ok(Vec::new())
    }

    fn documentation(&self, _symbol: &ResolvedSymbol) -> FacadeResult<Option<String>> {
        Ok(None)
    }

    fn update_file_content(&self, _path: &Path, _text: &str) -> FacadeResult<()> {
        Ok(())
    }

    fn dispose(&self) {}
}
