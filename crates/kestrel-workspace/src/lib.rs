//! Analysis-session orchestration for a Kestrel workspace.
//!
//! A [`Workspace`] resolves the project through `kestrel-project`, binds an [`AnalysisSession`]
//! (one live [`SemanticFacade`]) to the resulting model and keeps the [`FileIndex`] and
//! [`DiagnosticsPublisher`] caches in step with document edits and build-file changes.

mod diagnostics;
mod facade;
mod index;
mod session;
mod sink;
mod workspace;

pub use diagnostics::{DiagnosticsPublisher, PublishOutcome, ScheduledDiagnostics, VersionSupplier};
pub use facade::{
    CompletionCandidate, DiagnosticInfo, FacadeError, FacadeFactory, FacadeResult, NoopFacade,
    QuickFix, RenameContext, ResolvedSymbol, SemanticFacade, Severity, SymbolKind, TypeInfo,
};
pub use index::FileIndex;
pub use session::{AnalysisSession, SessionSnapshot};
pub use sink::{MessageLevel, PublicationSink};
pub use workspace::Workspace;
