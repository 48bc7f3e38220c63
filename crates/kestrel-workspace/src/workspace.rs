use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use kestrel_build_model::ProjectModel;
use kestrel_config::KestrelConfig;
use kestrel_core::{FileEdit, Position, SourceLocation};
use kestrel_project::{BuildSystemResolver, Resolution};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use url::Url;

use crate::diagnostics::{DiagnosticsPublisher, PublishOutcome, VersionSupplier};
use crate::facade::{
    CompletionCandidate, FacadeFactory, FacadeResult, ResolvedSymbol, SemanticFacade, TypeInfo,
};
use crate::index::FileIndex;
use crate::session::{AnalysisSession, SessionSnapshot};
use crate::sink::{MessageLevel, PublicationSink};

#[derive(Debug, Clone)]
struct OpenDocument {
    uri: Url,
    version: i32,
    text: Arc<str>,
}

/// Ties resolution, the analysis session, the symbol index and diagnostics publication to one
/// workspace root and keeps them consistent as documents and build files change.
pub struct Workspace {
    root: PathBuf,
    config: RwLock<KestrelConfig>,
    resolver: BuildSystemResolver,
    provider: RwLock<&'static str>,
    session: Arc<AnalysisSession>,
    index: FileIndex,
    diagnostics: Arc<DiagnosticsPublisher>,
    sink: Arc<dyn PublicationSink>,
    documents: Arc<DashMap<PathBuf, OpenDocument>>,
    runtime: Option<Handle>,
    reload_lock: Mutex<()>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("provider", &*self.provider.read())
            .field("session", &self.session)
            .field("open_documents", &self.documents.len())
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Open `root` with the default providers configured from `config.build`.
    pub fn open(
        root: impl AsRef<Path>,
        config: KestrelConfig,
        factory: Arc<dyn FacadeFactory>,
        sink: Arc<dyn PublicationSink>,
    ) -> Result<Self> {
        let resolver = BuildSystemResolver::with_defaults(&config.build);
        Self::open_with_resolver(root, config, resolver, factory, sink)
    }

    pub fn open_with_resolver(
        root: impl AsRef<Path>,
        config: KestrelConfig,
        resolver: BuildSystemResolver,
        factory: Arc<dyn FacadeFactory>,
        sink: Arc<dyn PublicationSink>,
    ) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to open workspace {}", root.display()))?;

        let resolution = resolve(&resolver, &root, &config, sink.as_ref())?;
        let provider = resolution.provider.id();
        let session = Arc::new(AnalysisSession::new(resolution.model, factory));
        let diagnostics = Arc::new(DiagnosticsPublisher::new(
            Arc::clone(&session),
            Arc::clone(&sink),
        ));

        tracing::info!(
            target: "kestrel.workspace",
            root = %root.display(),
            provider,
            modules = session.model().modules.len(),
            "workspace opened"
        );

        Ok(Self {
            root,
            config: RwLock::new(config),
            resolver,
            provider: RwLock::new(provider),
            session,
            index: FileIndex::new(),
            diagnostics,
            sink,
            documents: Arc::new(DashMap::new()),
            runtime: Handle::try_current().ok(),
            reload_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> KestrelConfig {
        self.config.read().clone()
    }

    pub fn provider_id(&self) -> &'static str {
        *self.provider.read()
    }

    pub fn model(&self) -> Arc<ProjectModel> {
        self.session.model()
    }

    pub fn session(&self) -> &Arc<AnalysisSession> {
        &self.session
    }

    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsPublisher> {
        &self.diagnostics
    }

    pub fn document_version(&self, path: &Path) -> Option<i32> {
        self.documents.get(path).map(|doc| doc.version)
    }

    /// Re-resolve the project and rebuild the session.
    ///
    /// The build tool runs without any session lock held. Afterwards the symbol index and the
    /// diagnostics cache are dropped wholesale and open documents are re-indexed and republished.
    pub fn reload(&self) -> Result<()> {
        let _reload = self.reload_lock.lock();

        let config = self.config();
        let resolution = resolve(&self.resolver, &self.root, &config, self.sink.as_ref())?;
        *self.provider.write() = resolution.provider.id();

        let snapshot = self.session.rebuild(resolution.model);
        self.index.clear();
        self.diagnostics.invalidate_all();

        let open: Vec<(PathBuf, OpenDocument)> = self
            .documents
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        tracing::debug!(
            target: "kestrel.workspace",
            generation = snapshot.generation(),
            documents = open.len(),
            "resyncing open documents"
        );
        for (path, doc) in open {
            self.sync_document(&path, &doc);
        }
        Ok(())
    }

    pub fn did_open(&self, path: &Path, version: i32, text: &str) -> Result<()> {
        let uri = file_uri(path)?;
        let doc = OpenDocument {
            uri,
            version,
            text: Arc::from(text),
        };
        self.documents.insert(path.to_path_buf(), doc.clone());
        self.sync_document(path, &doc);
        Ok(())
    }

    /// Apply a full-text change. Changes older than the tracked version are ignored.
    pub fn did_change(&self, path: &Path, version: i32, text: &str) -> Result<()> {
        let doc = {
            let mut entry = self
                .documents
                .get_mut(path)
                .ok_or_else(|| anyhow!("document {} is not open", path.display()))?;
            if version < entry.version {
                tracing::debug!(
                    target: "kestrel.workspace",
                    path = %path.display(),
                    version,
                    current = entry.version,
                    "ignoring out-of-order document change"
                );
                return Ok(());
            }
            entry.version = version;
            entry.text = Arc::from(text);
            entry.clone()
        };
        self.sync_document(path, &doc);
        Ok(())
    }

    pub fn did_close(&self, path: &Path) -> Result<()> {
        let uri = match self.documents.remove(path) {
            Some((_, doc)) => doc.uri,
            None => file_uri(path)?,
        };
        self.forget_file(path, &uri);
        Ok(())
    }

    pub fn did_delete(&self, path: &Path) -> Result<()> {
        self.did_close(path)
    }

    /// React to a file change reported by the editor's watcher.
    ///
    /// Build files and the workspace config trigger a reload; returns whether one happened.
    pub fn did_change_watched_file(&self, path: &Path) -> Result<bool> {
        if kestrel_config::is_config_file(&self.root, path) {
            let (config, _) = kestrel_config::load_for_workspace(&self.root)
                .with_context(|| format!("failed to reload {}", path.display()))?;
            *self.config.write() = config;
        } else if !self.resolver.is_build_file(path) {
            return Ok(false);
        }

        tracing::info!(
            target: "kestrel.workspace",
            path = %path.display(),
            "build configuration changed; reloading project"
        );
        self.reload()?;
        Ok(true)
    }

    pub fn symbol_at(&self, path: &Path, position: Position) -> Option<ResolvedSymbol> {
        self.query("symbol_at", path, |f| f.resolve_at_position(path, position))
    }

    pub fn type_at(&self, path: &Path, position: Position) -> Option<TypeInfo> {
        self.query("type_at", path, |f| f.type_at(path, position))
    }

    pub fn completions(&self, path: &Path, position: Position) -> Vec<CompletionCandidate> {
        self.query("completions", path, |f| f.completions(path, position))
    }

    pub fn references(&self, path: &Path, position: Position) -> Vec<SourceLocation> {
        self.query("references", path, |f| match f.resolve_at_position(path, position)? {
            Some(symbol) => f.find_references(&symbol),
            None => Ok(Vec::new()),
        })
    }

    pub fn implementations(&self, path: &Path, position: Position) -> Vec<SourceLocation> {
        self.query("implementations", path, |f| {
            match f.resolve_at_position(path, position)? {
                Some(symbol) => f.find_implementations(&symbol),
                None => Ok(Vec::new()),
            }
        })
    }

    pub fn type_definition(&self, path: &Path, position: Position) -> Option<SourceLocation> {
        self.query("type_definition", path, |f| {
            f.type_definition_location(path, position)
        })
    }

    pub fn rename(&self, path: &Path, position: Position, new_name: &str) -> Vec<FileEdit> {
        self.query("rename", path, |f| match f.prepare_rename(path, position)? {
            Some(context) => f.compute_rename(&context, new_name),
            None => Ok(Vec::new()),
        })
    }

    pub fn documentation(&self, path: &Path, position: Position) -> Option<String> {
        self.query("documentation", path, |f| {
            match f.resolve_at_position(path, position)? {
                Some(symbol) => f.documentation(&symbol),
                None => Ok(None),
            }
        })
    }

    /// Declarations named exactly `name` among indexed files.
    pub fn workspace_symbol(&self, name: &str) -> Vec<ResolvedSymbol> {
        self.index.symbols_named(name)
    }

    /// Dispose the session. Further queries return empty results.
    pub fn shutdown(&self) {
        self.session.dispose();
    }

    fn sync_document(&self, path: &Path, doc: &OpenDocument) {
        if let Err(err) = self.session.update_file_content(path, &doc.text) {
            tracing::warn!(
                target: "kestrel.workspace",
                path = %path.display(),
                error = %err,
                "failed to update document content"
            );
        }
        let snapshot = self.session.snapshot();
        self.index.update_file(path, &snapshot);
        self.refresh_diagnostics(path, doc);
    }

    fn refresh_diagnostics(&self, path: &Path, doc: &OpenDocument) {
        if !self.config.read().diagnostics.enabled {
            return;
        }

        let supplier = self.version_supplier(path);
        match &self.runtime {
            Some(runtime) => {
                self.diagnostics.schedule(
                    runtime,
                    path.to_path_buf(),
                    doc.uri.clone(),
                    Some(doc.version),
                    Some(supplier),
                );
            }
            None => {
                let outcome = self.diagnostics.publish_diagnostics(
                    path,
                    &doc.uri,
                    Some(doc.version),
                    Some(&supplier),
                );
                if let PublishOutcome::Published { count } = outcome {
                    tracing::trace!(
                        target: "kestrel.workspace",
                        path = %path.display(),
                        count,
                        "published diagnostics"
                    );
                }
            }
        }
    }

    fn version_supplier(&self, path: &Path) -> VersionSupplier {
        let documents = Arc::clone(&self.documents);
        let path = path.to_path_buf();
        Arc::new(move || documents.get(&path).map(|doc| doc.version))
    }

    fn forget_file(&self, path: &Path, uri: &Url) {
        self.index.remove_file(path);
        self.diagnostics.forget(path);
        self.diagnostics.clear_diagnostics(uri);
    }

    fn query<T: Default>(
        &self,
        operation: &'static str,
        path: &Path,
        f: impl FnOnce(&dyn SemanticFacade) -> FacadeResult<T>,
    ) -> T {
        let snapshot: Arc<SessionSnapshot> = self.session.snapshot();
        match snapshot.query(f) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    target: "kestrel.workspace",
                    operation,
                    path = %path.display(),
                    error = %err,
                    "semantic query failed"
                );
                T::default()
            }
        }
    }
}

fn resolve(
    resolver: &BuildSystemResolver,
    root: &Path,
    config: &KestrelConfig,
    sink: &dyn PublicationSink,
) -> Result<Resolution> {
    let resolution = resolver
        .resolve(root, &config.build.variant)
        .with_context(|| format!("failed to resolve project at {}", root.display()))?;

    if let Some(reason) = &resolution.fallback_reason {
        sink.log(
            MessageLevel::Warning,
            &format!(
                "Build import failed, using source layout conventions instead: {reason}"
            ),
        );
    }
    Ok(resolution)
}

fn file_uri(path: &Path) -> Result<Url> {
    Url::from_file_path(path).map_err(|()| anyhow!("not an absolute path: {}", path.display()))
}
