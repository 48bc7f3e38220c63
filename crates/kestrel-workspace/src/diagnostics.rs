use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use url::Url;

use crate::facade::DiagnosticInfo;
use crate::session::AnalysisSession;
use crate::sink::PublicationSink;

/// Reports the live version of a document, or `None` once it is no longer tracked.
pub type VersionSupplier = Arc<dyn Fn() -> Option<i32> + Send + Sync>;

/// What happened to one publication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { count: usize },
    /// The document changed while diagnostics were computed.
    Stale { requested: i32, current: i32 },
    /// The session was rebuilt while diagnostics were computed.
    Superseded { computed: u64, current: u64 },
}

#[derive(Debug, Clone)]
struct CachedDiagnostics {
    generation: u64,
    diagnostics: Arc<[DiagnosticInfo]>,
}

/// A background publication started by [`DiagnosticsPublisher::schedule`].
#[derive(Debug)]
pub struct ScheduledDiagnostics {
    /// Diagnostics from the last accepted computation for this file, if any.
    pub cached: Option<Arc<[DiagnosticInfo]>>,
    pub task: JoinHandle<PublishOutcome>,
}

/// Per-file diagnostics cache with version-checked publication.
///
/// There is no cancellation signal: a result is checked against the live document version and
/// the session generation at the single point where it would become visible, and dropped if
/// either moved on.
pub struct DiagnosticsPublisher {
    session: Arc<AnalysisSession>,
    sink: Arc<dyn PublicationSink>,
    cache: DashMap<PathBuf, CachedDiagnostics>,
}

impl std::fmt::Debug for DiagnosticsPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsPublisher")
            .field("cached_files", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl DiagnosticsPublisher {
    pub fn new(session: Arc<AnalysisSession>, sink: Arc<dyn PublicationSink>) -> Self {
        Self {
            session,
            sink,
            cache: DashMap::new(),
        }
    }

    /// Compute diagnostics for `path` and publish them to `uri` unless they went stale.
    ///
    /// Facade failures and panics are logged and published as an empty set.
    pub fn publish_diagnostics(
        &self,
        path: &Path,
        uri: &Url,
        request_version: Option<i32>,
        current_version: Option<&VersionSupplier>,
    ) -> PublishOutcome {
        let snapshot = self.session.snapshot();
        let diagnostics = match snapshot.query(|facade| facade.diagnostics(path)) {
            Ok(diagnostics) => diagnostics,
            Err(err) => {
                tracing::warn!(
                    target: "kestrel.workspace",
                    path = %path.display(),
                    generation = snapshot.generation(),
                    error = %err,
                    "failed to compute diagnostics"
                );
                Vec::new()
            }
        };

        if let (Some(requested), Some(supplier)) = (request_version, current_version) {
            if let Some(current) = supplier() {
                if current > requested {
                    tracing::debug!(
                        target: "kestrel.workspace",
                        path = %path.display(),
                        requested,
                        current,
                        "discarding stale diagnostics"
                    );
                    return PublishOutcome::Stale { requested, current };
                }
            }
        }

        let count = diagnostics.len();
        let diagnostics: Arc<[DiagnosticInfo]> = diagnostics.into();
        let published = self.session.while_current(&snapshot, || {
            self.cache.insert(
                path.to_path_buf(),
                CachedDiagnostics {
                    generation: snapshot.generation(),
                    diagnostics: Arc::clone(&diagnostics),
                },
            );
            self.sink.publish(uri, &diagnostics);
        });
        match published {
            Ok(()) => PublishOutcome::Published { count },
            Err(live) => {
                tracing::debug!(
                    target: "kestrel.workspace",
                    path = %path.display(),
                    computed = snapshot.generation(),
                    current = live,
                    "discarding diagnostics from a rebuilt session"
                );
                PublishOutcome::Superseded {
                    computed: snapshot.generation(),
                    current: live,
                }
            }
        }
    }

    /// Return the cached diagnostics right away and recompute on a blocking task.
    pub fn schedule(
        self: &Arc<Self>,
        runtime: &Handle,
        path: PathBuf,
        uri: Url,
        request_version: Option<i32>,
        current_version: Option<VersionSupplier>,
    ) -> ScheduledDiagnostics {
        let cached = self.cached(&path);
        let this = Arc::clone(self);
        let task = runtime.spawn_blocking(move || {
            this.publish_diagnostics(&path, &uri, request_version, current_version.as_ref())
        });
        ScheduledDiagnostics { cached, task }
    }

    /// Cached diagnostics for `path`, if they were computed by the live session.
    pub fn cached(&self, path: &Path) -> Option<Arc<[DiagnosticInfo]>> {
        let entry = self.cache.get(path)?;
        (entry.generation == self.session.generation()).then(|| Arc::clone(&entry.diagnostics))
    }

    /// Publish an empty diagnostic set for `uri`.
    pub fn clear_diagnostics(&self, uri: &Url) {
        self.sink.clear(uri);
    }

    /// Drop the cache entry for one file.
    pub fn forget(&self, path: &Path) {
        self.cache.remove(path);
    }

    /// Drop every cache entry. Called whenever the session is rebuilt.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }
}
