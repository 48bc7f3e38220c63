use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use kestrel_build_model::ProjectModel;
use kestrel_core::panic_payload_to_str;
use parking_lot::{Mutex, RwLock};

use crate::facade::{FacadeError, FacadeFactory, FacadeResult, NoopFacade, SemanticFacade};

/// An immutable `(model, facade)` pair.
///
/// Readers clone the `Arc` and keep working against it even if the session is rebuilt
/// underneath them; a rebuilt session never mutates an existing snapshot besides disposing it.
pub struct SessionSnapshot {
    model: Arc<ProjectModel>,
    facade: Arc<dyn SemanticFacade>,
    generation: u64,
    degraded: bool,
    /// Serializes content updates against reads of this facade instance.
    access: RwLock<()>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SessionSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("generation", &self.generation)
            .field("modules", &self.model.modules.len())
            .field("degraded", &self.degraded)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl SessionSnapshot {
    pub fn model(&self) -> &Arc<ProjectModel> {
        &self.model
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the facade is the no-op stand-in for a failed construction.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Run a read against the facade. Panics are converted into [`FacadeError::Panicked`].
    pub fn query<T>(
        &self,
        f: impl FnOnce(&dyn SemanticFacade) -> FacadeResult<T>,
    ) -> FacadeResult<T> {
        let _guard = self.access.read();
        if self.is_disposed() {
            return Err(FacadeError::Disposed);
        }
        guarded(|| f(self.facade.as_ref()))
    }

    /// Push new document text into the facade, excluding concurrent reads of this instance.
    pub fn update_file_content(&self, path: &Path, text: &str) -> FacadeResult<()> {
        let _guard = self.access.write();
        if self.is_disposed() {
            return Err(FacadeError::Disposed);
        }
        guarded(|| self.facade.update_file_content(path, text))
    }

    /// Release the facade once in-flight reads of it have finished. Only the first call
    /// reaches it; reads that start afterwards get [`FacadeError::Disposed`].
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _guard = self.access.write();
        let facade = Arc::clone(&self.facade);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(move || facade.dispose())) {
            tracing::error!(
                target: "kestrel.workspace",
                generation = self.generation,
                panic = %panic_payload_to_str(panic.as_ref()),
                "panic while disposing semantic facade"
            );
        }
    }
}

fn guarded<T>(f: impl FnOnce() -> FacadeResult<T>) -> FacadeResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(FacadeError::Panicked(panic_payload_to_str(panic.as_ref()))),
    }
}

/// Owns the live semantic facade for the current project model.
///
/// `rebuild` and content updates are serialized with each other; reads never take the writer
/// lock and only briefly touch the snapshot pointer.
pub struct AnalysisSession {
    current: RwLock<Arc<SessionSnapshot>>,
    writer: Mutex<()>,
    factory: Arc<dyn FacadeFactory>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for AnalysisSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisSession")
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

impl AnalysisSession {
    pub fn new(model: ProjectModel, factory: Arc<dyn FacadeFactory>) -> Self {
        let first = build_snapshot(factory.as_ref(), Arc::new(model), 1);
        Self {
            current: RwLock::new(Arc::new(first)),
            writer: Mutex::new(()),
            factory,
            next_generation: AtomicU64::new(2),
        }
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn model(&self) -> Arc<ProjectModel> {
        Arc::clone(self.snapshot().model())
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Replace the session with one bound to `model`.
    ///
    /// The old facade is disposed before the new one is constructed. Disposal waits for reads
    /// already running against it; readers holding the old snapshot get
    /// [`FacadeError::Disposed`] from then on. Construction failures install a [`NoopFacade`].
    pub fn rebuild(&self, model: ProjectModel) -> Arc<SessionSnapshot> {
        let _writer = self.writer.lock();

        let old = self.snapshot();
        old.dispose();

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let next = Arc::new(build_snapshot(
            self.factory.as_ref(),
            Arc::new(model),
            generation,
        ));
        *self.current.write() = Arc::clone(&next);

        tracing::info!(
            target: "kestrel.workspace",
            previous = old.generation,
            generation,
            modules = next.model.modules.len(),
            degraded = next.degraded,
            "analysis session rebuilt"
        );
        next
    }

    /// Run `f` only if `snapshot` is still the live, undisposed session, holding off rebuilds
    /// until it returns. Otherwise returns the live generation.
    pub fn while_current<T>(
        &self,
        snapshot: &SessionSnapshot,
        f: impl FnOnce() -> T,
    ) -> Result<T, u64> {
        let _writer = self.writer.lock();
        let live = self.generation();
        if live != snapshot.generation || snapshot.is_disposed() {
            return Err(live);
        }
        Ok(f())
    }

    /// Forward new document text to the current facade.
    pub fn update_file_content(&self, path: &Path, text: &str) -> FacadeResult<()> {
        let _writer = self.writer.lock();
        self.snapshot().update_file_content(path, text)
    }

    /// Release the current facade. Idempotent.
    pub fn dispose(&self) {
        let _writer = self.writer.lock();
        self.snapshot().dispose();
    }
}

fn build_snapshot(
    factory: &dyn FacadeFactory,
    model: Arc<ProjectModel>,
    generation: u64,
) -> SessionSnapshot {
    let created = match catch_unwind(AssertUnwindSafe(|| factory.create(&model))) {
        Ok(result) => result,
        Err(panic) => Err(FacadeError::Panicked(panic_payload_to_str(panic.as_ref()))),
    };

    let (facade, degraded): (Arc<dyn SemanticFacade>, bool) = match created {
        Ok(facade) => (facade, false),
        Err(err) => {
            tracing::error!(
                target: "kestrel.workspace",
                generation,
                error = %err,
                "failed to construct semantic facade; using a no-op facade"
            );
            (Arc::new(NoopFacade), true)
        }
    };

    SessionSnapshot {
        model,
        facade,
        generation,
        degraded,
        access: RwLock::new(()),
        disposed: AtomicBool::new(false),
    }
}
