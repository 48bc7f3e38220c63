use std::path::{Path, PathBuf};
use std::sync::Arc;

use kestrel_build_model::{BuildSystemError, BuildSystemProvider, PathPattern, ProjectModel};
use kestrel_config::BuildConfig;
use kestrel_core::panic_payload_to_str;

use crate::{ConventionProvider, GradleProvider};

/// The provider chosen for a workspace and the directory it applies to.
#[derive(Debug, Clone)]
pub struct Detection {
    pub provider: Arc<dyn BuildSystemProvider>,
    /// The workspace root, or the child directory whose markers matched.
    pub directory: PathBuf,
}

/// Outcome of [`BuildSystemResolver::resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The provider that produced `model` (the fallback provider after a failure).
    pub provider: Arc<dyn BuildSystemProvider>,
    pub directory: PathBuf,
    pub model: ProjectModel,
    /// Why the detected provider was abandoned, if it was.
    pub fallback_reason: Option<String>,
}

impl Resolution {
    pub fn used_fallback(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Picks a provider per workspace and resolves the project model, degrading to the fallback
/// provider whenever the chosen one fails.
///
/// Tie-breaks:
/// - at one directory, equal priorities go to the provider registered first;
/// - across child directories, equal priorities go to the child whose name sorts first.
#[derive(Debug, Clone)]
pub struct BuildSystemResolver {
    providers: Vec<Arc<dyn BuildSystemProvider>>,
    fallback: Arc<dyn BuildSystemProvider>,
}

impl BuildSystemResolver {
    pub fn new(
        providers: Vec<Arc<dyn BuildSystemProvider>>,
        fallback: Arc<dyn BuildSystemProvider>,
    ) -> Self {
        Self {
            providers,
            fallback,
        }
    }

    /// Gradle as the primary provider, source conventions as the fallback.
    pub fn with_defaults(config: &BuildConfig) -> Self {
        Self::new(
            vec![Arc::new(GradleProvider::from_build_config(config))],
            Arc::new(ConventionProvider::new()),
        )
    }

    pub fn providers(&self) -> &[Arc<dyn BuildSystemProvider>] {
        &self.providers
    }

    pub fn fallback(&self) -> &Arc<dyn BuildSystemProvider> {
        &self.fallback
    }

    pub fn is_fallback(&self, provider: &Arc<dyn BuildSystemProvider>) -> bool {
        same_provider(provider, &self.fallback)
    }

    pub fn detect(&self, root: &Path) -> Detection {
        if let Some(provider) = self.best_match(root) {
            return Detection {
                provider: Arc::clone(provider),
                directory: root.to_path_buf(),
            };
        }

        let mut best: Option<(&Arc<dyn BuildSystemProvider>, PathBuf)> = None;
        for child in child_directories(root) {
            let Some(provider) = self.best_match(&child) else {
                continue;
            };
            let better = match &best {
                Some((current, _)) => provider.priority() > current.priority(),
                None => true,
            };
            if better {
                best = Some((provider, child));
            }
        }

        match best {
            Some((provider, directory)) => Detection {
                provider: Arc::clone(provider),
                directory,
            },
            None => Detection {
                provider: Arc::clone(&self.fallback),
                directory: root.to_path_buf(),
            },
        }
    }

    /// Detect, then resolve. Only a failure of the fallback provider itself is returned.
    pub fn resolve(&self, root: &Path, variant: &str) -> Result<Resolution, BuildSystemError> {
        let Detection {
            provider,
            directory,
        } = self.detect(root);

        let failure = match guarded_resolve(provider.as_ref(), &directory, variant) {
            Ok(model) => {
                return Ok(Resolution {
                    provider,
                    directory,
                    model,
                    fallback_reason: None,
                })
            }
            Err(err) if self.is_fallback(&provider) => return Err(err),
            Err(err) => err,
        };

        let reason = format!("{} provider failed: {failure}", provider.id());
        tracing::warn!(
            target: "kestrel.project",
            provider = provider.id(),
            directory = %directory.display(),
            error = %failure,
            "build system resolution failed; falling back to {}",
            self.fallback.id()
        );

        let model = guarded_resolve(self.fallback.as_ref(), &directory, variant)?;
        Ok(Resolution {
            provider: Arc::clone(&self.fallback),
            directory,
            model,
            fallback_reason: Some(reason),
        })
    }

    /// Union of every registered provider's watch patterns.
    pub fn watch_files(&self) -> Vec<PathPattern> {
        let mut out: Vec<PathPattern> = Vec::new();
        for provider in self.providers.iter().chain(std::iter::once(&self.fallback)) {
            for pattern in provider.watch_files() {
                if !out.contains(&pattern) {
                    out.push(pattern);
                }
            }
        }
        out
    }

    pub fn is_build_file(&self, path: &Path) -> bool {
        self.watch_files().iter().any(|p| p.matches(path))
    }

    fn best_match(&self, dir: &Path) -> Option<&Arc<dyn BuildSystemProvider>> {
        let mut best: Option<&Arc<dyn BuildSystemProvider>> = None;
        for provider in &self.providers {
            if !provider.detect(dir) {
                continue;
            }
            let better = match best {
                Some(current) => provider.priority() > current.priority(),
                None => true,
            };
            if better {
                best = Some(provider);
            }
        }
        best
    }
}

fn guarded_resolve(
    provider: &dyn BuildSystemProvider,
    directory: &Path,
    variant: &str,
) -> Result<ProjectModel, BuildSystemError> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        provider.resolve(directory, variant)
    })) {
        Ok(result) => result,
        Err(panic) => Err(BuildSystemError::message(format!(
            "{} provider panicked: {}",
            provider.id(),
            panic_payload_to_str(panic.as_ref())
        ))),
    }
}

fn same_provider(a: &Arc<dyn BuildSystemProvider>, b: &Arc<dyn BuildSystemProvider>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Immediate, non-hidden child directories sorted by name.
fn child_directories(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}
