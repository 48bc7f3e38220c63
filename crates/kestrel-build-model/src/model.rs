use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Runtime flavor of a single compilation unit inside a (possibly multi-platform) module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Jvm,
    Mobile,
    Native,
    Js,
}

impl Platform {
    /// Map a Gradle `KotlinPlatformType` name onto a [`Platform`].
    ///
    /// `common`/`metadata` compilations are not standalone targets and map to `None`.
    pub fn from_gradle_platform_type(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "jvm" => Some(Platform::Jvm),
            "androidjvm" | "android" => Some(Platform::Mobile),
            "native" => Some(Platform::Native),
            "js" | "wasm" => Some(Platform::Js),
            _ => None,
        }
    }
}

/// One platform-specific compilation unit of a multi-platform module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformTarget {
    pub name: String,
    pub platform: Platform,
    pub source_roots: BTreeSet<PathBuf>,
    pub test_source_roots: BTreeSet<PathBuf>,
    pub classpath: Vec<PathBuf>,
    pub test_classpath: Vec<PathBuf>,
}

impl PlatformTarget {
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        Self {
            name: name.into(),
            platform,
            source_roots: BTreeSet::new(),
            test_source_roots: BTreeSet::new(),
            classpath: Vec::new(),
            test_classpath: Vec::new(),
        }
    }
}

/// A compilation unit with its own source roots and classpath.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Build-tool module name (Gradle project name, or the workspace directory name for
    /// convention-based projects).
    pub name: String,
    pub source_roots: BTreeSet<PathBuf>,
    pub test_source_roots: BTreeSet<PathBuf>,
    pub classpath: Vec<PathBuf>,
    pub test_classpath: Vec<PathBuf>,
    pub kotlin_version: Option<String>,
    pub jvm_target: Option<String>,
    pub is_android_like: bool,
    /// Empty unless the module is multi-platform.
    pub platform_targets: Vec<PlatformTarget>,
}

impl ModuleInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_roots: BTreeSet::new(),
            test_source_roots: BTreeSet::new(),
            classpath: Vec::new(),
            test_classpath: Vec::new(),
            kotlin_version: None,
            jvm_target: None,
            is_android_like: false,
            platform_targets: Vec::new(),
        }
    }

    /// Whether the build tool's primary query left this module without a compile classpath.
    ///
    /// This is deliberately conservative: a module that legitimately has no dependencies is
    /// indistinguishable from one whose flavor the model query could not resolve.
    pub fn needs_classpath_recovery(&self) -> bool {
        self.classpath.is_empty()
    }

    pub fn is_multiplatform(&self) -> bool {
        !self.platform_targets.is_empty()
    }

    /// Every main and test source root, including those of platform targets.
    pub fn all_source_roots(&self) -> impl Iterator<Item = &Path> {
        self.source_roots
            .iter()
            .chain(self.test_source_roots.iter())
            .chain(
                self.platform_targets
                    .iter()
                    .flat_map(|t| t.source_roots.iter().chain(t.test_source_roots.iter())),
            )
            .map(PathBuf::as_path)
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.all_source_roots().any(|root| path.starts_with(root))
    }
}

/// A resolved workspace.
///
/// Instances are never mutated after construction: every resolution (and every rebuild) produces
/// a fresh model that is shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectModel {
    pub modules: Vec<ModuleInfo>,
    pub project_dir: Option<PathBuf>,
    /// Build flavor the model was resolved for (e.g. `debug`).
    pub variant: String,
    pub is_multiplatform: bool,
}

impl ProjectModel {
    pub fn new(
        modules: Vec<ModuleInfo>,
        project_dir: Option<PathBuf>,
        variant: impl Into<String>,
    ) -> Self {
        let is_multiplatform = modules.iter().any(ModuleInfo::is_multiplatform);
        Self {
            modules,
            project_dir,
            variant: variant.into(),
            is_multiplatform,
        }
    }

    /// A model with no modules. Used before the first resolution and by degraded sessions.
    pub fn empty() -> Self {
        Self::new(Vec::new(), None, String::new())
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// The first module whose source roots contain `path`.
    pub fn module_for_file(&self, path: &Path) -> Option<&ModuleInfo> {
        self.modules.iter().find(|m| m.contains_file(path))
    }
}
