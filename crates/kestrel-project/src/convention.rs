use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kestrel_build_model::{BuildSystemError, BuildSystemProvider, ModuleInfo, ProjectModel};

/// Main source directories, best first. All that exist are used.
const MAIN_SOURCE_DIRS: &[&str] = &[
    "src/main/kotlin",
    "src/main/java",
    "src/commonMain/kotlin",
    "src/jvmMain/kotlin",
];

/// Used only when none of [`MAIN_SOURCE_DIRS`] exist; the first existing one wins.
const LOOSE_SOURCE_DIRS: &[&str] = &["src/kotlin", "src"];

const TEST_SOURCE_DIRS: &[&str] = &[
    "src/test/kotlin",
    "src/test/java",
    "src/commonTest/kotlin",
    "src/jvmTest/kotlin",
    "test",
];

const GENERATED_SOURCE_DIRS: &[&str] = &[
    "build/generated/ksp/main/kotlin",
    "build/generated/ksp/main/java",
    "build/generated/source/kapt/main",
];

/// Convention-based provider used when no build tool is recognized (or the build tool fails).
///
/// It never wins by marker match, but always produces a single-module model.
#[derive(Debug, Clone, Default)]
pub struct ConventionProvider;

impl ConventionProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BuildSystemProvider for ConventionProvider {
    fn id(&self) -> &'static str {
        "convention"
    }

    fn marker_files(&self) -> &[&'static str] {
        &[]
    }

    fn priority(&self) -> i32 {
        i32::MIN
    }

    fn resolve(&self, root: &Path, variant: &str) -> Result<ProjectModel, BuildSystemError> {
        let root = crate::canonicalize_root(root)?;
        let module = convention_module(&root);
        Ok(ProjectModel::new(vec![module], Some(root), variant))
    }

    fn resolve_module(&self, root: &Path, name: &str) -> Result<ModuleInfo, BuildSystemError> {
        let root = crate::canonicalize_root(root)?;
        let module = convention_module(&root);
        if module.name == name {
            Ok(module)
        } else {
            Err(BuildSystemError::UnknownModule {
                name: name.to_string(),
            })
        }
    }
}

fn convention_module(root: &Path) -> ModuleInfo {
    let mut module = ModuleInfo::new(module_name(root));

    let test_roots = existing_dirs(root, TEST_SOURCE_DIRS);
    let mut main_roots = existing_dirs(root, MAIN_SOURCE_DIRS);
    if main_roots.is_empty() {
        // A loose `src/` is only a root when it doesn't also hold the tests.
        main_roots.extend(
            LOOSE_SOURCE_DIRS
                .iter()
                .map(|rel| root.join(rel))
                .filter(|dir| dir.is_dir())
                .find(|dir| !test_roots.iter().any(|t| t.starts_with(dir))),
        );
    }
    main_roots.extend(existing_dirs(root, GENERATED_SOURCE_DIRS));

    module.source_roots = main_roots;
    module.test_source_roots = test_roots;
    module
}

fn module_name(root: &Path) -> String {
    root.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("root")
        .to_string()
}

fn existing_dirs(root: &Path, rels: &[&str]) -> BTreeSet<PathBuf> {
    rels.iter()
        .map(|rel| root.join(rel))
        .filter(|dir| dir.is_dir())
        .collect()
}
