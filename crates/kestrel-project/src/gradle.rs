use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kestrel_build::{CommandRunner, DefaultCommandRunner, GradleBuild, GradleConfig, GradleProject};
use kestrel_build_model::{
    BuildSystemError, BuildSystemProvider, ModuleInfo, PathPattern, Platform, PlatformTarget,
    ProjectModel,
};
use kestrel_config::BuildConfig;

use crate::mobile::{backfill_source_roots, detect_mobile_module, MobileProbe};
use crate::recovery::{merge_recovered_classpaths, probe_configurations, recover_missing_classpaths};

const GRADLE_MARKERS: &[&str] = &[
    "build.gradle",
    "build.gradle.kts",
    "settings.gradle",
    "settings.gradle.kts",
];

/// Options for [`GradleProvider`], usually derived from `[build]` in `kestrel.toml`.
#[derive(Debug, Clone)]
pub struct GradleOptions {
    pub gradle: GradleConfig,
    /// Variant used by [`BuildSystemProvider::resolve_module`], which is not given one.
    pub default_variant: String,
    pub classpath_recovery: bool,
    pub recovery_configurations: Vec<String>,
}

impl Default for GradleOptions {
    fn default() -> Self {
        Self::from_build_config(&BuildConfig::default())
    }
}

impl GradleOptions {
    pub fn from_build_config(config: &BuildConfig) -> Self {
        Self {
            gradle: GradleConfig {
                gradle_path: config.gradle_path.clone(),
                prefer_wrapper: config.prefer_wrapper,
            },
            default_variant: config.variant.clone(),
            classpath_recovery: config.classpath_recovery,
            recovery_configurations: config.recovery_configurations.clone(),
        }
    }
}

/// Primary provider: asks Gradle for its project model, then repairs what the model query
/// commonly gets wrong (empty classpaths, under-reported mobile source roots).
#[derive(Debug)]
pub struct GradleProvider {
    build: GradleBuild,
    options: GradleOptions,
}

impl GradleProvider {
    pub fn new(options: GradleOptions) -> Self {
        Self::with_runner(options, Arc::new(DefaultCommandRunner::default()))
    }

    pub fn from_build_config(config: &BuildConfig) -> Self {
        let runner = DefaultCommandRunner::with_timeout(config.timeout());
        Self::with_runner(GradleOptions::from_build_config(config), Arc::new(runner))
    }

    pub fn with_runner(options: GradleOptions, runner: Arc<dyn CommandRunner>) -> Self {
        let build = GradleBuild::with_runner(options.gradle.clone(), runner);
        Self { build, options }
    }

    fn load_modules(
        &self,
        root: &Path,
        variant: &str,
    ) -> Result<Vec<ModuleInfo>, BuildSystemError> {
        let projects = self
            .build
            .projects(root, variant)
            .map_err(BuildSystemError::other)?;
        let projects = drop_aggregator_root(projects);

        let names = module_names(&projects);
        let mut gradle_paths = HashMap::new();
        let mut modules = Vec::with_capacity(projects.len());
        for (project, name) in projects.iter().zip(names) {
            gradle_paths.insert(name.clone(), project.path.clone());
            modules.push(module_from_project(project, name));
        }

        if self.options.classpath_recovery && modules.iter().any(ModuleInfo::needs_classpath_recovery) {
            let configurations = probe_configurations(&self.options.recovery_configurations, variant);
            let recovered = recover_missing_classpaths(
                &self.build,
                root,
                &modules,
                &gradle_paths,
                &configurations,
            );
            modules = merge_recovered_classpaths(modules, recovered);
        }

        for (module, project) in modules.iter_mut().zip(&projects) {
            apply_mobile_layout(module, project, variant);
        }

        Ok(modules)
    }
}

impl BuildSystemProvider for GradleProvider {
    fn id(&self) -> &'static str {
        "gradle"
    }

    fn marker_files(&self) -> &[&'static str] {
        GRADLE_MARKERS
    }

    fn priority(&self) -> i32 {
        10
    }

    fn resolve(&self, root: &Path, variant: &str) -> Result<ProjectModel, BuildSystemError> {
        let root = crate::canonicalize_root(root)?;
        let modules = self.load_modules(&root, variant)?;
        tracing::debug!(
            target: "kestrel.project",
            root = %root.display(),
            variant,
            modules = modules.len(),
            "resolved gradle project model"
        );
        Ok(ProjectModel::new(modules, Some(root), variant))
    }

    fn resolve_module(&self, root: &Path, name: &str) -> Result<ModuleInfo, BuildSystemError> {
        let model = self.resolve(root, &self.options.default_variant)?;
        model
            .modules
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| BuildSystemError::UnknownModule {
                name: name.to_string(),
            })
    }

    fn watch_files(&self) -> Vec<PathPattern> {
        vec![
            PathPattern::ExactFileName("build.gradle"),
            PathPattern::ExactFileName("build.gradle.kts"),
            PathPattern::ExactFileName("settings.gradle"),
            PathPattern::ExactFileName("settings.gradle.kts"),
            PathPattern::Glob("**/*.gradle"),
            PathPattern::Glob("**/*.gradle.kts"),
            PathPattern::ExactFileName("libs.versions.toml"),
            PathPattern::Glob("**/gradle/*.versions.toml"),
            PathPattern::ExactFileName("gradle.properties"),
            PathPattern::ExactFileName("gradlew"),
            PathPattern::ExactFileName("gradlew.bat"),
            PathPattern::Glob("**/gradle/wrapper/gradle-wrapper.properties"),
        ]
    }
}

/// Drop the root project when it only aggregates subprojects.
fn drop_aggregator_root(projects: Vec<GradleProject>) -> Vec<GradleProject> {
    if projects.len() < 2 {
        return projects;
    }
    projects
        .into_iter()
        .filter(|p| {
            let is_root = p.path == ":" || p.path.is_empty();
            let has_content = !p.source_roots.is_empty()
                || !p.test_source_roots.is_empty()
                || !p.targets.is_empty();
            !is_root || has_content
        })
        .collect()
}

/// Module names are the project names unless two projects share one; those get a name derived
/// from their project path (`:feature:app` -> `feature-app`).
fn module_names(projects: &[GradleProject]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for project in projects {
        *counts.entry(project.name.as_str()).or_default() += 1;
    }

    projects
        .iter()
        .map(|project| {
            if counts.get(project.name.as_str()).copied().unwrap_or(0) > 1 {
                let derived = project
                    .path
                    .trim_start_matches(':')
                    .replace(':', "-");
                if derived.is_empty() {
                    project.name.clone()
                } else {
                    derived
                }
            } else {
                project.name.clone()
            }
        })
        .collect()
}

fn module_from_project(project: &GradleProject, name: String) -> ModuleInfo {
    let mut module = ModuleInfo::new(name);
    module.source_roots = project.source_roots.iter().cloned().collect();
    module.test_source_roots = project.test_source_roots.iter().cloned().collect();
    module.classpath = project.classpath.clone();
    module.test_classpath = project.test_classpath.clone();
    module.kotlin_version = project.kotlin_version.clone();
    module.jvm_target = project.jvm_target.clone();

    for target in &project.targets {
        let Some(platform) = Platform::from_gradle_platform_type(&target.platform_type) else {
            continue;
        };
        let mut platform_target = PlatformTarget::new(target.name.clone(), platform);
        platform_target.source_roots = target.source_roots.iter().cloned().collect();
        platform_target.test_source_roots = target.test_source_roots.iter().cloned().collect();
        platform_target.classpath = target.classpath.clone();
        platform_target.test_classpath = target.test_classpath.clone();
        module.platform_targets.push(platform_target);
    }

    module
}

fn apply_mobile_layout(module: &mut ModuleInfo, project: &GradleProject, variant: &str) {
    let probe = MobileProbe {
        module_dir: &project.dir,
        plugins: &project.plugins,
        classpath: &module.classpath,
    };
    let Some(evidence) = detect_mobile_module(probe) else {
        return;
    };

    let variant = if variant.trim().is_empty() { "debug" } else { variant };
    let (main, test) = backfill_source_roots(&project.dir, variant);
    let added = count_new(&module.source_roots, &main) + count_new(&module.test_source_roots, &test);
    module.source_roots.extend(main);
    module.test_source_roots.extend(test);
    module.is_android_like = true;

    tracing::debug!(
        target: "kestrel.project",
        module = %module.name,
        evidence = evidence.as_str(),
        added_roots = added,
        "applied mobile source layout"
    );
}

fn count_new(existing: &BTreeSet<PathBuf>, candidates: &BTreeSet<PathBuf>) -> usize {
    candidates.difference(existing).count()
}
