use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::command::format_command;
use crate::{BuildError, CommandOutput, CommandRunner, DefaultCommandRunner, Result};

const KESTREL_MODEL_BEGIN: &str = "KESTREL_MODEL_BEGIN";
const KESTREL_MODEL_END: &str = "KESTREL_MODEL_END";
const KESTREL_MODEL_TASK: &str = "kestrelPrintModel";

const KESTREL_CLASSPATH_BEGIN: &str = "KESTREL_CLASSPATH_BEGIN";
const KESTREL_CLASSPATH_END: &str = "KESTREL_CLASSPATH_END";
const KESTREL_CLASSPATH_TASK: &str = "kestrelRecoverClasspath";

#[derive(Debug, Clone)]
pub struct GradleConfig {
    /// Path to the `gradle` executable used when a project wrapper (`gradlew`) is not present.
    pub gradle_path: PathBuf,
    /// Prefer using the Gradle wrapper (`./gradlew`) when present.
    pub prefer_wrapper: bool,
}

impl Default for GradleConfig {
    fn default() -> Self {
        Self {
            gradle_path: PathBuf::from("gradle"),
            prefer_wrapper: true,
        }
    }
}

/// One project as reported by the model query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradleProject {
    /// Gradle project path (`:`, `:app`, `:lib:core`).
    pub path: String,
    pub name: String,
    pub dir: PathBuf,
    pub source_roots: Vec<PathBuf>,
    pub test_source_roots: Vec<PathBuf>,
    pub classpath: Vec<PathBuf>,
    pub test_classpath: Vec<PathBuf>,
    pub kotlin_version: Option<String>,
    pub jvm_target: Option<String>,
    /// Applied plugin ids (best effort; Gradle only reports ids for plugins applied by id).
    pub plugins: Vec<String>,
    pub targets: Vec<GradleTarget>,
}

/// A Kotlin multi-platform target of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradleTarget {
    pub name: String,
    /// `KotlinPlatformType` name (`jvm`, `androidJvm`, `native`, `js`, `wasm`, `common`).
    pub platform_type: String,
    pub source_roots: Vec<PathBuf>,
    pub test_source_roots: Vec<PathBuf>,
    pub classpath: Vec<PathBuf>,
    pub test_classpath: Vec<PathBuf>,
}

/// How the recovery query managed to obtain a configuration's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClasspathStrategy {
    /// `resolvedConfiguration.lenientConfiguration.files`
    Lenient,
    /// `incoming.files`
    IncomingFiles,
    /// `resolvedConfiguration.resolvedArtifacts*.file`
    ResolvedArtifacts,
}

impl ClasspathStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ClasspathStrategy::Lenient => "lenient",
            ClasspathStrategy::IncomingFiles => "incoming-files",
            ClasspathStrategy::ResolvedArtifacts => "resolved-artifacts",
        }
    }
}

/// Result of the secondary classpath query for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredClasspath {
    pub project: String,
    /// The probed configuration that produced `entries`, if any did.
    pub configuration: Option<String>,
    pub strategy: Option<ClasspathStrategy>,
    pub entries: Vec<PathBuf>,
    /// Per-attempt failures reported by the build script.
    pub errors: Vec<String>,
}

impl RecoveredClasspath {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct GradleBuild {
    config: GradleConfig,
    runner: Arc<dyn CommandRunner>,
}

impl GradleBuild {
    pub fn new(config: GradleConfig) -> Self {
        Self::with_runner(config, Arc::new(DefaultCommandRunner::default()))
    }

    pub fn with_runner(config: GradleConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Query the build's object model for every project in the build.
    pub fn projects(&self, project_root: &Path, variant: &str) -> Result<Vec<GradleProject>> {
        let mut args = vec![format!("-Pkestrel.variant={variant}")];
        args.push(KESTREL_MODEL_TASK.to_string());

        let (program, args, output) = self.run_with_init_script(project_root, args)?;
        ensure_success(&program, &args, &output)?;
        parse_gradle_model_output(&output.combined())
    }

    /// Run the classpath recovery query for a single project.
    ///
    /// `configurations` are probed in order; the first one that yields files wins.
    pub fn recover_classpath(
        &self,
        project_root: &Path,
        project_path: &str,
        configurations: &[String],
    ) -> Result<RecoveredClasspath> {
        let task = match project_path {
            "" | ":" => KESTREL_CLASSPATH_TASK.to_string(),
            path => format!("{path}:{KESTREL_CLASSPATH_TASK}"),
        };
        let args = vec![
            format!("-Pkestrel.configurations={}", configurations.join(",")),
            task,
        ];

        let (program, args, output) = self.run_with_init_script(project_root, args)?;
        ensure_success(&program, &args, &output)?;
        parse_classpath_recovery_output(&output.combined())
    }

    fn run_with_init_script(
        &self,
        project_root: &Path,
        extra_args: Vec<String>,
    ) -> Result<(PathBuf, Vec<String>, CommandOutput)> {
        let gradle = self.gradle_executable(project_root);
        let init_script = write_init_script()?;

        let mut args: Vec<String> = vec![
            "--console=plain".into(),
            "-q".into(),
            "--init-script".into(),
            init_script.to_string_lossy().into_owned(),
        ];
        args.extend(extra_args);

        let output = self.runner.run(project_root, &gradle, &args);
        let _ = std::fs::remove_file(&init_script);
        Ok((gradle, args, output?))
    }

    pub fn gradle_executable(&self, project_root: &Path) -> PathBuf {
        if self.config.prefer_wrapper {
            let wrapper_candidates = if cfg!(windows) {
                ["gradlew.bat", "gradlew"]
            } else {
                ["gradlew", "gradlew.bat"]
            };
            for name in wrapper_candidates {
                let wrapper = project_root.join(name);
                if wrapper.is_file() {
                    return wrapper;
                }
            }
        }
        self.config.gradle_path.clone()
    }
}

fn ensure_success(program: &Path, args: &[String], output: &CommandOutput) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(BuildError::CommandFailed {
        tool: "gradle",
        command: format_command(program, args),
        code: output.status.code(),
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    })
}

#[derive(Debug, Deserialize)]
struct GradleModelJson {
    #[serde(default)]
    projects: Vec<GradleProjectJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradleProjectJson {
    path: String,
    #[serde(default)]
    name: Option<String>,
    project_dir: String,
    #[serde(default)]
    source_roots: Option<Vec<String>>,
    #[serde(default)]
    test_source_roots: Option<Vec<String>>,
    #[serde(default)]
    classpath: Option<Vec<String>>,
    #[serde(default)]
    test_classpath: Option<Vec<String>>,
    #[serde(default)]
    kotlin_version: Option<String>,
    #[serde(default)]
    jvm_target: Option<String>,
    #[serde(default)]
    plugins: Option<Vec<String>>,
    #[serde(default)]
    targets: Option<Vec<GradleTargetJson>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradleTargetJson {
    name: String,
    platform_type: String,
    #[serde(default)]
    source_roots: Option<Vec<String>>,
    #[serde(default)]
    test_source_roots: Option<Vec<String>>,
    #[serde(default)]
    classpath: Option<Vec<String>>,
    #[serde(default)]
    test_classpath: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ClasspathRecoveryJson {
    project: String,
    #[serde(default)]
    configuration: Option<String>,
    #[serde(default)]
    strategy: Option<ClasspathStrategy>,
    #[serde(default)]
    files: Option<Vec<String>>,
    #[serde(default)]
    errors: Option<Vec<String>>,
}

/// Parse the model query output. Gradle noise around the sentinel block is ignored.
pub fn parse_gradle_model_output(output: &str) -> Result<Vec<GradleProject>> {
    let json = extract_sentinel_block(output, KESTREL_MODEL_BEGIN, KESTREL_MODEL_END)
        .ok_or_else(|| BuildError::Parse("failed to locate Gradle model block".into()))?;
    let parsed: GradleModelJson =
        serde_json::from_str(json.trim()).map_err(|e| BuildError::Parse(e.to_string()))?;

    let mut projects: Vec<GradleProject> = parsed
        .projects
        .into_iter()
        .map(|p| {
            let name = p
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| name_from_project_path(&p.path, &p.project_dir));
            GradleProject {
                name,
                dir: PathBuf::from(p.project_dir),
                path: p.path,
                source_roots: strings_to_paths(p.source_roots),
                test_source_roots: strings_to_paths(p.test_source_roots),
                classpath: strings_to_paths(p.classpath),
                test_classpath: strings_to_paths(p.test_classpath),
                kotlin_version: non_blank(p.kotlin_version),
                jvm_target: non_blank(p.jvm_target),
                plugins: p.plugins.unwrap_or_default(),
                targets: p
                    .targets
                    .unwrap_or_default()
                    .into_iter()
                    .map(|t| GradleTarget {
                        name: t.name,
                        platform_type: t.platform_type,
                        source_roots: strings_to_paths(t.source_roots),
                        test_source_roots: strings_to_paths(t.test_source_roots),
                        classpath: strings_to_paths(t.classpath),
                        test_classpath: strings_to_paths(t.test_classpath),
                    })
                    .collect(),
            }
        })
        .collect();

    // Root first, then by path; Gradle's iteration order is not guaranteed to be stable.
    projects.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(projects)
}

/// Parse the classpath recovery output for a single project.
pub fn parse_classpath_recovery_output(output: &str) -> Result<RecoveredClasspath> {
    let json = extract_sentinel_block(output, KESTREL_CLASSPATH_BEGIN, KESTREL_CLASSPATH_END)
        .ok_or_else(|| BuildError::Parse("failed to locate Gradle classpath block".into()))?;
    let parsed: ClasspathRecoveryJson =
        serde_json::from_str(json.trim()).map_err(|e| BuildError::Parse(e.to_string()))?;

    Ok(RecoveredClasspath {
        project: parsed.project,
        configuration: non_blank(parsed.configuration),
        strategy: parsed.strategy,
        entries: strings_to_paths(parsed.files),
        errors: parsed.errors.unwrap_or_default(),
    })
}

fn name_from_project_path(path: &str, project_dir: &str) -> String {
    match path.rsplit(':').find(|s| !s.is_empty()) {
        Some(last) => last.to_string(),
        None => Path::new(project_dir)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("root")
            .to_string(),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn strings_to_paths(value: Option<Vec<String>>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    value
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(PathBuf::from(s))
            }
        })
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

fn extract_sentinel_block(output: &str, begin: &str, end: &str) -> Option<String> {
    let mut in_block = false;
    let mut lines = Vec::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if !in_block {
            if trimmed == begin {
                in_block = true;
            }
            continue;
        }

        if trimmed == end {
            return Some(lines.join("\n"));
        }
        lines.push(line);
    }
    None
}

fn write_init_script() -> Result<PathBuf> {
    let mut path = std::env::temp_dir();
    let token = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    path.push(format!(
        "kestrel_gradle_init_{}_{token}.gradle",
        std::process::id()
    ));
    std::fs::write(&path, INIT_SCRIPT)?;
    Ok(path)
}

// Registers two tasks:
// - `kestrelPrintModel` (root only): structural model of every project in the build
// - `kestrelRecoverClasspath` (every project): ordered configuration probe with layered
//   resolution fallbacks
//
// Every access is wrapped in try/catch; one project's failure must not hide the others.
const INIT_SCRIPT: &str = r#"
import groovy.json.JsonOutput

def kestrelPaths = { files ->
    if (files == null) return []
    try {
        return files.collect { it.absolutePath }
    } catch (Throwable ignored) {
        return []
    }
}

def kestrelResolve = { cfg ->
    if (cfg == null) return null
    try {
        if (!cfg.canBeResolved) return null
    } catch (Throwable ignored) {}
    try {
        return cfg.resolvedConfiguration.lenientConfiguration.files.collect { it.absolutePath }
    } catch (Throwable ignored) {
        return null
    }
}

def kestrelProjectModel = { proj, variant ->
    def model = [path: proj.path, name: proj.name, projectDir: proj.projectDir.absolutePath]

    def plugins = []
    try {
        proj.pluginManager.hasPlugin("com.android.application") && plugins.add("com.android.application")
        proj.pluginManager.hasPlugin("com.android.library") && plugins.add("com.android.library")
        proj.pluginManager.hasPlugin("org.jetbrains.kotlin.multiplatform") && plugins.add("org.jetbrains.kotlin.multiplatform")
        proj.pluginManager.hasPlugin("org.jetbrains.kotlin.jvm") && plugins.add("org.jetbrains.kotlin.jvm")
    } catch (Throwable ignored) {}
    model.plugins = plugins

    def sourceSets = null
    try {
        sourceSets = proj.extensions.findByName("sourceSets")
    } catch (Throwable ignored) {}
    if (sourceSets != null) {
        try {
            def main = sourceSets.findByName("main")
            def test = sourceSets.findByName("test")
            model.sourceRoots = main != null ? kestrelPaths(main.allSource.srcDirs) : []
            model.testSourceRoots = test != null ? kestrelPaths(test.allSource.srcDirs) : []
        } catch (Throwable ignored) {}
    }

    model.classpath = kestrelResolve(proj.configurations.findByName("compileClasspath"))
    model.testClasspath = kestrelResolve(proj.configurations.findByName("testCompileClasspath"))

    def kotlin = null
    try {
        kotlin = proj.extensions.findByName("kotlin")
    } catch (Throwable ignored) {}
    if (kotlin != null) {
        try {
            model.kotlinVersion = kotlin.coreLibrariesVersion
        } catch (Throwable ignored) {}

        try {
            def targets = []
            kotlin.targets.each { target ->
                def t = [name: target.name, platformType: target.platformType.name()]
                try {
                    def main = target.compilations.findByName("main")
                    def test = target.compilations.findByName("test")
                    if (main != null) {
                        t.sourceRoots = main.allKotlinSourceSets.collectMany { kestrelPaths(it.kotlin.srcDirs) }
                        t.classpath = kestrelPaths(main.compileDependencyFiles)
                    }
                    if (test != null) {
                        t.testSourceRoots = test.allKotlinSourceSets.collectMany { kestrelPaths(it.kotlin.srcDirs) }
                        t.testClasspath = kestrelPaths(test.compileDependencyFiles)
                    }
                } catch (Throwable ignored) {}
                targets.add(t)
            }
            model.targets = targets
        } catch (Throwable ignored) {}
    }

    try {
        proj.tasks.matching { it.name == "compileKotlin" || it.name == "compile${variant.capitalize()}Kotlin" }.each { task ->
            if (model.jvmTarget == null) {
                try {
                    model.jvmTarget = task.compilerOptions.jvmTarget.get().target
                } catch (Throwable ignored) {
                    try {
                        model.jvmTarget = task.kotlinOptions.jvmTarget
                    } catch (Throwable ignored2) {}
                }
            }
        }
    } catch (Throwable ignored) {}

    return model
}

allprojects { proj ->
    if (proj == proj.rootProject) {
        proj.tasks.register("kestrelPrintModel") {
            doLast {
                def variant = (proj.findProperty("kestrel.variant") ?: "debug").toString()
                def projects = []
                proj.rootProject.allprojects.each { p ->
                    try {
                        projects.add(kestrelProjectModel(p, variant))
                    } catch (Throwable e) {
                        projects.add([path: p.path, name: p.name, projectDir: p.projectDir.absolutePath])
                    }
                }
                println("KESTREL_MODEL_BEGIN")
                println(JsonOutput.toJson([projects: projects]))
                println("KESTREL_MODEL_END")
            }
        }
    }

    proj.tasks.register("kestrelRecoverClasspath") {
        doLast {
            def names = (proj.findProperty("kestrel.configurations") ?: "compileClasspath")
                .toString()
                .split(",")
                .collect { it.trim() }
                .findAll { !it.isEmpty() }

            def result = [project: proj.path, configuration: null, strategy: null, files: [], errors: []]
            for (name in names) {
                def cfg = proj.configurations.findByName(name)
                if (cfg == null) continue

                def files = null
                def strategy = null
                try {
                    files = cfg.resolvedConfiguration.lenientConfiguration.files.collect { it.absolutePath }
                    strategy = "lenient"
                } catch (Throwable e1) {
                    result.errors.add("${name}: lenient resolution failed: ${e1.message}".toString())
                    try {
                        files = cfg.incoming.files.files.collect { it.absolutePath }
                        strategy = "incoming-files"
                    } catch (Throwable e2) {
                        result.errors.add("${name}: incoming files failed: ${e2.message}".toString())
                        try {
                            files = cfg.resolvedConfiguration.resolvedArtifacts.collect { it.file.absolutePath }
                            strategy = "resolved-artifacts"
                        } catch (Throwable e3) {
                            result.errors.add("${name}: resolved artifacts failed: ${e3.message}".toString())
                        }
                    }
                }

                if (files != null && !files.isEmpty()) {
                    result.configuration = name
                    result.strategy = strategy
                    result.files = files
                    break
                }
            }

            println("KESTREL_CLASSPATH_BEGIN")
            println(JsonOutput.toJson(result))
            println("KESTREL_CLASSPATH_END")
        }
    }
}
"#;
