//! Secondary classpath query for modules the primary model query left without a classpath.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use kestrel_build::GradleBuild;
use kestrel_build_model::ModuleInfo;

/// The ordered configuration probe list for `variant`.
///
/// The variant-specific compile classpath (`debugCompileClasspath`, ...) is probed right after
/// the first configured name unless the configuration already lists it.
pub fn probe_configurations(configured: &[String], variant: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(configured.len() + 1);
    for name in configured {
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }

    let variant = variant.trim();
    if !variant.is_empty() {
        let specific = format!("{variant}CompileClasspath");
        if !out.contains(&specific) {
            let at = out.len().min(1);
            out.insert(at, specific);
        }
    }
    out
}

/// Run the recovery query for every module with an empty classpath.
///
/// `gradle_paths` maps module names to Gradle project paths. Failures are logged per module and
/// never abort recovery of the remaining modules. Returns the recovered classpaths by module name.
pub(crate) fn recover_missing_classpaths(
    gradle: &GradleBuild,
    root: &Path,
    modules: &[ModuleInfo],
    gradle_paths: &HashMap<String, String>,
    configurations: &[String],
) -> HashMap<String, Vec<PathBuf>> {
    let mut recovered = HashMap::new();

    for module in modules.iter().filter(|m| m.needs_classpath_recovery()) {
        let Some(project_path) = gradle_paths.get(&module.name) else {
            continue;
        };

        match gradle.recover_classpath(root, project_path, configurations) {
            Ok(result) if !result.is_empty() => {
                tracing::info!(
                    target: "kestrel.project",
                    module = %module.name,
                    configuration = result.configuration.as_deref().unwrap_or("<unknown>"),
                    strategy = result.strategy.map(|s| s.as_str()).unwrap_or("<unknown>"),
                    entries = result.entries.len(),
                    "recovered module classpath"
                );
                recovered.insert(module.name.clone(), result.entries);
            }
            Ok(result) => {
                tracing::debug!(
                    target: "kestrel.project",
                    module = %module.name,
                    attempts = ?result.errors,
                    "classpath recovery found no dependency files"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "kestrel.project",
                    module = %module.name,
                    error = %err,
                    "classpath recovery failed; leaving classpath empty"
                );
            }
        }
    }

    recovered
}

/// Merge recovered classpaths back into `modules` by name. Only empty classpaths are replaced.
pub fn merge_recovered_classpaths(
    modules: Vec<ModuleInfo>,
    mut recovered: HashMap<String, Vec<PathBuf>>,
) -> Vec<ModuleInfo> {
    modules
        .into_iter()
        .map(|mut module| {
            if module.classpath.is_empty() {
                if let Some(entries) = recovered.remove(&module.name) {
                    module.classpath = entries;
                }
            }
            module
        })
        .collect()
}
