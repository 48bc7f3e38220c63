//! Mobile (Android-style) module detection and source-root backfill.
//!
//! The build tool's object model under-reports source directories for these modules, so once a
//! module is recognized we add the conventional layout plus generated directories that already
//! exist on disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

const ANDROID_PLUGIN_IDS: &[&str] = &[
    "com.android.application",
    "com.android.library",
    "com.android.dynamic-feature",
    "com.android.test",
];

const BUILD_SCRIPTS: &[&str] = &["build.gradle.kts", "build.gradle"];

/// Which heuristic recognized a module as mobile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MobileEvidence {
    /// The model query reported an Android plugin id.
    Plugin,
    /// A classpath entry is only ever present for Android compilations.
    Classpath,
    /// `src/main/AndroidManifest.xml` exists.
    Manifest,
    /// The build script applies an Android plugin or configures an `android {}` block.
    BuildScript,
}

impl MobileEvidence {
    pub fn as_str(self) -> &'static str {
        match self {
            MobileEvidence::Plugin => "plugin",
            MobileEvidence::Classpath => "classpath",
            MobileEvidence::Manifest => "manifest",
            MobileEvidence::BuildScript => "build-script",
        }
    }
}

/// Inputs for mobile detection of one module.
#[derive(Debug, Clone, Copy)]
pub struct MobileProbe<'a> {
    pub module_dir: &'a Path,
    pub plugins: &'a [String],
    pub classpath: &'a [PathBuf],
}

/// Run the detection strategies in order and report the first that matched.
pub fn detect_mobile_module(probe: MobileProbe<'_>) -> Option<MobileEvidence> {
    let strategies: [(MobileEvidence, fn(&MobileProbe<'_>) -> bool); 4] = [
        (MobileEvidence::Plugin, |p| {
            p.plugins
                .iter()
                .any(|id| ANDROID_PLUGIN_IDS.contains(&id.as_str()))
        }),
        (MobileEvidence::Classpath, |p| {
            p.classpath.iter().any(|entry| is_android_classpath_entry(entry))
        }),
        (MobileEvidence::Manifest, |p| {
            p.module_dir.join("src/main/AndroidManifest.xml").is_file()
        }),
        (MobileEvidence::BuildScript, |p| {
            build_script_applies_android(p.module_dir)
        }),
    ];

    strategies
        .into_iter()
        .find(|(_, check)| check(&probe))
        .map(|(evidence, _)| evidence)
}

/// The platform `android.jar` or an Android Gradle Plugin artifact from the Gradle cache
/// (`.../files-2.1/com.android.tools.build/...`). AndroidX libraries alone are usable from
/// plain JVM modules and do not count.
fn is_android_classpath_entry(entry: &Path) -> bool {
    if entry.file_name().and_then(|n| n.to_str()) == Some("android.jar") {
        return true;
    }
    entry.components().any(|component| {
        component.as_os_str().to_str().is_some_and(|group| {
            group == "com.android.tools" || group.starts_with("com.android.tools.")
        })
    })
}

fn build_script_applies_android(module_dir: &Path) -> bool {
    BUILD_SCRIPTS.iter().any(|name| {
        std::fs::read_to_string(module_dir.join(name))
            .map(|text| script_mentions_android(&strip_script_comments(&text)))
            .unwrap_or(false)
    })
}

fn android_script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)(\bid\s*\(?\s*["']com\.android\.(application|library|dynamic-feature|test)["']|apply\s+plugin\s*:\s*["']com\.android\.|\balias\s*\(\s*libs\.plugins\.android|^\s*android\s*\{)"#,
        )
        .unwrap_or_else(|err| panic!("invalid android script regex: {err}"))
    })
}

pub(crate) fn script_mentions_android(script: &str) -> bool {
    android_script_regex().is_match(script)
}

/// Best-effort removal of `//` and `/* */` comments, leaving string literals intact.
pub(crate) fn strip_script_comments(contents: &str) -> String {
    let mut out = String::with_capacity(contents.len());
    let mut chars = contents.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    if next == '\n' {
                        out.push('\n');
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Main and test roots to add to a mobile module for `variant`. Only existing directories are
/// returned.
pub fn backfill_source_roots(module_dir: &Path, variant: &str) -> (BTreeSet<PathBuf>, BTreeSet<PathBuf>) {
    let variant = if variant.trim().is_empty() {
        "debug"
    } else {
        variant.trim()
    };
    let test_variant = format!("{variant}UnitTest");

    let mut main = vec![
        module_dir.join("src/main/java"),
        module_dir.join("src/main/kotlin"),
        module_dir.join("src").join(variant).join("java"),
        module_dir.join("src").join(variant).join("kotlin"),
    ];
    let mut test = vec![
        module_dir.join("src/test/java"),
        module_dir.join("src/test/kotlin"),
        module_dir.join("src/androidTest/java"),
        module_dir.join("src/androidTest/kotlin"),
    ];

    let generated = module_dir.join("build/generated");
    main.push(generated.join("ksp").join(variant).join("kotlin"));
    main.push(generated.join("ksp").join(variant).join("java"));
    main.push(
        generated
            .join("data_binding_base_class_source_out")
            .join(variant)
            .join("out"),
    );
    test.push(generated.join("ksp").join(&test_variant).join("kotlin"));
    test.push(generated.join("ksp").join(&test_variant).join("java"));

    // `build/generated/source/<generator>/<variant>`: R, BuildConfig, AIDL, kapt, navigation args...
    if let Ok(entries) = std::fs::read_dir(generated.join("source")) {
        let mut generators: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        generators.sort();
        for generator in generators {
            main.push(generator.join(variant));
            test.push(generator.join(&test_variant));
        }
    }

    let existing = |paths: Vec<PathBuf>| -> BTreeSet<PathBuf> {
        paths.into_iter().filter(|p| p.is_dir()).collect()
    };
    (existing(main), existing(test))
}
