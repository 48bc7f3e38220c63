//! Workspace configuration (`kestrel.toml`) and logging setup.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, OnceLock};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;

/// Environment variable overriding config discovery.
pub const KESTREL_CONFIG_ENV_VAR: &str = "KESTREL_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` embeds a source snippet; keep only the message.
        ConfigError::Toml(err.message().trim().to_owned())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KestrelConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// `gradle` executable used when the project has no wrapper (or wrappers are disabled).
    #[serde(default = "BuildConfig::default_gradle_path")]
    pub gradle_path: PathBuf,

    /// Prefer `./gradlew` when present.
    #[serde(default = "BuildConfig::default_prefer_wrapper")]
    pub prefer_wrapper: bool,

    /// Timeout for a single build tool invocation, in milliseconds.
    #[serde(default = "BuildConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Build flavor to resolve (e.g. `debug`, `release`).
    #[serde(default = "BuildConfig::default_variant")]
    pub variant: String,

    /// Run the secondary classpath query for modules whose classpath came back empty.
    #[serde(default = "BuildConfig::default_classpath_recovery")]
    pub classpath_recovery: bool,

    /// Dependency configurations probed (in order) by the classpath recovery query.
    #[serde(default = "BuildConfig::default_recovery_configurations")]
    pub recovery_configurations: Vec<String>,
}

impl BuildConfig {
    fn default_gradle_path() -> PathBuf {
        PathBuf::from("gradle")
    }

    fn default_prefer_wrapper() -> bool {
        true
    }

    fn default_timeout_ms() -> u64 {
        300_000
    }

    fn default_variant() -> String {
        "debug".to_owned()
    }

    fn default_classpath_recovery() -> bool {
        true
    }

    fn default_recovery_configurations() -> Vec<String> {
        [
            "compileClasspath",
            "debugCompileClasspath",
            "releaseCompileClasspath",
            "jvmCompileClasspath",
            "runtimeClasspath",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            gradle_path: Self::default_gradle_path(),
            prefer_wrapper: Self::default_prefer_wrapper(),
            timeout_ms: Self::default_timeout_ms(),
            variant: Self::default_variant(),
            classpath_recovery: Self::default_classpath_recovery(),
            recovery_configurations: Self::default_recovery_configurations(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    #[serde(default = "DiagnosticsConfig::default_enabled")]
    pub enabled: bool,
}

impl DiagnosticsConfig {
    fn default_enabled() -> bool {
        true
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level for all Kestrel crates, or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Append logs to the given file path (in addition to stderr).
    ///
    /// If the file cannot be opened, file logging is disabled while stderr stays active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Create the effective `EnvFilter`. If `RUST_LOG` is set, it is merged into the result.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            file: None,
        }
    }
}

impl KestrelConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding the config environment lock.
///
/// Tests that temporarily set [`KESTREL_CONFIG_ENV_VAR`] must wrap the mutation and the
/// discovery in this helper; environment variables are process-global.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Discover the configuration file for a workspace root.
///
/// Search order:
/// 1) `KESTREL_CONFIG_PATH` (absolute or relative to `workspace_root`)
/// 2) `kestrel.toml`
/// 3) `.kestrel.toml`
/// 4) `.kestrel/config.toml`
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(KESTREL_CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            workspace_root.join(candidate)
        };
        return Some(path.canonicalize().unwrap_or(path));
    }

    ["kestrel.toml", ".kestrel.toml", ".kestrel/config.toml"]
        .into_iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}

/// Load the configuration for a workspace root.
///
/// If no config is present, returns [`KestrelConfig::default`] and `None`.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(KestrelConfig, Option<PathBuf>), ConfigError> {
    let Some(path) = discover_config_path(workspace_root) else {
        return Ok((KestrelConfig::default(), None));
    };

    let config = KestrelConfig::load_from_path(&path)?;
    Ok((config, Some(path)))
}

/// Whether `path` is one of the file names config discovery looks at.
pub fn is_config_file(workspace_root: &Path, path: &Path) -> bool {
    ["kestrel.toml", ".kestrel.toml", ".kestrel/config.toml"]
        .iter()
        .any(|name| workspace_root.join(name) == path)
}

static TRACING_INIT: Once = Once::new();

/// Initializes structured `tracing` logging.
///
/// Logs go to stderr (and optionally a file), never to stdout: stdout carries the editor
/// protocol. Only the first call installs a global subscriber.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config
            .file
            .as_ref()
            .and_then(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            })
            .map(|file| Arc::new(Mutex::new(file)));

        // `cargo test` output capture only works through `TestWriter`.
        let mut make_writer = if cfg!(debug_assertions) {
            BoxMakeWriter::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        };
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

#[derive(Clone)]
struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

struct MutexFileWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl std::io::Write for MutexFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.file.lock() {
            Ok(mut file) => file.write(buf),
            Err(poisoned) => poisoned.into_inner().write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.file.lock() {
            Ok(mut file) => file.flush(),
            Err(poisoned) => poisoned.into_inner().flush(),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            file: self.file.clone(),
        }
    }
}
