//! Project resolution: turns a workspace folder into a [`ProjectModel`].
//!
//! Providers for concrete build tools are registered with a [`BuildSystemResolver`], which picks
//! the best match for a directory and falls back to source-layout conventions whenever the build
//! tool is missing or fails.

mod convention;
mod gradle;
pub mod mobile;
mod recovery;
mod resolver;

pub use convention::ConventionProvider;
pub use gradle::{GradleOptions, GradleProvider};
pub use recovery::{merge_recovered_classpaths, probe_configurations};
pub use resolver::{BuildSystemResolver, Detection, Resolution};

pub use kestrel_build_model::{
    BuildSystemError, BuildSystemProvider, ModuleInfo, PathPattern, Platform, PlatformTarget,
    ProjectModel,
};

use std::io;
use std::path::{Path, PathBuf};

/// The canonical form of a workspace root. Missing roots are an error; roots that exist but
/// cannot be canonicalized are used as given.
pub(crate) fn canonicalize_root(root: &Path) -> Result<PathBuf, BuildSystemError> {
    if !root.is_dir() {
        return Err(BuildSystemError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("workspace root `{}` is not a directory", root.display()),
        )));
    }
    Ok(root.canonicalize().unwrap_or_else(|_| root.to_path_buf()))
}
