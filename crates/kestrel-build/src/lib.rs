//! External build tool integration.
//!
//! Every interaction with Gradle goes through a [`CommandRunner`] that captures the tool's
//! stdout/stderr: diagnostics and progress printed by the build must never reach the stdout
//! channel that carries editor protocol messages.

mod command;
mod gradle;

pub use command::{CommandOutput, CommandRunner, DefaultCommandRunner};
pub use gradle::{
    parse_classpath_recovery_output, parse_gradle_model_output, ClasspathStrategy, GradleBuild,
    GradleConfig, GradleProject, GradleTarget, RecoveredClasspath,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(
        "{tool} command `{command}` failed with exit code {code:?}\nstdout:\n{stdout}\nstderr:\n{stderr}"
    )]
    CommandFailed {
        tool: &'static str,
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to parse build output: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, BuildError>;
