use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Captured output from a build tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `stdout` + `stderr` concatenated with a newline separator when needed.
    pub fn combined(&self) -> String {
        let mut s = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        s.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&self.stderr);
        }
        s
    }
}

/// Runs external build tool commands.
///
/// Implementations must never let the child inherit the server's stdio: stdout is reserved for
/// editor protocol messages.
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    fn run(&self, cwd: &Path, program: &Path, args: &[String]) -> io::Result<CommandOutput>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultCommandRunner {
    /// Best-effort timeout: the child is polled and killed once exceeded. Grandchildren spawned
    /// by the build tool (daemons, workers) are not tracked.
    pub timeout: Option<Duration>,
    /// Extra environment variables for the child process.
    pub env: Vec<(String, String)>,
}

impl DefaultCommandRunner {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            env: Vec::new(),
        }
    }
}

impl CommandRunner for DefaultCommandRunner {
    fn run(&self, cwd: &Path, program: &Path, args: &[String]) -> io::Result<CommandOutput> {
        let command = format_command(program, args);
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        tracing::debug!(target: "kestrel.build", command = %command, "spawning build tool");
        let mut child = cmd.spawn().map_err(|err| {
            io::Error::new(err.kind(), format!("failed to spawn `{command}`: {err}"))
        })?;

        let stdout = drain(child.stdout.take(), "stdout")?;
        let stderr = drain(child.stderr.take(), "stderr")?;

        let status = wait_with_timeout(&mut child, self.timeout, &command);
        if status.is_err() {
            let _ = child.kill();
            let _ = child.wait();
        }

        let stdout = join_lossy(stdout);
        let stderr = join_lossy(stderr);

        match status {
            Ok(status) => Ok(CommandOutput {
                status,
                stdout,
                stderr,
            }),
            Err(err) => {
                let mut msg = err.to_string();
                if !stderr.is_empty() {
                    msg.push_str("\nstderr:\n");
                    msg.push_str(&stderr);
                }
                Err(io::Error::new(err.kind(), msg))
            }
        }
    }
}

fn drain<R: Read + Send + 'static>(
    pipe: Option<R>,
    name: &'static str,
) -> io::Result<JoinHandle<Vec<u8>>> {
    let mut pipe = pipe.ok_or_else(|| {
        io::Error::new(io::ErrorKind::Other, format!("failed to capture {name}"))
    })?;
    Ok(thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    }))
}

fn join_lossy(handle: JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
    command: &str,
) -> io::Result<ExitStatus> {
    let Some(timeout) = timeout else {
        return child.wait();
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() >= timeout {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("command `{command}` timed out after {timeout:?}"),
            ));
        }
        thread::sleep(Duration::from_millis(20));
    }
}

pub(crate) fn format_command(program: &Path, args: &[String]) -> String {
    let mut out = program.to_string_lossy().into_owned();
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}
