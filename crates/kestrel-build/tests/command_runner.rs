use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use kestrel_build::{
    BuildError, ClasspathStrategy, CommandOutput, CommandRunner, GradleBuild, GradleConfig,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Invocation {
    cwd: PathBuf,
    program: PathBuf,
    args: Vec<String>,
    init_script_existed: bool,
}

/// Routes by the Gradle task name (the last argument).
#[derive(Debug)]
struct RoutingCommandRunner {
    invocations: Mutex<Vec<Invocation>>,
    outputs: HashMap<String, CommandOutput>,
}

impl RoutingCommandRunner {
    fn new(outputs: HashMap<String, CommandOutput>) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            outputs,
        }
    }

    fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl CommandRunner for RoutingCommandRunner {
    fn run(&self, cwd: &Path, program: &Path, args: &[String]) -> std::io::Result<CommandOutput> {
        let init_script_existed = args
            .iter()
            .position(|a| a == "--init-script")
            .and_then(|idx| args.get(idx + 1))
            .is_some_and(|p| Path::new(p).is_file());
        self.invocations.lock().unwrap().push(Invocation {
            cwd: cwd.to_path_buf(),
            program: program.to_path_buf(),
            args: args.to_vec(),
            init_script_existed,
        });

        let task = args.last().cloned().unwrap_or_default();
        self.outputs.get(&task).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("unexpected gradle task {task}"),
            )
        })
    }
}

fn exit_status(code: i32) -> ExitStatus {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::ExitStatusExt;
        ExitStatus::from_raw(code as u32)
    }
}

fn output(code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        status: exit_status(code),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

#[test]
fn model_query_runs_init_script_task_and_cleans_up() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let model = r#"KESTREL_MODEL_BEGIN
{"projects":[{"path":":","name":"ws","projectDir":"/ws","classpath":["/repo/stdlib.jar"]}]}
KESTREL_MODEL_END
"#;
    let runner = Arc::new(RoutingCommandRunner::new(HashMap::from([(
        "kestrelPrintModel".to_string(),
        output(0, model),
    )])));
    let gradle = GradleBuild::with_runner(GradleConfig::default(), runner.clone());

    let projects = gradle.projects(tmp.path(), "release").expect("projects");
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].classpath, vec![PathBuf::from("/repo/stdlib.jar")]);

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1);
    let invocation = &invocations[0];
    assert_eq!(invocation.cwd, tmp.path());
    assert_eq!(invocation.program, PathBuf::from("gradle"));
    assert!(invocation.args.contains(&"--console=plain".to_string()));
    assert!(invocation.args.contains(&"-Pkestrel.variant=release".to_string()));
    assert!(invocation.init_script_existed);

    let script = invocation
        .args
        .iter()
        .position(|a| a == "--init-script")
        .map(|idx| PathBuf::from(&invocation.args[idx + 1]))
        .expect("init script arg");
    assert!(!script.exists(), "init script should be removed after the run");
}

#[test]
fn wrapper_is_preferred_when_present() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let wrapper = if cfg!(windows) { "gradlew.bat" } else { "gradlew" };
    std::fs::write(tmp.path().join(wrapper), "#!/bin/sh\n").expect("write wrapper");

    let runner = Arc::new(RoutingCommandRunner::new(HashMap::new()));
    let gradle = GradleBuild::with_runner(GradleConfig::default(), runner.clone());
    assert_eq!(gradle.gradle_executable(tmp.path()), tmp.path().join(wrapper));

    let no_wrapper = GradleBuild::with_runner(
        GradleConfig {
            gradle_path: PathBuf::from("/opt/gradle/bin/gradle"),
            prefer_wrapper: false,
        },
        runner,
    );
    assert_eq!(
        no_wrapper.gradle_executable(tmp.path()),
        PathBuf::from("/opt/gradle/bin/gradle")
    );
}

#[test]
fn classpath_recovery_targets_the_project_task() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let recovered = r#"KESTREL_CLASSPATH_BEGIN
{"project":":app","configuration":"debugCompileClasspath","strategy":"lenient","files":["/repo/appcompat.jar","/repo/core.jar"],"errors":[]}
KESTREL_CLASSPATH_END
"#;
    let runner = Arc::new(RoutingCommandRunner::new(HashMap::from([(
        ":app:kestrelRecoverClasspath".to_string(),
        output(0, recovered),
    )])));
    let gradle = GradleBuild::with_runner(GradleConfig::default(), runner.clone());

    let configurations = vec![
        "compileClasspath".to_string(),
        "debugCompileClasspath".to_string(),
    ];
    let result = gradle
        .recover_classpath(tmp.path(), ":app", &configurations)
        .expect("recover");
    assert_eq!(result.strategy, Some(ClasspathStrategy::Lenient));
    assert_eq!(result.entries.len(), 2);

    let args = &runner.invocations()[0].args;
    assert!(args.contains(&"-Pkestrel.configurations=compileClasspath,debugCompileClasspath".to_string()));
}

#[test]
fn root_project_recovery_uses_unprefixed_task() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let recovered = "KESTREL_CLASSPATH_BEGIN\n{\"project\":\":\",\"files\":[]}\nKESTREL_CLASSPATH_END\n";
    let runner = Arc::new(RoutingCommandRunner::new(HashMap::from([(
        "kestrelRecoverClasspath".to_string(),
        output(0, recovered),
    )])));
    let gradle = GradleBuild::with_runner(GradleConfig::default(), runner);

    let result = gradle
        .recover_classpath(tmp.path(), ":", &["compileClasspath".to_string()])
        .expect("recover");
    assert!(result.is_empty());
}

#[test]
fn failed_build_reports_command_and_output() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(RoutingCommandRunner::new(HashMap::from([(
        "kestrelPrintModel".to_string(),
        CommandOutput {
            status: exit_status(1),
            stdout: String::new(),
            stderr: "Could not resolve plugin com.android.application".to_string(),
        },
    )])));
    let gradle = GradleBuild::with_runner(GradleConfig::default(), runner);

    let err = gradle.projects(tmp.path(), "debug").unwrap_err();
    match err {
        BuildError::CommandFailed {
            tool,
            command,
            stderr,
            ..
        } => {
            assert_eq!(tool, "gradle");
            assert!(command.ends_with("kestrelPrintModel"), "{command}");
            assert!(stderr.contains("com.android.application"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn spawn_failure_surfaces_as_io_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let runner = Arc::new(RoutingCommandRunner::new(HashMap::new()));
    let gradle = GradleBuild::with_runner(GradleConfig::default(), runner);

    let err = gradle.projects(tmp.path(), "debug").unwrap_err();
    assert!(matches!(err, BuildError::Io(_)), "{err:?}");
}
