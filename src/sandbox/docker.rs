//! Engine client backed by the `docker` command line tool.
//!
//! Each [`EngineClient`] call maps onto one `docker` invocation against the
//! configured control endpoint. The CLI has no separate "create exec" step, so
//! exec contexts are recorded locally by [`DockerCli::create_exec`], run by
//! [`DockerCli::start_exec`] via `docker exec`, and their exit code is kept until
//! [`DockerCli::inspect_exec`] reads it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use tracing::{debug, instrument, trace};
use uuid::Uuid;

use super::SandboxSpec;
use super::engine::{
    EngineClient, ExecId, ExecRequest, ExecStreams, SandboxHandle, StreamMode,
};
use crate::error::EngineError;

/// Exit code `docker exec` uses for its own failures.
const EXEC_CLI_FAILURE: i32 = 125;

/// Prefix of errors the daemon returns through the CLI.
const DAEMON_ERROR_PREFIX: &str = "Error response from daemon:";

/// Control endpoint of a local Docker daemon.
pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/docker.sock";

/// Where and how to reach the engine.
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// `docker` executable to run.
    pub binary: PathBuf,
    /// Daemon endpoint passed as `--host`.
    pub endpoint: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("docker"),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl DockerConfig {
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug)]
struct ExecRecord {
    sandbox: SandboxHandle,
    request: ExecRequest,
    exit_code: Option<i32>,
}

/// Docker engine client.
#[derive(Debug)]
pub struct DockerCli {
    config: DockerConfig,
    execs: HashMap<ExecId, ExecRecord>,
}

impl DockerCli {
    /// Creates a client without contacting the daemon.
    #[must_use]
    pub fn new(config: DockerConfig) -> Self {
        Self {
            config,
            execs: HashMap::new(),
        }
    }

    /// Creates a client and checks that the daemon answers.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Unavailable` if the server version cannot be read.
    #[instrument(skip(config), fields(endpoint = %config.endpoint))]
    pub fn connect(config: DockerConfig) -> Result<Self, EngineError> {
        let client = Self::new(config);
        let version = client
            .run(
                "version",
                &["version", "--format", "{{.Server.Version}}"],
            )
            .map_err(|e| EngineError::Unavailable {
                message: e.to_string(),
            })?;
        debug!(server_version = %version.trim(), "Docker connection successful");
        Ok(client)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--host").arg(&self.config.endpoint);
        cmd
    }

    /// Runs a docker subcommand to completion and returns its stdout.
    fn run(&self, operation: &'static str, args: &[&str]) -> Result<String, EngineError> {
        let mut cmd = self.command();
        cmd.args(args).stdin(Stdio::null());
        trace!(?cmd, "Invoking docker");

        let output = cmd
            .output()
            .map_err(|source| EngineError::Spawn { operation, source })?;
        check_output(operation, &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn exec_args(sandbox: &SandboxHandle, request: &ExecRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if request.tty {
            args.push("--tty".to_string());
        }
        args.push(sandbox.to_string());
        args.extend(request.command.iter().cloned());
        args
    }
}

fn check_output(operation: &'static str, output: &Output) -> Result<(), EngineError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(EngineError::Rejected {
        operation,
        message: if stderr.is_empty() {
            format!("docker exited with {}", output.status)
        } else {
            stderr
        },
    })
}

/// Tells a failure of `docker exec` itself apart from the exit code of the
/// command it ran. `stderr` is empty when it was not captured.
fn daemon_failure(code: Option<i32>, stderr: &[u8]) -> Option<String> {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    match code {
        Some(0) => None,
        _ if stderr.starts_with(DAEMON_ERROR_PREFIX) => Some(stderr.to_string()),
        Some(EXEC_CLI_FAILURE) if stderr.is_empty() => {
            Some(format!("docker exec exited with {EXEC_CLI_FAILURE}"))
        }
        Some(EXEC_CLI_FAILURE) => Some(stderr.to_string()),
        _ => None,
    }
}

/// `docker stop --time` takes whole seconds. Partial seconds round up.
fn stop_timeout_secs(grace: Duration) -> u64 {
    grace.as_secs() + u64::from(grace.subsec_nanos() > 0)
}

/// Builds the `docker create` arguments for `spec`.
pub(crate) fn create_args(spec: &SandboxSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--interactive".to_string(),
        "--tty".to_string(),
        "--restart".to_string(),
        "no".to_string(),
    ];

    if let Some(name) = &spec.name {
        args.push("--name".to_string());
        args.push(name.clone());
    }
    if let Some(dir) = &spec.working_dir {
        args.push("--workdir".to_string());
        args.push(dir.display().to_string());
    }
    for entry in &spec.env {
        args.push("--env".to_string());
        args.push(entry.clone());
    }
    for mount in &spec.mounts {
        args.push("--volume".to_string());
        args.push(mount.to_string());
    }

    args.push(spec.image.clone());
    args.extend(spec.entry_command.iter().cloned());
    args
}

impl EngineClient for DockerCli {
    #[instrument(skip(self, spec), fields(image = %spec.image))]
    fn create_instance(&mut self, spec: &SandboxSpec) -> Result<SandboxHandle, EngineError> {
        let args = create_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run("create", &args)?;

        let id = stdout.trim();
        if id.is_empty() {
            return Err(EngineError::MalformedResponse {
                operation: "create",
                output: stdout,
            });
        }
        Ok(SandboxHandle::new(id))
    }

    fn start_instance(&mut self, handle: &SandboxHandle) -> Result<(), EngineError> {
        self.run("start", &["start", handle.as_str()]).map(drop)
    }

    fn stop_instance(
        &mut self,
        handle: &SandboxHandle,
        grace: Duration,
    ) -> Result<(), EngineError> {
        let seconds = stop_timeout_secs(grace).to_string();
        self.run("stop", &["stop", "--time", &seconds, handle.as_str()])
            .map(drop)
    }

    fn wait_instance(&mut self, handle: &SandboxHandle) -> Result<i32, EngineError> {
        let stdout = self.run("wait", &["wait", handle.as_str()])?;
        stdout
            .trim()
            .parse()
            .map_err(|_| EngineError::MalformedResponse {
                operation: "wait",
                output: stdout,
            })
    }

    fn remove_instance(&mut self, handle: &SandboxHandle) -> Result<(), EngineError> {
        self.run("remove", &["rm", "--force", "--volumes", handle.as_str()])
            .map(drop)
    }

    fn create_exec(
        &mut self,
        handle: &SandboxHandle,
        request: &ExecRequest,
    ) -> Result<ExecId, EngineError> {
        if request.command.is_empty() {
            return Err(EngineError::Rejected {
                operation: "create exec",
                message: "command cannot be empty".to_string(),
            });
        }

        let id = ExecId::new(Uuid::new_v4().simple().to_string());
        self.execs.insert(
            id.clone(),
            ExecRecord {
                sandbox: handle.clone(),
                request: request.clone(),
                exit_code: None,
            },
        );
        Ok(id)
    }

    #[instrument(skip(self, streams), fields(exec = %exec))]
    fn start_exec(&mut self, exec: &ExecId, streams: ExecStreams<'_>) -> Result<(), EngineError> {
        let record = self
            .execs
            .get(exec)
            .ok_or_else(|| EngineError::UnknownExec(exec.to_string()))?;

        let mut cmd = self.command();
        cmd.args(Self::exec_args(&record.sandbox, &record.request))
            .stdin(Stdio::null());
        trace!(?cmd, mode = ?record.request.mode, "Starting exec");

        let (status, failure) = match streams {
            ExecStreams::Buffered { stdout, stderr } => {
                let output = cmd.output().map_err(|source| EngineError::Spawn {
                    operation: "start exec",
                    source,
                })?;
                let failure = daemon_failure(output.status.code(), &output.stderr);
                if failure.is_none() {
                    stdout.extend_from_slice(&output.stdout);
                    stderr.extend_from_slice(&output.stderr);
                }
                (output.status, failure)
            }
            ExecStreams::Terminal => {
                if record.request.mode == StreamMode::Captured {
                    debug!("Captured exec started with terminal streams");
                }
                let status = cmd
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit())
                    .status()
                    .map_err(|source| EngineError::Spawn {
                        operation: "start exec",
                        source,
                    })?;
                (status, daemon_failure(status.code(), &[]))
            }
        };

        if let Some(message) = failure {
            self.execs.remove(exec);
            return Err(EngineError::Rejected {
                operation: "start exec",
                message,
            });
        }
        if let Some(record) = self.execs.get_mut(exec) {
            record.exit_code = status.code();
        }
        Ok(())
    }

    /// Returns the recorded exit code and forgets the exec. An exec that has
    /// not finished stays recorded.
    fn inspect_exec(&mut self, exec: &ExecId) -> Result<i32, EngineError> {
        let record = self
            .execs
            .get(exec)
            .ok_or_else(|| EngineError::UnknownExec(exec.to_string()))?;
        let code = record
            .exit_code
            .ok_or_else(|| EngineError::ExecNotFinished(exec.to_string()))?;
        self.execs.remove(exec);
        Ok(code)
    }

    fn attach_instance(
        &mut self,
        handle: &SandboxHandle,
        streams: ExecStreams<'_>,
    ) -> Result<(), EngineError> {
        let mut cmd = self.command();
        cmd.args(["attach", "--no-stdin", handle.as_str()]);

        match streams {
            ExecStreams::Buffered { stdout, stderr } => {
                let output = cmd
                    .stdin(Stdio::null())
                    .output()
                    .map_err(|source| EngineError::Spawn {
                        operation: "attach",
                        source,
                    })?;
                check_output("attach", &output)?;
                stdout.extend_from_slice(&output.stdout);
                stderr.extend_from_slice(&output.stderr);
                Ok(())
            }
            ExecStreams::Terminal => {
                let status = cmd.status().map_err(|source| EngineError::Spawn {
                    operation: "attach",
                    source,
                })?;
                if status.success() {
                    Ok(())
                } else {
                    Err(EngineError::Rejected {
                        operation: "attach",
                        message: format!("docker exited with {status}"),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::BindMount;

    #[test]
    fn test_create_args() {
        let spec = SandboxSpec::new("registry.local/build:1")
            .with_name("job-7")
            .with_working_dir("/jenkins/workspace/job")
            .with_envs(["USER=jenkins", "LANG=C.UTF-8"])
            .with_mount(BindMount::same_path("/jenkins/workspace/job"))
            .with_mount(BindMount::new("/tmp/stage", "/tmp"));

        assert_eq!(
            create_args(&spec),
            vec![
                "create",
                "--interactive",
                "--tty",
                "--restart",
                "no",
                "--name",
                "job-7",
                "--workdir",
                "/jenkins/workspace/job",
                "--env",
                "USER=jenkins",
                "--env",
                "LANG=C.UTF-8",
                "--volume",
                "/jenkins/workspace/job:/jenkins/workspace/job",
                "--volume",
                "/tmp/stage:/tmp",
                "registry.local/build:1",
                "cat",
            ]
        );
    }

    #[test]
    fn test_exec_args_tty() {
        let sandbox = SandboxHandle::new("c1");
        let plain = ExecRequest::captured(vec!["id".into(), "-u".into()]);
        let tty = ExecRequest::terminal(vec!["bash".into()], true);

        assert_eq!(DockerCli::exec_args(&sandbox, &plain), vec!["exec", "c1", "id", "-u"]);
        assert_eq!(DockerCli::exec_args(&sandbox, &tty), vec!["exec", "--tty", "c1", "bash"]);
    }

    #[test]
    fn test_inspect_unknown_exec() {
        let mut client = DockerCli::new(DockerConfig::default());
        assert!(matches!(
            client.inspect_exec(&ExecId::new("missing")),
            Err(EngineError::UnknownExec(_))
        ));
    }

    #[test]
    fn test_inspect_before_start() {
        let mut client = DockerCli::new(DockerConfig::default());
        let exec = client
            .create_exec(
                &SandboxHandle::new("c1"),
                &ExecRequest::captured(vec!["true".into()]),
            )
            .unwrap();

        assert!(matches!(
            client.inspect_exec(&exec),
            Err(EngineError::ExecNotFinished(_))
        ));
        assert!(matches!(
            client.inspect_exec(&exec),
            Err(EngineError::ExecNotFinished(_))
        ));
    }

    #[test]
    fn test_empty_exec_rejected() {
        let mut client = DockerCli::new(DockerConfig::default());
        let result = client.create_exec(&SandboxHandle::new("c1"), &ExecRequest::captured(vec![]));
        assert!(matches!(result, Err(EngineError::Rejected { .. })));
    }

    #[test]
    fn test_daemon_failure() {
        let missing = b"Error response from daemon: No such container: c1\n";
        assert_eq!(
            daemon_failure(Some(1), missing).as_deref(),
            Some("Error response from daemon: No such container: c1")
        );
        assert_eq!(
            daemon_failure(Some(125), b"").as_deref(),
            Some("docker exec exited with 125")
        );
        assert!(daemon_failure(Some(125), b"unknown flag: --bogus").is_some());
        assert!(daemon_failure(None, missing).is_some());

        assert_eq!(daemon_failure(Some(0), b""), None);
        assert_eq!(daemon_failure(Some(0), missing), None);
        assert_eq!(daemon_failure(Some(2), b"getent: no such key"), None);
        assert_eq!(daemon_failure(Some(127), b"exec: \"getent\": not found"), None);
        assert_eq!(daemon_failure(None, b""), None);
    }

    #[test]
    fn test_stop_timeout_rounds_up() {
        assert_eq!(stop_timeout_secs(Duration::from_secs(2)), 2);
        assert_eq!(stop_timeout_secs(Duration::from_millis(1500)), 2);
        assert_eq!(stop_timeout_secs(Duration::from_millis(200)), 1);
        assert_eq!(stop_timeout_secs(Duration::from_nanos(1)), 1);
        assert_eq!(stop_timeout_secs(Duration::ZERO), 0);
    }

    /// A `docker` stand-in that runs `body` as a shell script.
    fn fake_docker(dir: &tempfile::TempDir, body: &str) -> DockerCli {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        DockerCli::new(DockerConfig::default().with_binary(path))
    }

    fn captured_exec(client: &mut DockerCli) -> ExecId {
        client
            .create_exec(
                &SandboxHandle::new("c1"),
                &ExecRequest::captured(vec!["getent".into(), "passwd".into(), "1001".into()]),
            )
            .unwrap()
    }

    #[test]
    fn test_start_exec_daemon_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = fake_docker(
            &dir,
            "echo 'Error response from daemon: No such container: c1' >&2\nexit 1",
        );
        let exec = captured_exec(&mut client);

        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        let result = client.start_exec(
            &exec,
            ExecStreams::Buffered {
                stdout: &mut stdout,
                stderr: &mut stderr,
            },
        );

        match result {
            Err(EngineError::Rejected { operation, message }) => {
                assert_eq!(operation, "start exec");
                assert!(message.contains("No such container"), "{message}");
            }
            other => panic!("expected rejected exec, got {other:?}"),
        }
        assert!(stderr.is_empty());
        assert!(matches!(
            client.inspect_exec(&exec),
            Err(EngineError::UnknownExec(_))
        ));
    }

    #[test]
    fn test_start_exec_cli_failure_on_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = fake_docker(&dir, "exit 125");
        let exec = client
            .create_exec(
                &SandboxHandle::new("c1"),
                &ExecRequest::terminal(vec!["bash".into()], false),
            )
            .unwrap();

        assert!(matches!(
            client.start_exec(&exec, ExecStreams::Terminal),
            Err(EngineError::Rejected { .. })
        ));
    }

    #[test]
    fn test_start_exec_command_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = fake_docker(&dir, "echo out\necho err >&2\nexit 3");
        let exec = captured_exec(&mut client);

        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        client
            .start_exec(
                &exec,
                ExecStreams::Buffered {
                    stdout: &mut stdout,
                    stderr: &mut stderr,
                },
            )
            .unwrap();

        assert_eq!(stdout, b"out\n");
        assert_eq!(stderr, b"err\n");
        assert_eq!(client.inspect_exec(&exec).unwrap(), 3);
        assert!(matches!(
            client.inspect_exec(&exec),
            Err(EngineError::UnknownExec(_))
        ));
        assert!(client.execs.is_empty());
    }

    #[test]
    fn test_connect_fails_without_binary() {
        let config = DockerConfig::default().with_binary("/nonexistent/docker-binary");
        assert!(matches!(
            DockerCli::connect(config),
            Err(EngineError::Unavailable { .. })
        ));
    }
}
