//! Lifecycle wrapper around one sandbox instance.
//!
//! The wrapper owns the state machine
//!
//! ```text
//! Unprovisioned -> Created -> Running -> Stopped -> Removed
//!                                 \-> exec* / attach
//! ```
//!
//! plus a terminal `Failed` state entered when the engine rejects a call that
//! leaves the instance in an unknown condition. Operations issued in the wrong
//! state fail with [`EngineError::InvalidState`] without reaching the engine.
//!
//! # Captured vs. attached execution
//!
//! [`SandboxContainer::exec_captured`] buffers stdout/stderr in memory and has
//! no TTY; it is what the bootstrap sequence uses. [`SandboxContainer::exec_attached`]
//! wires the command straight to this process's standard streams so terminal
//! control sequences pass through untouched. Both read the exit code by
//! inspecting the exec context after it finished; an inspect failure yields
//! [`ExecStatus::Indeterminate`] instead of an error.
//!
//! # Release
//!
//! [`SandboxContainer::teardown`] stops and removes the instance on a
//! best-effort basis and runs at most once. `Drop` calls it as well, so an
//! early return or a panic between `create` and the explicit teardown still
//! releases the sandbox.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use super::SandboxSpec;
use super::engine::{EngineClient, ExecId, ExecRequest, ExecStreams, SandboxHandle};
use crate::error::EngineError;

/// Grace period between the stop request and a forced kill.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Exit status of a command run inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// The command finished and reported this exit code.
    Exited(i32),
    /// The exit code could not be read back from the engine.
    Indeterminate,
}

impl ExecStatus {
    /// Raw code reported for [`ExecStatus::Indeterminate`].
    pub const INDETERMINATE_CODE: i32 = -1;

    /// Returns the integer exit code, `-1` when indeterminate.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Indeterminate => Self::INDETERMINATE_CODE,
        }
    }

    #[must_use]
    pub fn success(self) -> bool {
        self == Self::Exited(0)
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "{code}"),
            Self::Indeterminate => write!(f, "{} (indeterminate)", Self::INDETERMINATE_CODE),
        }
    }
}

/// Output from a command executed in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit status of the command.
    pub status: ExecStatus,
}

impl CommandOutput {
    /// Returns `true` if the command exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Integer exit code, `-1` when it could not be determined.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.code()
    }
}

/// Lifecycle state of the wrapped sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Unprovisioned,
    Created,
    Running,
    Stopped,
    Removed,
    Failed,
}

impl SandboxState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unprovisioned => "unprovisioned",
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sandbox instance and the engine client that drives it.
///
/// A wrapper manages exactly one instance: the handle returned by
/// [`create`](Self::create) is kept internally and is the only handle any
/// later operation uses.
///
/// # Example
///
/// ```no_run
/// use jenkins_docker_wrapper::sandbox::{DockerCli, SandboxContainer, SandboxSpec};
///
/// let engine = DockerCli::connect(Default::default()).unwrap();
/// let mut sandbox = SandboxContainer::new(engine);
///
/// sandbox.create(&SandboxSpec::new("debian:bookworm")).unwrap();
/// sandbox.start().unwrap();
///
/// let output = sandbox.exec_captured(vec!["id".into(), "-u".into()]).unwrap();
/// assert!(output.success());
///
/// sandbox.teardown();
/// ```
pub struct SandboxContainer<E: EngineClient> {
    engine: E,
    handle: Option<SandboxHandle>,
    state: SandboxState,
    stop_grace: Duration,
    remove_on_teardown: bool,
    torn_down: bool,
}

impl<E: EngineClient> SandboxContainer<E> {
    /// Creates an unprovisioned wrapper around `engine`.
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            handle: None,
            state: SandboxState::Unprovisioned,
            stop_grace: DEFAULT_STOP_GRACE,
            remove_on_teardown: true,
            torn_down: false,
        }
    }

    /// Sets the grace period used by [`stop`](Self::stop).
    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Keeps the stopped instance instead of removing it during teardown.
    #[must_use]
    pub fn keep_after_teardown(mut self, keep: bool) -> Self {
        self.remove_on_teardown = !keep;
        self
    }

    #[must_use]
    pub fn state(&self) -> SandboxState {
        self.state
    }

    #[must_use]
    pub fn handle(&self) -> Option<&SandboxHandle> {
        self.handle.as_ref()
    }

    /// Returns a reference to the engine client.
    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn label(&self) -> &str {
        self.handle.as_ref().map_or("-", SandboxHandle::as_str)
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[SandboxState],
    ) -> Result<SandboxHandle, EngineError> {
        match &self.handle {
            Some(handle) if allowed.contains(&self.state) => Ok(handle.clone()),
            _ => Err(EngineError::InvalidState {
                operation,
                state: self.state.as_str(),
            }),
        }
    }

    /// Requests a new sandbox instance for `spec`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidState` if this wrapper already provisioned
    /// an instance, or the engine's error if it rejects the spec (in which case
    /// the wrapper becomes `Failed`).
    #[instrument(skip(self, spec), fields(image = %spec.image))]
    pub fn create(&mut self, spec: &SandboxSpec) -> Result<SandboxHandle, EngineError> {
        if self.state != SandboxState::Unprovisioned {
            return Err(EngineError::InvalidState {
                operation: "create",
                state: self.state.as_str(),
            });
        }

        debug!(command = ?spec.entry_command, "Create options");
        match self.engine.create_instance(spec) {
            Ok(handle) => {
                debug!(sandbox = %handle, "Sandbox created");
                self.handle = Some(handle.clone());
                self.state = SandboxState::Created;
                Ok(handle)
            }
            Err(e) => {
                self.state = SandboxState::Failed;
                Err(e)
            }
        }
    }

    /// Starts the created instance.
    ///
    /// On failure the wrapper stays `Created` so it can still be removed.
    #[instrument(skip(self), fields(sandbox = %self.label()))]
    pub fn start(&mut self) -> Result<(), EngineError> {
        let handle = self.require("start", &[SandboxState::Created])?;
        self.engine.start_instance(&handle)?;
        self.state = SandboxState::Running;
        debug!("Sandbox running");
        Ok(())
    }

    fn inspect(&mut self, exec: &ExecId) -> ExecStatus {
        match self.engine.inspect_exec(exec) {
            Ok(code) => ExecStatus::Exited(code),
            Err(e) => {
                warn!(exec = %exec, error = %e, "Could not inspect exec, exit code unknown");
                ExecStatus::Indeterminate
            }
        }
    }

    /// Runs `command` with output buffered in memory and no TTY.
    ///
    /// Blocks until the command has finished, then inspects the exec context
    /// for its exit code.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the exec context cannot be created or
    /// started. A failed inspect is reported as [`ExecStatus::Indeterminate`].
    #[instrument(skip(self), fields(sandbox = %self.label()))]
    pub fn exec_captured(&mut self, command: Vec<String>) -> Result<CommandOutput, EngineError> {
        let handle = self.require("exec in", &[SandboxState::Running])?;
        let request = ExecRequest::captured(command);

        let exec = self.engine.create_exec(&handle, &request)?;
        trace!(exec = %exec, "Exec created");

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        self.engine.start_exec(
            &exec,
            ExecStreams::Buffered {
                stdout: &mut stdout,
                stderr: &mut stderr,
            },
        )?;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status: self.inspect(&exec),
        };
        debug!(
            ret_val = %output.status,
            stdout = %output.stdout,
            stderr = %output.stderr,
            "Command completed"
        );
        Ok(output)
    }

    /// Runs `command` attached to this process's stdout and stderr.
    ///
    /// With `tty` set the command gets a pseudo-terminal.
    #[instrument(skip(self), fields(sandbox = %self.label()))]
    pub fn exec_attached(
        &mut self,
        command: Vec<String>,
        tty: bool,
    ) -> Result<ExecStatus, EngineError> {
        let handle = self.require("exec in", &[SandboxState::Running])?;
        let request = ExecRequest::terminal(command, tty);

        let exec = self.engine.create_exec(&handle, &request)?;
        self.engine.start_exec(&exec, ExecStreams::Terminal)?;

        let status = self.inspect(&exec);
        debug!(ret_val = %status, "Attached command completed");
        Ok(status)
    }

    /// Attaches `streams` to the sandbox's entry process.
    #[instrument(skip(self, streams), fields(sandbox = %self.label()))]
    pub fn attach(&mut self, streams: ExecStreams<'_>) -> Result<(), EngineError> {
        let handle = self.require("attach to", &[SandboxState::Running])?;
        self.engine.attach_instance(&handle, streams)
    }

    /// Stops the running instance and waits for it to terminate.
    #[instrument(skip(self), fields(sandbox = %self.label(), grace_ms = %self.stop_grace.as_millis()))]
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let handle = self.require("stop", &[SandboxState::Running])?;

        if let Err(e) = self.engine.stop_instance(&handle, self.stop_grace) {
            self.state = SandboxState::Failed;
            return Err(e);
        }
        match self.engine.wait_instance(&handle) {
            Ok(code) => {
                debug!(exit_code = code, "Sandbox terminated");
                self.state = SandboxState::Stopped;
                Ok(())
            }
            Err(e) => {
                self.state = SandboxState::Failed;
                Err(e)
            }
        }
    }

    /// Deletes the instance.
    #[instrument(skip(self), fields(sandbox = %self.label()))]
    pub fn remove(&mut self) -> Result<(), EngineError> {
        let handle = self.require(
            "remove",
            &[
                SandboxState::Created,
                SandboxState::Stopped,
                SandboxState::Failed,
            ],
        )?;

        match self.engine.remove_instance(&handle) {
            Ok(()) => {
                debug!("Sandbox removed");
                self.state = SandboxState::Removed;
                Ok(())
            }
            Err(e) => {
                self.state = SandboxState::Failed;
                Err(e)
            }
        }
    }

    /// Stops and removes the instance, logging rather than returning errors.
    ///
    /// Runs at most once per wrapper; later calls (including the one from
    /// `Drop`) do nothing.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.handle.is_none() {
            trace!(state = %self.state, "Nothing to tear down");
            return;
        }

        if self.state == SandboxState::Running {
            if let Err(e) = self.stop() {
                warn!(sandbox = %self.label(), error = %e, "Failed to stop sandbox");
            }
        }

        if !self.remove_on_teardown {
            info!(sandbox = %self.label(), state = %self.state, "Keeping sandbox");
            return;
        }

        if self.state != SandboxState::Removed {
            if let Err(e) = self.remove() {
                warn!(sandbox = %self.label(), error = %e, "Failed to remove sandbox");
            }
        }
    }
}

impl<E: EngineClient> Drop for SandboxContainer<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<E: EngineClient> fmt::Debug for SandboxContainer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxContainer")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("stop_grace", &self.stop_grace)
            .field("remove_on_teardown", &self.remove_on_teardown)
            .finish()
    }
}
