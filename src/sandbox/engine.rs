//! The narrow engine surface the lifecycle wrapper depends on.
//!
//! Every call is a blocking round-trip to the engine's control endpoint. The
//! wrapper never issues two calls concurrently, so implementations need no
//! internal locking.

use std::fmt;
use std::time::Duration;

use super::SandboxSpec;
use crate::error::EngineError;

/// Engine-assigned identifier of one sandbox instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxHandle(String);

impl SandboxHandle {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an exec context inside a running sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecId(String);

impl ExecId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an exec context's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Output is collected into in-memory buffers.
    Captured,
    /// Output is connected to this process's standard streams.
    Terminal,
}

/// A command to run inside a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub mode: StreamMode,
    /// Allocate a pseudo-terminal for the command.
    pub tty: bool,
}

impl ExecRequest {
    /// Request for a buffered, non-interactive command.
    #[must_use]
    pub fn captured(command: Vec<String>) -> Self {
        Self {
            command,
            mode: StreamMode::Captured,
            tty: false,
        }
    }

    /// Request for a command wired to the caller's terminal.
    #[must_use]
    pub fn terminal(command: Vec<String>, tty: bool) -> Self {
        Self {
            command,
            mode: StreamMode::Terminal,
            tty,
        }
    }
}

/// Stream wiring handed to `start_exec` and `attach_instance`.
#[derive(Debug)]
pub enum ExecStreams<'a> {
    /// Write stdout and stderr into the given buffers.
    Buffered {
        stdout: &'a mut Vec<u8>,
        stderr: &'a mut Vec<u8>,
    },
    /// Inherit this process's standard streams.
    Terminal,
}

/// Sandbox engine client capability.
///
/// This is the complete engine surface used by
/// [`SandboxContainer`](super::SandboxContainer); the production
/// implementation is [`DockerCli`](super::DockerCli).
pub trait EngineClient {
    /// Creates a sandbox instance from `spec` with a "never restart" policy.
    fn create_instance(&mut self, spec: &SandboxSpec) -> Result<SandboxHandle, EngineError>;

    /// Starts a created instance.
    fn start_instance(&mut self, handle: &SandboxHandle) -> Result<(), EngineError>;

    /// Requests a graceful stop, killing the instance after `grace`.
    fn stop_instance(&mut self, handle: &SandboxHandle, grace: Duration)
    -> Result<(), EngineError>;

    /// Blocks until the instance has terminated and returns its exit code.
    fn wait_instance(&mut self, handle: &SandboxHandle) -> Result<i32, EngineError>;

    /// Deletes the instance and its resources.
    fn remove_instance(&mut self, handle: &SandboxHandle) -> Result<(), EngineError>;

    /// Creates an exec context for `request` inside a running instance.
    fn create_exec(
        &mut self,
        handle: &SandboxHandle,
        request: &ExecRequest,
    ) -> Result<ExecId, EngineError>;

    /// Runs an exec context in the foreground, returning once it has finished.
    fn start_exec(&mut self, exec: &ExecId, streams: ExecStreams<'_>) -> Result<(), EngineError>;

    /// Returns the exit code of a finished exec context.
    fn inspect_exec(&mut self, exec: &ExecId) -> Result<i32, EngineError>;

    /// Attaches to the instance's entry process until it detaches or exits.
    fn attach_instance(
        &mut self,
        handle: &SandboxHandle,
        streams: ExecStreams<'_>,
    ) -> Result<(), EngineError>;
}
