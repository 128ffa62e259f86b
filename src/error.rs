//! Error types for the Jenkins Docker wrapper.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::sandbox::ExecStatus;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid command line or job configuration
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    /// Environment entry rejected by the sanitization policy
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    /// Host identity lookup failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Identity(#[from] IdentityError),

    /// File staging failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Staging(#[from] StagingError),

    /// Sandbox engine rejected a lifecycle call
    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),

    /// Sandbox bootstrap did not complete
    #[error(transparent)]
    #[diagnostic(transparent)]
    Bootstrap(#[from] BootstrapError),
}

/// Errors in the command line or the job configuration.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// Own arguments could not be parsed
    #[error("Invalid arguments: {0}")]
    #[diagnostic(code(wrapper::config::arguments))]
    Arguments(#[from] clap::Error),

    /// Neither `--image_name` nor a usable projekt.conf named an image
    #[error("No docker image given")]
    #[diagnostic(
        code(wrapper::config::missing_image),
        help("Pass --image_name <name>, or --projekt_conf with IMAGE_NAME set in projekt.conf")
    )]
    MissingImage,

    /// The environment did not confirm a workspace to mount
    #[error("No workspace path found in the environment")]
    #[diagnostic(
        code(wrapper::config::missing_workspace),
        help("Jenkins sets WORKSPACE for every build step; run the wrapper from a job")
    )]
    MissingWorkspace,

    /// projekt.conf could not be read
    #[error("Failed to read project configuration {}", path.display())]
    #[diagnostic(code(wrapper::config::projekt_conf))]
    ProjectConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An environment entry failed a policy check.
///
/// Any of these aborts the whole run before a sandbox is created.
#[derive(Error, Debug, Diagnostic)]
pub enum ValidationError {
    /// Identity variable does not name the configured user
    #[error("Invalid user environment '{found}', expected to be '{expected}'")]
    #[diagnostic(code(wrapper::env::identity))]
    IdentityMismatch {
        key: String,
        found: String,
        expected: String,
    },

    /// Path variable is relative
    #[error("Invalid path in {key} '{value}', expected to be absolute path")]
    #[diagnostic(code(wrapper::env::not_absolute))]
    NotAbsolute { key: String, value: String },

    /// Path variable escapes the confinement root
    #[error("Invalid path in {key} '{}', expected to be within {}", path.display(), root.display())]
    #[diagnostic(
        code(wrapper::env::outside_root),
        help("Paths are normalized lexically before the check; '..' cannot leave the root")
    )]
    OutsideRoot {
        key: String,
        path: PathBuf,
        root: PathBuf,
    },
}

/// Errors resolving the build identity on the host.
#[derive(Error, Debug, Diagnostic)]
pub enum IdentityError {
    #[error("User '{0}' does not exist on this host")]
    #[diagnostic(code(wrapper::identity::unknown_user))]
    UnknownUser(String),

    #[error("Group {0} does not exist on this host")]
    #[diagnostic(code(wrapper::identity::unknown_group))]
    UnknownGroup(u32),

    #[error("Failed to query the identity database: {context}")]
    #[diagnostic(code(wrapper::identity::lookup))]
    Lookup {
        context: String,
        #[source]
        source: nix::Error,
    },
}

/// Errors preparing the staging directory.
#[derive(Error, Debug, Diagnostic)]
pub enum StagingError {
    #[error("Failed to {context}")]
    #[diagnostic(code(wrapper::staging::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a regular file", path.display())]
    #[diagnostic(code(wrapper::staging::not_regular))]
    NotRegularFile { path: PathBuf },
}

/// Errors reported by the sandbox engine or the lifecycle wrapper.
#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    /// The engine control endpoint did not answer
    #[error("Docker connection not successful: {message}")]
    #[diagnostic(
        code(wrapper::engine::unavailable),
        help("Check that the Docker daemon is running and the socket is accessible")
    )]
    Unavailable { message: String },

    /// The engine client could not be spawned
    #[error("Failed to run engine client for {operation}")]
    #[diagnostic(code(wrapper::engine::spawn))]
    Spawn {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The engine refused the request
    #[error("Docker error during {operation}: {message}")]
    #[diagnostic(code(wrapper::engine::rejected))]
    Rejected {
        operation: &'static str,
        message: String,
    },

    /// The engine answered with something we could not interpret
    #[error("Unexpected engine response during {operation}: '{output}'")]
    #[diagnostic(code(wrapper::engine::malformed))]
    MalformedResponse {
        operation: &'static str,
        output: String,
    },

    /// Exec id was never created on this client
    #[error("Unknown exec instance '{0}'")]
    #[diagnostic(code(wrapper::engine::unknown_exec))]
    UnknownExec(String),

    /// Exec exists but has no recorded exit code
    #[error("Exit code of exec instance '{0}' is not available")]
    #[diagnostic(code(wrapper::engine::exec_pending))]
    ExecNotFinished(String),

    /// Lifecycle operation issued in the wrong state
    #[error("Cannot {operation} a sandbox in state {state}")]
    #[diagnostic(code(wrapper::engine::invalid_state))]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

/// Errors raised while bootstrapping the sandbox identity.
#[derive(Error, Debug, Diagnostic)]
pub enum BootstrapError {
    /// A step exited with a different code than required
    #[error("expected ret_val is {expected} but received {actual} command {command:?}")]
    #[diagnostic(code(wrapper::bootstrap::exit_code))]
    UnexpectedExitCode {
        command: Vec<String>,
        expected: i32,
        actual: ExecStatus,
        stderr: String,
    },

    /// The engine failed while running a step
    #[error("Bootstrap command {command:?} could not be executed")]
    #[diagnostic(code(wrapper::bootstrap::engine))]
    Engine {
        command: Vec<String>,
        #[source]
        source: EngineError,
    },
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
