//! Jenkins Docker Wrapper - run Jenkins build steps in disposable containers.
//!
//! Each invocation provisions one sandbox for one build step:
//!
//! 1. the invoking environment is filtered through a policy table
//!    ([`environment`]), rejecting foreign users and paths that escape the
//!    workspace root
//! 2. the SSH agent socket, the build script and `known_hosts` are staged in a
//!    private directory mounted at `/tmp` ([`staging`])
//! 3. a container is created and started ([`sandbox`])
//! 4. the build user is recreated inside it with the host's uid and gid
//!    ([`identity`], [`bootstrap`])
//! 5. the build step runs as that user, attached to the caller's terminal
//! 6. the container is stopped and removed, on every exit path
//!
//! # Example
//!
//! ```no_run
//! use jenkins_docker_wrapper::cli;
//! use jenkins_docker_wrapper::identity::HostIdentityResolver;
//! use jenkins_docker_wrapper::job::JobRunner;
//! use jenkins_docker_wrapper::sandbox::{DockerCli, DockerConfig};
//!
//! fn main() -> miette::Result<()> {
//!     let invocation = cli::parse(["jenkins_docker_wrapper", "-i", "debian", "--", "/tmp/build.sh"])?;
//!     let engine = DockerCli::connect(DockerConfig::default())?;
//!
//!     let env = std::env::vars().map(|(k, v)| format!("{k}={v}"));
//!     let status = JobRunner::new(engine, HostIdentityResolver).run(&invocation, env)?;
//!
//!     std::process::exit(status.code());
//! }
//! ```

pub mod bootstrap;
pub mod cli;
pub mod environment;
pub mod error;
pub mod identity;
pub mod job;
pub mod sandbox;
pub mod staging;

// Re-export commonly used types
pub use error::{Error, Result};
pub use job::{JobConfig, JobRunner};
pub use sandbox::{CommandOutput, ExecStatus, SandboxContainer, SandboxSpec};
