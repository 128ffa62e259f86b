//! Sandbox lifecycle on top of a container engine.
//!
//! [`SandboxContainer`] drives one container through create, start, exec,
//! stop and remove using any [`EngineClient`]; [`DockerCli`] is the client
//! used in production.
//!
//! # Example
//!
//! ```no_run
//! use jenkins_docker_wrapper::sandbox::{DockerCli, DockerConfig, SandboxContainer, SandboxSpec};
//!
//! let engine = DockerCli::connect(DockerConfig::default()).unwrap();
//! let mut sandbox = SandboxContainer::new(engine);
//!
//! sandbox.create(&SandboxSpec::new("debian:bookworm")).unwrap();
//! sandbox.start().unwrap();
//!
//! let output = sandbox.exec_captured(vec!["echo".into(), "hello".into()]).unwrap();
//! assert_eq!(output.stdout.trim(), "hello");
//! ```

mod container;
mod docker;
mod engine;
mod spec;

pub use container::{
    CommandOutput, DEFAULT_STOP_GRACE, ExecStatus, SandboxContainer, SandboxState,
};
pub use docker::{DEFAULT_ENDPOINT, DockerCli, DockerConfig};
pub use engine::{
    EngineClient, ExecId, ExecRequest, ExecStreams, SandboxHandle, StreamMode,
};
pub use spec::{BindMount, DEFAULT_ENTRY_COMMAND, SandboxSpec};
