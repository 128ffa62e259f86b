//! Desired configuration for one sandbox instance.

use std::fmt;
use std::path::PathBuf;

/// Entry command used when none is configured.
///
/// `cat` on an open TTY blocks forever, keeping the sandbox alive until it is
/// stopped; all real work happens through exec contexts.
pub const DEFAULT_ENTRY_COMMAND: &str = "cat";

/// A host path bound into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Path on the host.
    pub host_path: PathBuf,
    /// Path inside the sandbox.
    pub sandbox_path: PathBuf,
}

impl BindMount {
    #[must_use]
    pub fn new(host_path: impl Into<PathBuf>, sandbox_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            sandbox_path: sandbox_path.into(),
        }
    }

    /// Binds a host path to the same location inside the sandbox.
    #[must_use]
    pub fn same_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            sandbox_path: path.clone(),
            host_path: path,
        }
    }
}

impl fmt::Display for BindMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.host_path.display(),
            self.sandbox_path.display()
        )
    }
}

/// Configuration for a sandbox instance.
///
/// Use the builder methods to customize the sandbox. The spec is handed to
/// [`SandboxContainer::create`](super::SandboxContainer::create) by reference
/// and is not modified afterwards.
///
/// # Example
///
/// ```
/// use jenkins_docker_wrapper::sandbox::{BindMount, SandboxSpec};
///
/// let spec = SandboxSpec::new("debian:bookworm")
///     .with_name("build-42")
///     .with_working_dir("/jenkins/workspace/job")
///     .with_mount(BindMount::same_path("/jenkins/workspace/job"))
///     .with_env("LANG=C.UTF-8");
///
/// assert_eq!(spec.entry_command, vec!["cat".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Image reference the sandbox is created from.
    pub image: String,

    /// Command run as the sandbox's entry process.
    pub entry_command: Vec<String>,

    /// Ordered bind mounts.
    pub mounts: Vec<BindMount>,

    /// Working directory for the entry process and exec contexts.
    pub working_dir: Option<PathBuf>,

    /// Environment as ordered `KEY=VALUE` entries.
    pub env: Vec<String>,

    /// Human-readable name; the engine picks one when absent.
    pub name: Option<String>,
}

impl SandboxSpec {
    /// Creates a spec for the given image with the default entry command.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            entry_command: vec![DEFAULT_ENTRY_COMMAND.to_string()],
            mounts: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            name: None,
        }
    }

    /// Replaces the entry command.
    #[must_use]
    pub fn with_entry_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a bind mount.
    #[must_use]
    pub fn with_mount(mut self, mount: BindMount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Appends one `KEY=VALUE` environment entry.
    #[must_use]
    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    /// Appends environment entries, keeping their order.
    #[must_use]
    pub fn with_envs<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Sets the sandbox name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
