//! Fixed parameters of a job run and the `projekt.conf` reader.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::bootstrap::OwnershipTarget;
use crate::environment::EnvironmentPolicy;
use crate::error::ConfigError;
use crate::sandbox::{DEFAULT_ENTRY_COMMAND, DEFAULT_STOP_GRACE};

/// Name of the per-project configuration file inside the workspace.
pub const PROJECT_CONFIG_FILE: &str = "projekt.conf";

/// Key naming the image in `projekt.conf`.
pub const IMAGE_NAME_KEY: &str = "IMAGE_NAME";

/// Configuration for one job run.
///
/// # Example
///
/// ```
/// use jenkins_docker_wrapper::job::JobConfig;
/// use std::time::Duration;
///
/// let config = JobConfig::default()
///     .with_user("builder")
///     .with_home("/home/builder")
///     .with_stop_grace(Duration::from_secs(5))
///     .without_known_hosts();
///
/// assert_eq!(config.workspace_root.to_str(), Some("/home/builder/workspace"));
/// ```
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Build user, recreated inside the sandbox with the host's ids.
    pub user: String,

    /// Home directory of the build user inside the sandbox.
    pub home: PathBuf,

    /// Root every confined environment path must stay under.
    pub workspace_root: PathBuf,

    /// Shell the forwarded arguments are handed to.
    pub shell: String,

    /// Process keeping the sandbox alive between execs.
    pub entry_command: Vec<String>,

    /// Grace period before the sandbox is killed on stop.
    pub stop_grace: Duration,

    /// Directory handed to the build user at the end of bootstrap.
    pub ownership: OwnershipTarget,

    /// Host file installed as the sandbox user's `known_hosts`. The job
    /// fails if it is set and cannot be copied.
    pub known_hosts: Option<PathBuf>,

    /// Where the staging directory is mounted inside the sandbox.
    pub staging_mount: PathBuf,

    /// Parent of the staging directory on the host. `None` uses the system
    /// temporary directory.
    pub staging_parent: Option<PathBuf>,

    /// Environment policy table.
    pub policy: EnvironmentPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        let home = PathBuf::from("/jenkins");
        Self {
            user: String::from("jenkins"),
            workspace_root: home.join("workspace"),
            home,
            shell: String::from("bash"),
            entry_command: vec![DEFAULT_ENTRY_COMMAND.to_string()],
            stop_grace: DEFAULT_STOP_GRACE,
            ownership: OwnershipTarget::default(),
            known_hosts: std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".ssh").join("known_hosts")),
            staging_mount: PathBuf::from("/tmp"),
            staging_parent: None,
            policy: EnvironmentPolicy::jenkins(),
        }
    }
}

impl JobConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the home directory and moves the workspace root to
    /// `<home>/workspace`.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self.workspace_root = self.home.join("workspace");
        self
    }

    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    #[must_use]
    pub fn with_ownership(mut self, ownership: OwnershipTarget) -> Self {
        self.ownership = ownership;
        self
    }

    #[must_use]
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts = Some(path.into());
        self
    }

    #[must_use]
    pub fn without_known_hosts(mut self) -> Self {
        self.known_hosts = None;
        self
    }

    #[must_use]
    pub fn with_staging_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.staging_parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: EnvironmentPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Extracts `IMAGE_NAME` from `projekt.conf` contents.
///
/// Lines are `KEY=VALUE`; blank lines and `#` comments are skipped, and one
/// pair of surrounding quotes is stripped from the value. A later assignment
/// overrides an earlier one.
#[must_use]
pub fn parse_image_name(contents: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| key.trim() == IMAGE_NAME_KEY)
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|value| !value.is_empty())
        .last()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Reads the image name from `<workspace>/projekt.conf`.
///
/// # Errors
///
/// Returns `ConfigError::ProjectConfig` if the file cannot be read.
pub fn read_image_name(workspace: &Path) -> Result<Option<String>, ConfigError> {
    let path = workspace.join(PROJECT_CONFIG_FILE);
    debug!(path = %path.display(), "Reading project configuration");
    let contents =
        fs::read_to_string(&path).map_err(|source| ConfigError::ProjectConfig { path, source })?;
    Ok(parse_image_name(&contents))
}
