//! Identity bootstrap inside a freshly started sandbox.
//!
//! Images ship with their own `/etc/passwd` and `/etc/group`; the build user
//! has to be recreated with the host's numeric ids before the payload runs.
//! The sequence is fixed and strictly ordered:
//!
//! 1. delete every user holding the target uid
//! 2. delete any user with the target name
//! 3. delete every group holding the target gid
//! 4. delete any group with the target name
//! 5. create the group
//! 6. create the user with its home directory
//! 7. reset `/etc/sudoers` to a single rule for root
//! 8. create the trust directory (`<home>/.ssh`)
//! 9. move staged trust files into it
//! 10. hand the home (or trust) directory to the user
//!
//! Steps 1-4 only delete when the `getent` query succeeds. Every command that
//! changes state must exit with 0; the first one that does not aborts the
//! sequence.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::error::{BootstrapError, EngineError};
use crate::identity::Identity;
use crate::sandbox::{CommandOutput, EngineClient, ExecStatus, SandboxContainer};

/// Policy written to `/etc/sudoers`.
pub const SUDOERS_RULE: &str = "root ALL=(ALL:ALL) ALL";

/// Directory whose ownership is reset in the last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnershipTarget {
    /// The whole home directory.
    #[default]
    Home,
    /// Only the trust directory.
    TrustDir,
}

/// Everything the bootstrap sequence needs to know.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub identity: Identity,
    /// Home directory of the user inside the sandbox.
    pub home: PathBuf,
    /// Sandbox paths of staged trust files, moved into the trust directory.
    pub trust_files: Vec<PathBuf>,
    pub ownership: OwnershipTarget,
}

impl BootstrapPlan {
    #[must_use]
    pub fn new(identity: Identity, home: impl Into<PathBuf>) -> Self {
        Self {
            identity,
            home: home.into(),
            trust_files: Vec::new(),
            ownership: OwnershipTarget::default(),
        }
    }

    #[must_use]
    pub fn with_trust_file(mut self, sandbox_path: impl Into<PathBuf>) -> Self {
        self.trust_files.push(sandbox_path.into());
        self
    }

    #[must_use]
    pub fn with_ownership(mut self, ownership: OwnershipTarget) -> Self {
        self.ownership = ownership;
        self
    }

    /// `<home>/.ssh`
    #[must_use]
    pub fn trust_dir(&self) -> PathBuf {
        self.home.join(".ssh")
    }

    fn ownership_path(&self) -> PathBuf {
        match self.ownership {
            OwnershipTarget::Home => self.home.clone(),
            OwnershipTarget::TrustDir => self.trust_dir(),
        }
    }
}

macro_rules! argv {
    ($($part:expr),* $(,)?) => {
        vec![$(String::from($part)),*]
    };
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Runs the bootstrap sequence through a sandbox's captured exec path.
pub struct BootstrapSequencer<'a, E: EngineClient> {
    sandbox: &'a mut SandboxContainer<E>,
}

impl<'a, E: EngineClient> BootstrapSequencer<'a, E> {
    #[must_use]
    pub fn new(sandbox: &'a mut SandboxContainer<E>) -> Self {
        Self { sandbox }
    }

    fn run(&mut self, command: Vec<String>) -> Result<CommandOutput, BootstrapError> {
        self.sandbox
            .exec_captured(command.clone())
            .map_err(|source: EngineError| BootstrapError::Engine { command, source })
    }

    /// Runs `command` and requires exit code `expected`.
    pub fn run_expect(
        &mut self,
        command: Vec<String>,
        expected: i32,
    ) -> Result<CommandOutput, BootstrapError> {
        let output = self.run(command.clone())?;
        if output.status != ExecStatus::Exited(expected) {
            warn!(
                ?command,
                expected,
                ret_val = %output.status,
                stderr = %output.stderr,
                "Unexpected exit code"
            );
            return Err(BootstrapError::UnexpectedExitCode {
                command,
                expected,
                actual: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Names of the records `getent <database> <key>` returns, empty when the
    /// query fails.
    fn query(&mut self, database: &str, key: &str) -> Result<Vec<String>, BootstrapError> {
        let output = self.run(argv!("getent", database, key))?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .trim()
            .lines()
            .filter_map(|line| line.split(':').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn delete_matching(
        &mut self,
        database: &str,
        key: &str,
        delete_tool: &str,
    ) -> Result<(), BootstrapError> {
        for name in self.query(database, key)? {
            info!(database, name = %name, "Remove existing entry");
            self.run_expect(argv!(delete_tool, &name), 0)?;
        }
        Ok(())
    }

    /// Runs all steps of `plan` in order.
    ///
    /// # Errors
    ///
    /// Returns the first step failure; later steps are not run.
    #[instrument(skip(self, plan), fields(user = %plan.identity.user, uid = plan.identity.uid, gid = plan.identity.gid))]
    pub fn run_plan(&mut self, plan: &BootstrapPlan) -> Result<(), BootstrapError> {
        let identity = &plan.identity;
        let uid = identity.uid.to_string();
        let gid = identity.gid.to_string();
        let home = path_arg(&plan.home);
        let trust_dir = plan.trust_dir();

        self.delete_matching("passwd", &uid, "userdel")?;
        self.delete_matching("passwd", &identity.user, "userdel")?;
        self.delete_matching("group", &gid, "groupdel")?;
        self.delete_matching("group", &identity.group, "groupdel")?;

        self.run_expect(argv!("groupadd", "-g", &gid, &identity.group), 0)?;
        self.run_expect(
            argv!("useradd", "-d", &home, "-g", &gid, "-u", &uid, &identity.user),
            0,
        )?;

        let sudoers = format!("echo \"{SUDOERS_RULE}\" > /etc/sudoers");
        self.run_expect(argv!("sh", "-c", &sudoers), 0)?;

        self.run_expect(argv!("mkdir", "-p", &path_arg(&trust_dir)), 0)?;
        for staged in &plan.trust_files {
            let name = staged.file_name().unwrap_or(staged.as_os_str());
            let target = trust_dir.join(name);
            self.run_expect(argv!("mv", &path_arg(staged), &path_arg(&target)), 0)?;
        }

        self.run_expect(
            argv!(
                "chown",
                "-R",
                &identity.user_group(),
                &path_arg(&plan.ownership_path()),
            ),
            0,
        )?;

        info!("Sandbox bootstrap complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            user: "jenkins".to_string(),
            uid: 1001,
            gid: 1002,
            group: "ci".to_string(),
        }
    }

    #[test]
    fn test_trust_dir() {
        let plan = BootstrapPlan::new(identity(), "/jenkins");
        assert_eq!(plan.trust_dir(), PathBuf::from("/jenkins/.ssh"));
    }

    #[test]
    fn test_ownership_path() {
        let plan = BootstrapPlan::new(identity(), "/jenkins");
        assert_eq!(plan.ownership_path(), PathBuf::from("/jenkins"));

        let plan = plan.with_ownership(OwnershipTarget::TrustDir);
        assert_eq!(plan.ownership_path(), PathBuf::from("/jenkins/.ssh"));
    }

    #[test]
    fn test_argv() {
        assert_eq!(argv!("getent", "group", "1002"), vec!["getent", "group", "1002"]);
    }
}
