//! One job run, start to finish.
//!
//! [`JobRunner`] is the composition root: it sanitizes the environment,
//! resolves the image and the build user, stages files, provisions the
//! sandbox, bootstraps the user inside it and finally runs the forwarded
//! command attached to this process's terminal. The sandbox is stopped and
//! removed on every exit path.

mod config;

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bootstrap::{BootstrapPlan, BootstrapSequencer};
use crate::cli::Invocation;
use crate::environment::{SanitizeContext, SanitizedEnvironment, sanitize};
use crate::error::{ConfigError, Result};
use crate::identity::{Identity, IdentityResolver};
use crate::sandbox::{BindMount, EngineClient, ExecStatus, SandboxContainer, SandboxSpec};
use crate::staging::StagingArea;

pub use config::{IMAGE_NAME_KEY, JobConfig, PROJECT_CONFIG_FILE, parse_image_name, read_image_name};

/// Builds a sandbox name from the job name, the build id and a random suffix.
///
/// Characters Docker does not accept in names are replaced with `_`.
#[must_use]
pub fn sandbox_name(job_name: Option<&str>, build_id: Option<i64>) -> String {
    let mut name = String::from("jenkins");
    if let Some(job) = job_name.filter(|job| !job.is_empty()) {
        name.push('-');
        name.push_str(job);
    }
    if let Some(id) = build_id {
        name.push('-');
        name.push_str(&id.to_string());
    }
    let suffix = Uuid::new_v4().simple().to_string();
    name.push('-');
    name.push_str(&suffix[..8]);

    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The host file behind the forwarded script argument `arg`, if there is one
/// to stage.
fn script_path(arg: &str) -> Option<PathBuf> {
    let path = Path::new(arg);
    if !path.is_absolute() {
        debug!(arg, "Last argument is not an absolute path, not staging it");
        return None;
    }
    if !path.is_file() {
        warn!(path = %path.display(), "Script is not a file, leaving it in place");
        return None;
    }
    Some(path.to_path_buf())
}

/// Runs one job against an engine and an identity source.
pub struct JobRunner<E: EngineClient, R: IdentityResolver> {
    engine: E,
    resolver: R,
    config: JobConfig,
}

impl<E: EngineClient, R: IdentityResolver> JobRunner<E, R> {
    #[must_use]
    pub fn new(engine: E, resolver: R) -> Self {
        Self {
            engine,
            resolver,
            config: JobConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    fn resolve_image(&self, invocation: &Invocation, workspace: &Path) -> Result<String> {
        if let Some(image) = invocation.args.image_name.as_ref().filter(|i| !i.is_empty()) {
            return Ok(image.clone());
        }
        if invocation.args.projekt_conf {
            if let Some(image) = read_image_name(workspace)? {
                debug!(image = %image, "Image name from project configuration");
                return Ok(image);
            }
        }
        Err(ConfigError::MissingImage.into())
    }

    /// Moves flagged files and the script into `staging` and copies the
    /// known-hosts file. Returns the forwarded arguments, with the script
    /// rewritten to its location inside the sandbox.
    fn stage(
        &self,
        staging: &mut StagingArea,
        sanitized: &SanitizedEnvironment,
        container_args: &[String],
    ) -> Result<Vec<String>> {
        for file in &sanitized.side.files_to_relocate {
            staging.relocate(file)?;
        }

        let mut args = container_args.to_vec();
        if let Some(last) = args.last_mut() {
            if let Some(script) = script_path(last) {
                let staged = staging.relocate(&script)?;
                *last = staged
                    .sandbox_path(&self.config.staging_mount)
                    .to_string_lossy()
                    .into_owned();
            }
        }

        if let Some(path) = &self.config.known_hosts {
            staging.stage_trust_file(path)?;
        }
        Ok(args)
    }

    fn sandbox_spec(
        &self,
        image: String,
        workspace: &Path,
        staging: &StagingArea,
        sanitized: &SanitizedEnvironment,
    ) -> SandboxSpec {
        SandboxSpec::new(image)
            .with_entry_command(self.config.entry_command.iter())
            .with_mount(BindMount::same_path(workspace))
            .with_mount(BindMount::new(staging.path(), &self.config.staging_mount))
            .with_working_dir(workspace)
            .with_envs(sanitized.sandbox_env())
            .with_name(sandbox_name(
                sanitized.side.job_name.as_deref(),
                sanitized.side.build_id,
            ))
    }

    fn bootstrap_plan(&self, identity: Identity, staging: &StagingArea) -> BootstrapPlan {
        staging
            .trust_files()
            .iter()
            .fold(
                BootstrapPlan::new(identity, &self.config.home),
                |plan, file| plan.with_trust_file(file.sandbox_path(&self.config.staging_mount)),
            )
            .with_ownership(self.config.ownership)
    }

    /// The command running the forwarded arguments as the build user.
    fn payload(&self, args: Vec<String>) -> Vec<String> {
        let mut command = vec![
            "sudo".to_string(),
            "-E".to_string(),
            "-u".to_string(),
            self.config.user.clone(),
            self.config.shell.clone(),
        ];
        command.extend(args);
        command
    }

    /// Runs the job described by `invocation` with the host environment
    /// `env`.
    ///
    /// Returns the exit status of the forwarded command.
    ///
    /// # Errors
    ///
    /// Validation, configuration, identity and staging failures are returned
    /// before any sandbox exists. Engine and bootstrap failures are returned
    /// after the sandbox has been torn down.
    #[instrument(skip_all, fields(basename = %invocation.basename))]
    pub fn run<I, S>(self, invocation: &Invocation, env: I) -> Result<ExecStatus>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let context = SanitizeContext::new(&self.config.user, &self.config.workspace_root);
        let sanitized = sanitize(env, &self.config.policy, &context)?;

        let workspace = sanitized
            .side
            .workspace_path
            .clone()
            .ok_or(ConfigError::MissingWorkspace)?;
        let image = self.resolve_image(invocation, &workspace)?;
        let identity = self.resolver.resolve(&self.config.user)?;

        let mut staging = match &self.config.staging_parent {
            Some(parent) => StagingArea::create_in(parent)?,
            None => StagingArea::create()?,
        };
        let args = self.stage(&mut staging, &sanitized, &invocation.container_args)?;

        let spec = self.sandbox_spec(image, &workspace, &staging, &sanitized);
        let plan = self.bootstrap_plan(identity, &staging);
        let command = self.payload(args);
        let no_rm = invocation.args.no_rm;

        let mut sandbox = SandboxContainer::new(self.engine)
            .with_stop_grace(self.config.stop_grace)
            .keep_after_teardown(no_rm);

        let result = provision_and_run(&mut sandbox, &spec, &plan, command);
        sandbox.teardown();

        if no_rm {
            let kept = staging.keep();
            info!(path = %kept.display(), "Keeping container temp dir");
        }

        let status = result?;
        info!(ret_val = %status, "Job finished");
        Ok(status)
    }
}

fn provision_and_run<E: EngineClient>(
    sandbox: &mut SandboxContainer<E>,
    spec: &SandboxSpec,
    plan: &BootstrapPlan,
    command: Vec<String>,
) -> Result<ExecStatus> {
    info!(image = %spec.image, "Starting container");
    sandbox.create(spec)?;
    sandbox.start()?;

    BootstrapSequencer::new(sandbox).run_plan(plan)?;

    info!(?command, "Running build step");
    Ok(sandbox.exec_attached(command, false)?)
}
