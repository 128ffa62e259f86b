//! Environment sanitization for the sandbox boundary.
//!
//! The invoking process's environment is filtered through a policy table
//! before any of it reaches the sandbox. Each key in the table maps to a
//! [`PolicyAction`]; keys without an entry pass through unchanged.
//!
//! | Action                 | Forwarded            | Side state           | Failure         |
//! |------------------------|----------------------|----------------------|-----------------|
//! | `Drop`                 | nothing              | -                    | -               |
//! | `ValidateIdentity`     | value                | -                    | identity differs|
//! | `ValidateConfinedPath` | normalized path      | workspace path       | relative/outside|
//! | `Relocate`             | value                | relocation list      | relative        |
//! | `CaptureNumeric`       | value, if integer    | build id             | never           |
//! | `CaptureString`        | value                | job name             | never           |
//!
//! Sanitization is all-or-nothing: the first failed validation returns an
//! error and none of the accumulated output.

mod path;

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

use tracing::{debug, instrument, warn};

use crate::error::ValidationError;

pub use path::{confine, is_confined, normalize, require_absolute};

/// Encoding directive appended to every sanitized environment.
pub const UTF8_LOCALE: &str = "LANG=C.UTF-8";

/// What the sanitizer does with one environment key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Discard the entry.
    Drop,
    /// Value must equal the expected identity.
    ValidateIdentity,
    /// Value must be an absolute path under the confinement root; forwards the
    /// normalized path and records it as the workspace.
    ValidateConfinedPath,
    /// Value must be an absolute path; the file is staged for the sandbox.
    Relocate,
    /// Value is recorded as the build id if it parses as an integer, and
    /// silently dropped otherwise.
    CaptureNumeric,
    /// Value is recorded as the job name.
    CaptureString,
}

/// Key to action table.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentPolicy {
    entries: HashMap<String, PolicyAction>,
}

impl EnvironmentPolicy {
    /// Creates an empty policy: every entry passes through.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The policy applied to Jenkins build steps.
    #[must_use]
    pub fn jenkins() -> Self {
        Self::new()
            .with("SSH_CLIENT", PolicyAction::Drop)
            .with("SSH_CONNECTION", PolicyAction::Drop)
            .with("LD_LIBRARY_PATH", PolicyAction::Drop)
            .with("PATH", PolicyAction::Drop)
            .with("NVM_DIR", PolicyAction::Drop)
            .with("NVM_NODEJS_ORG_MIRROR", PolicyAction::Drop)
            .with("LANG", PolicyAction::Drop)
            .with("USER", PolicyAction::ValidateIdentity)
            .with("WORKSPACE", PolicyAction::ValidateConfinedPath)
            .with("PWD", PolicyAction::ValidateConfinedPath)
            .with("SSH_AUTH_SOCK", PolicyAction::Relocate)
            .with("BUILD_ID", PolicyAction::CaptureNumeric)
            .with("JOB_NAME", PolicyAction::CaptureString)
    }

    /// Sets the action for `key`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, action: PolicyAction) -> Self {
        self.entries.insert(key.into(), action);
        self
    }

    #[must_use]
    pub fn action(&self, key: &str) -> Option<PolicyAction> {
        self.entries.get(key).copied()
    }
}

/// Values the validating actions compare against.
#[derive(Debug, Clone)]
pub struct SanitizeContext {
    /// Required value of identity-validated keys.
    pub expected_identity: String,
    /// Root every confined path must stay under.
    pub confinement_root: PathBuf,
}

impl SanitizeContext {
    #[must_use]
    pub fn new(expected_identity: impl Into<String>, confinement_root: impl Into<PathBuf>) -> Self {
        Self {
            expected_identity: expected_identity.into(),
            confinement_root: confinement_root.into(),
        }
    }
}

/// Facts gathered while sanitizing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideState {
    /// Last confined path seen.
    pub workspace_path: Option<PathBuf>,
    /// Files to move into the staging area, in encounter order.
    pub files_to_relocate: Vec<PathBuf>,
    pub build_id: Option<i64>,
    pub job_name: Option<String>,
}

/// A successfully sanitized environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedEnvironment {
    /// Ordered `KEY=VALUE` entries to forward.
    pub env: Vec<String>,
    pub side: SideState,
}

impl SanitizedEnvironment {
    /// Returns the entries to forward with the UTF-8 locale appended.
    #[must_use]
    pub fn sandbox_env(&self) -> Vec<String> {
        let mut env = self.env.clone();
        env.push(UTF8_LOCALE.to_string());
        env
    }
}

/// Something a policy action wants recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Capture {
    Workspace(PathBuf),
    Relocate(PathBuf),
    BuildId(i64),
    JobName(String),
}

/// Outcome of applying one action.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Forward {
        value: String,
        capture: Option<Capture>,
    },
    Discard,
}

impl Verdict {
    fn forward(value: impl Into<String>) -> Self {
        Self::Forward {
            value: value.into(),
            capture: None,
        }
    }

    fn record(value: impl Into<String>, capture: Capture) -> Self {
        Self::Forward {
            value: value.into(),
            capture: Some(capture),
        }
    }
}

fn apply(
    action: PolicyAction,
    key: &str,
    value: &str,
    context: &SanitizeContext,
) -> Result<Verdict, ValidationError> {
    match action {
        PolicyAction::Drop => Ok(Verdict::Discard),
        PolicyAction::ValidateIdentity => {
            if value == context.expected_identity {
                Ok(Verdict::forward(value))
            } else {
                Err(ValidationError::IdentityMismatch {
                    key: key.to_string(),
                    found: value.to_string(),
                    expected: context.expected_identity.clone(),
                })
            }
        }
        PolicyAction::ValidateConfinedPath => {
            let path = confine(key, value, &context.confinement_root)?;
            let normalized = path.to_string_lossy().into_owned();
            Ok(Verdict::record(normalized, Capture::Workspace(path)))
        }
        PolicyAction::Relocate => {
            let path = require_absolute(key, value)?;
            Ok(Verdict::record(value, Capture::Relocate(path)))
        }
        PolicyAction::CaptureNumeric => match value.parse::<i64>() {
            Ok(id) => Ok(Verdict::record(value, Capture::BuildId(id))),
            Err(_) => {
                debug!(key, value, "Dropping non-numeric value");
                Ok(Verdict::Discard)
            }
        },
        PolicyAction::CaptureString => Ok(Verdict::record(value, Capture::JobName(value.to_string()))),
    }
}

fn fold(mut side: SideState, capture: Capture) -> SideState {
    match capture {
        Capture::Workspace(path) => side.workspace_path = Some(path),
        Capture::Relocate(path) => side.files_to_relocate.push(path),
        Capture::BuildId(id) => side.build_id = Some(id),
        Capture::JobName(name) => side.job_name = Some(name),
    }
    side
}

/// Filters `raw_env` through `policy`.
///
/// Entries are processed in order and split on the first `=`; entries
/// without one are skipped with a warning.
///
/// # Errors
///
/// Returns the first `ValidationError` raised by a validating action. No
/// output is produced in that case.
///
/// # Example
///
/// ```
/// use jenkins_docker_wrapper::environment::{EnvironmentPolicy, SanitizeContext, sanitize};
///
/// let context = SanitizeContext::new("jenkins", "/jenkins/workspace");
/// let result = sanitize(
///     ["NORMAL=value", "SSH_CONNECTION=x", "WORKSPACE=/jenkins/workspace/a/../b"],
///     &EnvironmentPolicy::jenkins(),
///     &context,
/// )
/// .unwrap();
///
/// assert_eq!(result.env, vec!["NORMAL=value", "WORKSPACE=/jenkins/workspace/b"]);
/// ```
#[instrument(skip_all, fields(root = %context.confinement_root.display()))]
pub fn sanitize<I, S>(
    raw_env: I,
    policy: &EnvironmentPolicy,
    context: &SanitizeContext,
) -> Result<SanitizedEnvironment, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut env = Vec::new();
    let mut side = SideState::default();

    for entry in raw_env {
        let entry = entry.as_ref();
        let Some((key, value)) = entry.split_once('=') else {
            warn!(entry, "Can't parse env");
            continue;
        };

        let verdict = match policy.action(key) {
            Some(action) => apply(action, key, value, context)?,
            None => Verdict::forward(value),
        };

        if let Verdict::Forward { value, capture } = verdict {
            env.push(format!("{key}={value}"));
            if let Some(capture) = capture {
                side = fold(side, capture);
            }
        }
    }

    for entry in &env {
        debug!(%entry, "container env var");
    }
    Ok(SanitizedEnvironment { env, side })
}

/// Turns raw environment pairs into `KEY=VALUE` strings, keeping their
/// order. Entries that are not valid UTF-8 cannot be forwarded and are
/// skipped.
pub fn utf8_entries<I>(vars: I) -> Vec<String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some(format!("{key}={value}")),
            (key, _) => {
                warn!(key = ?key, "Skipping environment entry that is not UTF-8");
                None
            }
        })
        .collect()
}

/// The current process environment as input for [`sanitize`].
#[must_use]
pub fn host_environment() -> Vec<String> {
    utf8_entries(std::env::vars_os())
}
