//! Command line handling.
//!
//! The wrapper's own flags and the command forwarded into the sandbox share
//! one argument vector, separated by `--`. Without a separator every argument
//! is forwarded. When the executable is invoked as `jenkins_docker_run` the
//! legacy form applies: the first argument names the image and the rest is
//! forwarded as is.

use std::ffi::OsStr;
use std::path::Path;

use clap::Parser;
use tracing::debug;

use crate::error::ConfigError;

/// Executable name that selects the legacy argument form.
pub const LEGACY_BASENAME: &str = "jenkins_docker_run";

/// Executable name assumed when the argument vector is empty.
pub const DEFAULT_BASENAME: &str = "jenkins_docker_wrapper";

/// Separates the wrapper's flags from the forwarded command.
pub const SEPARATOR: &str = "--";

/// Run a Jenkins build step inside a disposable Docker container.
#[derive(Parser, Debug, Default, Clone, PartialEq, Eq)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Enable debug mode.
    #[arg(long = "debug", short = 'd')]
    pub debug: bool,

    /// Parse projekt.conf for image name.
    #[arg(long = "projekt_conf", short = 'p')]
    pub projekt_conf: bool,

    /// Image name of docker image.
    #[arg(long = "image_name", short = 'i', value_name = "IMAGE")]
    pub image_name: Option<String>,

    /// Don't remove container after execution.
    #[arg(long = "no_rm", short = 'n')]
    pub no_rm: bool,
}

/// One parsed invocation of the wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Base name of the executable.
    pub basename: String,
    pub args: Args,
    /// Arguments handed to the shell inside the sandbox.
    pub container_args: Vec<String>,
}

impl Invocation {
    /// The forwarded script, i.e. the last forwarded argument.
    #[must_use]
    pub fn script(&self) -> Option<&str> {
        self.container_args.last().map(String::as_str)
    }
}

/// Returns `true` if `basename` selects the legacy argument form.
#[must_use]
pub fn is_legacy(basename: &str) -> bool {
    basename == LEGACY_BASENAME
}

/// Base name of the executable path `argv0`.
#[must_use]
pub fn basename(argv0: &str) -> String {
    Path::new(argv0)
        .file_name()
        .map(OsStr::to_string_lossy)
        .map_or_else(|| argv0.to_string(), |name| name.into_owned())
}

/// Splits `args` (without the executable) into the wrapper's own arguments
/// and the forwarded ones.
///
/// In legacy mode the first argument is the wrapper's and everything after it
/// is forwarded.
#[must_use]
pub fn split_arguments(basename: &str, args: &[String]) -> (Vec<String>, Vec<String>) {
    let (own, forwarded) = if is_legacy(basename) {
        match args.split_first() {
            Some((image, rest)) => (vec![image.clone()], rest.to_vec()),
            None => (Vec::new(), Vec::new()),
        }
    } else {
        match args.iter().position(|arg| arg == SEPARATOR) {
            Some(pos) => {
                debug!(separator = SEPARATOR, position = pos, "Found separator");
                (args[..pos].to_vec(), args[pos + 1..].to_vec())
            }
            None => (Vec::new(), args.to_vec()),
        }
    };

    debug!(?own, "My arguments");
    debug!(?forwarded, "Container arguments");
    (own, forwarded)
}

/// Parses a full argument vector, executable first.
///
/// # Errors
///
/// Returns `ConfigError::Arguments` for flags clap rejects, including the
/// help and version requests, and `ConfigError::MissingImage` for a legacy
/// invocation without arguments.
pub fn parse<I, S>(argv: I) -> Result<Invocation, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut argv = argv.into_iter().map(Into::into);
    let argv0 = argv.next().unwrap_or_else(|| DEFAULT_BASENAME.to_string());
    let rest: Vec<String> = argv.collect();

    let basename = basename(&argv0);
    let (own, container_args) = split_arguments(&basename, &rest);

    let args = if is_legacy(&basename) {
        let image = own.into_iter().next().ok_or(ConfigError::MissingImage)?;
        Args {
            image_name: Some(image),
            ..Args::default()
        }
    } else {
        Args::try_parse_from(std::iter::once(basename.clone()).chain(own))?
    };

    Ok(Invocation {
        basename,
        args,
        container_args,
    })
}
