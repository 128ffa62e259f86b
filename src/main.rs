//! Jenkins Docker Wrapper - Entry Point

use miette::Result;
use tracing::{Level, debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use jenkins_docker_wrapper::cli;
use jenkins_docker_wrapper::environment::host_environment;
use jenkins_docker_wrapper::error::ConfigError;
use jenkins_docker_wrapper::identity::HostIdentityResolver;
use jenkins_docker_wrapper::job::JobRunner;
use jenkins_docker_wrapper::sandbox::{DockerCli, DockerConfig};

fn main() -> Result<()> {
    let argv = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    let invocation = match cli::parse(argv) {
        Ok(invocation) => invocation,
        Err(ConfigError::Arguments(e)) => e.exit(),
        Err(e) => return Err(e.into()),
    };

    // stdout belongs to the build step
    let filter = if invocation.args.debug {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    debug!("Jenkins Docker Wrapper v{}", env!("CARGO_PKG_VERSION"));

    let engine = DockerCli::connect(DockerConfig::default())?;
    info!("Connected to docker daemon");

    let status = JobRunner::new(engine, HostIdentityResolver).run(&invocation, host_environment())?;
    std::process::exit(status.code());
}
