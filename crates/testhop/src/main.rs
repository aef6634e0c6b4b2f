//! testhop
//!
//! Test-execution proxy: runs a compiled test binary on this machine or on a
//! remote host over SSH, streaming its output back

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use eyre::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use testhop_core::{
    ConnectionProfileBuilder, ExecutionRequest, HostSelection, RemoteExecutionPipeline,
    RunnerSettings,
};
use testhop_exec::{HostKeyPolicy, LocalRunner, SshConnector, Stdio};

const AFTER_HELP: &str = "\
Examples:
  go test -exec='testhop direct' ./...
  vagrant ssh-config > ssh_config
  go test -exec='testhop ssh --cfg ssh_config --' -coverprofile=cov.out ./...
  go test -exec='testhop ssh --sudo --cfg ssh_config --' ./...

The remote test binary sees TESTHOP_TARGET=<host:port>.";

#[derive(Parser, Debug)]
#[command(name = "testhop", version)]
#[command(
    about = "Run test binaries locally or on a remote host over SSH",
    long_about = None,
    after_help = AFTER_HELP
)]
struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the test binary on this machine
    Direct(Target),
    /// Copy the test binary to a remote host and run it there
    Ssh(SshArgs),
}

#[derive(Args, Debug)]
struct Target {
    /// Compiled test binary
    binary: PathBuf,

    /// Flags for the test binary
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    flags: Vec<String>,
}

#[derive(Args, Debug)]
struct SshArgs {
    /// Host configuration, e.g. the output of `vagrant ssh-config`
    #[arg(long = "cfg", value_name = "FILE")]
    cfg: PathBuf,

    /// Run the test binary with elevated privileges
    #[arg(long)]
    sudo: bool,

    /// Host block to use; the first one when absent
    #[arg(long, value_name = "NAME")]
    host: Option<String>,

    /// Accepted SHA256 host key fingerprint, repeatable. Without one any
    /// host key is accepted.
    #[arg(long = "host-key-fingerprint", value_name = "FINGERPRINT")]
    host_key_fingerprints: Vec<String>,

    /// Runner settings file
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(flatten)]
    target: Target,
}

fn init_tracing(verbose: bool) {
    // stdout and stderr belong to the test binary unless asked otherwise
    let default = if verbose { "debug" } else { "off" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_direct(target: Target) -> Result<()> {
    LocalRunner::new()
        .run(&target.binary, &target.flags)
        .await?;
    Ok(())
}

async fn run_ssh(args: SshArgs) -> Result<()> {
    let settings = match &args.settings {
        Some(path) => RunnerSettings::load(path)?,
        None => RunnerSettings::load_default()?,
    };
    debug!(?settings, "runner settings");

    let connector = SshConnector::new()
        .with_transfer_timeout(settings.transfer_timeout())
        .with_command_timeout(settings.command_timeout());

    let policy = if args.host_key_fingerprints.is_empty() {
        HostKeyPolicy::AcceptAny
    } else {
        HostKeyPolicy::Fingerprints(args.host_key_fingerprints)
    };
    let selection = args.host.map_or(HostSelection::First, HostSelection::Named);

    let mut pipeline = RemoteExecutionPipeline::new(connector)
        .with_selection(selection)
        .with_profile_builder(ConnectionProfileBuilder::new().host_key_policy(policy))
        .with_elevation(settings.elevation());

    let request = ExecutionRequest {
        test_binary: args.target.binary,
        test_flags: args.target.flags,
        elevate: args.sudo,
    };
    pipeline
        .execute(&args.cfg, request, Stdio::inherit())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match cli.command {
        Commands::Direct(target) => run_direct(target).await,
        Commands::Ssh(args) => run_ssh(args).await,
    };

    let code = match outcome {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("testhop: {e}");
            1
        }
    };
    // Exit here: the runtime would otherwise wait on the blocking stdin reader.
    std::process::exit(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_direct_passes_flags_through() {
        let cli = Cli::try_parse_from([
            "testhop",
            "direct",
            "./pkg.test",
            "-test.v",
            "-test.run=TestFoo",
        ])
        .unwrap();

        let Commands::Direct(target) = cli.command else {
            panic!("expected direct");
        };
        assert_eq!(target.binary, PathBuf::from("./pkg.test"));
        assert_eq!(target.flags, vec!["-test.v", "-test.run=TestFoo"]);
    }

    #[test]
    fn test_ssh_arguments() {
        let cli = Cli::try_parse_from([
            "testhop",
            "-v",
            "ssh",
            "--cfg",
            "ssh_config",
            "--sudo",
            "--host",
            "default",
            "--host-key-fingerprint",
            "SHA256:one",
            "--host-key-fingerprint",
            "SHA256:two",
            "--",
            "/tmp/pkg.test",
            "-test.coverprofile=out/cov.out",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Commands::Ssh(args) = cli.command else {
            panic!("expected ssh");
        };
        assert_eq!(args.cfg, PathBuf::from("ssh_config"));
        assert!(args.sudo);
        assert_eq!(args.host.as_deref(), Some("default"));
        assert_eq!(args.host_key_fingerprints, vec!["SHA256:one", "SHA256:two"]);
        assert_eq!(args.settings, None);
        assert_eq!(args.target.binary, PathBuf::from("/tmp/pkg.test"));
        assert_eq!(args.target.flags, vec!["-test.coverprofile=out/cov.out"]);
    }

    #[test]
    fn test_ssh_requires_cfg() {
        let err = Cli::try_parse_from(["testhop", "ssh", "--", "pkg.test"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_binary_required() {
        assert!(Cli::try_parse_from(["testhop", "direct"]).is_err());
    }
}
