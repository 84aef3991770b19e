mod environment;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use environment::Environment;
use std::path::PathBuf;
use std::process::ExitCode;
use testbox::domain::Scope;
use testbox::infra::config::default_config_dir;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "testbox",
    version,
    about = "Ephemeral compose environments for integration tests"
)]
pub struct Cli {
    /// Configuration directory (default: ~/.config/testbox)
    #[arg(long, env = "TESTBOX_CONFIG_DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a stack and leave it running
    Up(ScopeArgs),
    /// Tear down a project started by `up`
    Down {
        /// Project name printed by `up`
        project: String,
        /// Stack the project was started from (default: read from its state file)
        #[arg(long)]
        stack: Option<String>,
    },
    /// Show the status of services in a project
    Status {
        project: String,
        /// Stack the project was started from (default: read from its state file)
        #[arg(long)]
        stack: Option<String>,
        #[arg(required = true)]
        services: Vec<String>,
    },
    /// Start a stack, run a command against it, then tear it down
    Run {
        #[command(flatten)]
        scope: ScopeArgs,
        /// Command to run, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// List configured stacks
    Stacks,
}

#[derive(Args, Debug)]
pub struct ScopeArgs {
    /// Stack name from testbox.toml
    pub stack: String,

    /// Override the stack's lifecycle (suite, class, method)
    #[arg(long, value_parser = parse_scope)]
    pub scope: Option<Scope>,

    /// Extra name parts that identify this instance, e.g. a test class
    #[arg(long = "name", value_name = "PART")]
    pub discriminator: Vec<String>,
}

fn parse_scope(raw: &str) -> std::result::Result<Scope, String> {
    match raw.to_ascii_lowercase().as_str() {
        "suite" => Ok(Scope::Suite),
        "class" => Ok(Scope::Class),
        "method" => Ok(Scope::Method),
        other => Err(format!("unknown scope '{other}' (expected suite, class or method)")),
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run(cli: Cli) -> Result<ExitCode> {
    let config_dir = cli.config_dir.unwrap_or_else(default_config_dir);
    let env = Environment::new(&config_dir)?;

    match cli.command {
        Commands::Up(args) => env.up(&args).map(|()| ExitCode::SUCCESS),
        Commands::Down { project, stack } => env
            .down(&project, stack.as_deref())
            .map(|()| ExitCode::SUCCESS),
        Commands::Status {
            project,
            stack,
            services,
        } => env
            .status(&project, stack.as_deref(), &services)
            .map(|()| ExitCode::SUCCESS),
        Commands::Run { scope, command } => env.run(&scope, &command),
        Commands::Stacks => env.stacks().map(|()| ExitCode::SUCCESS),
    }
}
