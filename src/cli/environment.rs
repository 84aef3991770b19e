use super::ScopeArgs;
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::sync::Arc;
use testbox::domain::{ProcessRunner, ScopeRequest};
use testbox::infra::config::{AppConfig, load_app_config};
use testbox::infra::{ComposeCommand, DockerComposeAdapter, SystemClock, SystemProcessRunner};
use testbox::services::project_name;
use testbox::services::{
    CleanupReport, EnterScopeError, LifecycleCoordinator, STATE_FILE_ENV, STATE_FILE_EXTENSION,
    ScopeContext, StateFile,
};
use tracing::{info, warn};

/// Set by `run` next to `TESTBOX_STATE_FILE`.
const PROJECT_ENV: &str = "TESTBOX_PROJECT";

pub struct Environment {
    config: AppConfig,
    base_dir: PathBuf,
    coordinator: LifecycleCoordinator,
}

impl Environment {
    pub fn new(config_dir: &Path) -> Result<Self> {
        let config = load_app_config(config_dir)?;
        let base_dir = std::env::current_dir().context("resolving working directory")?;

        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemProcessRunner::new());
        let compose = config
            .compose_command()
            .unwrap_or_else(|| ComposeCommand::detect(runner.as_ref()));
        info!(program = %compose.program, args = ?compose.base_args, "compose engine");

        let adapter = DockerComposeAdapter::new(runner)
            .with_compose_command(compose)
            .with_container_program(config.container_program())
            .with_command_timeout(config.command_timeout()?)
            .with_working_dir(&base_dir);
        let coordinator = LifecycleCoordinator::new(Arc::new(adapter), Arc::new(SystemClock));

        Ok(Self {
            config,
            base_dir,
            coordinator,
        })
    }

    fn request(&self, args: &ScopeArgs) -> Result<ScopeRequest> {
        let request = self
            .config
            .resolve_stack(&args.stack, &args.discriminator, &self.base_dir)?;
        Ok(match args.scope {
            Some(scope) => request.scope(scope),
            None => request,
        })
    }

    fn enter(&self, args: &ScopeArgs) -> Result<ScopeContext> {
        let request = self.request(args)?;
        self.coordinator.enter_scope(&request).map_err(|err| {
            report_warnings(&err.cleanup);
            let EnterScopeError { source, .. } = err;
            anyhow::Error::new(source).context(format!("starting stack '{}'", args.stack))
        })
    }

    pub fn up(&self, args: &ScopeArgs) -> Result<()> {
        let context = self.enter(args)?;
        let project = context
            .project()
            .ok_or_else(|| anyhow!("ready scope has no project"))?;

        println!("🚀 Stack '{}' is up", args.stack);
        println!("{PROJECT_ENV}={project}");
        if let Some(path) = context.state_file() {
            println!("{STATE_FILE_ENV}={}", path.display());
        }
        println!("Tear down with: testbox down {project}");
        Ok(())
    }

    fn state_file_for(&self, project: &str) -> PathBuf {
        self.config
            .state_dir()
            .join(format!("{project}.{STATE_FILE_EXTENSION}"))
    }

    /// Compose files of `stack`, or of the stack named in the project's state
    /// file. Empty when neither is known.
    fn compose_files_for(&self, project: &str, stack: Option<&str>) -> Result<Vec<PathBuf>> {
        let stack = match stack {
            Some(name) => name.to_string(),
            None => match StateFile::load(&self.state_file_for(project)) {
                Ok(file) => file.stack_name,
                Err(e) => {
                    warn!(
                        project,
                        error = %format!("{e:#}"),
                        "stack unknown, named volumes may survive; pass --stack"
                    );
                    return Ok(Vec::new());
                }
            },
        };
        self.config.compose_files(&stack, &self.base_dir)
    }

    pub fn down(&self, project: &str, stack: Option<&str>) -> Result<()> {
        let compose_files = self.compose_files_for(project, stack)?;
        let state_file = self.state_file_for(project);
        let project = project_name::restore(project);

        let report = self
            .coordinator
            .teardown(&project, &compose_files, Some(&state_file));
        report_warnings(&report);

        if report.is_clean() {
            println!("✅ Project '{project}' removed");
        } else {
            println!(
                "⚠️  Project '{project}' removed with {} warning(s)",
                report.warnings.len()
            );
        }
        Ok(())
    }

    pub fn status(&self, project: &str, stack: Option<&str>, services: &[String]) -> Result<()> {
        let compose_files = self.compose_files_for(project, stack)?;
        println!("📦 Services in {project}:");
        for service in services {
            let status = self
                .coordinator
                .compose()
                .query_status(project, &compose_files, service)
                .with_context(|| format!("querying status of '{service}'"))?;
            println!("- {:<20} | {}", service, status);
        }
        Ok(())
    }

    /// Exits the scope whether or not the command succeeds and passes its
    /// exit code through.
    pub fn run(&self, args: &ScopeArgs, command: &[String]) -> Result<ExitCode> {
        let (program, rest) = command
            .split_first()
            .ok_or_else(|| anyhow!("no command given"))?;
        let context = self.enter(args)?;

        let mut cmd = Command::new(program);
        cmd.args(rest);
        if let Some(project) = context.project() {
            cmd.env(PROJECT_ENV, project.as_str());
        }
        if let Some(path) = context.state_file() {
            cmd.env(STATE_FILE_ENV, path);
        }

        info!(command = ?command, "running command against stack");
        let status = cmd.status();

        report_warnings(&self.coordinator.exit_scope(context));

        let status = status.with_context(|| format!("running '{program}'"))?;
        Ok(match status.code() {
            Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            None => ExitCode::FAILURE,
        })
    }

    pub fn stacks(&self) -> Result<()> {
        let names = self.config.stack_names();
        if names.is_empty() {
            println!("⚠️  No stacks configured in testbox.toml");
            return Ok(());
        }

        for name in names {
            let stack = self.config.stack(&name)?;
            println!(
                "- {:<20} | {} | {}",
                name,
                stack.lifecycle.unwrap_or_default(),
                stack.compose_files.join(", ")
            );
        }
        Ok(())
    }
}

fn report_warnings(report: &CleanupReport) {
    for warning in &report.warnings {
        warn!(project = %report.project, %warning, "cleanup warning");
    }
}
