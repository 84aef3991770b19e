use super::compose_ps::{compose_state_from_entries, parse_ps_output, status_for_service};
use crate::domain::error::Result;
use crate::domain::{
    CommandOutput, CommandSpec, ComposeConfig, ComposeRuntime, ComposeState, ContainerFilter,
    DEFAULT_COMMAND_TIMEOUT, EnvError, ProcessRunner, ServiceStatus,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Program plus leading arguments that invoke the compose engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeCommand {
    pub program: String,
    pub base_args: Vec<String>,
}

impl ComposeCommand {
    /// Modern `docker compose` (subcommand of docker)
    pub fn docker_subcommand() -> Self {
        Self {
            program: "docker".to_string(),
            base_args: vec!["compose".to_string()],
        }
    }

    /// Legacy `docker-compose` (with hyphen)
    pub fn hyphenated() -> Self {
        Self {
            program: "docker-compose".to_string(),
            base_args: Vec::new(),
        }
    }

    /// Prefers `docker compose` when it answers `version`, otherwise falls back to `docker-compose`.
    pub fn detect(runner: &dyn ProcessRunner) -> Self {
        let probe = CommandSpec::new("docker")
            .args(["compose", "version"])
            .timeout(Duration::from_secs(10));

        match runner.run(&probe) {
            Ok(out) if out.success() => Self::docker_subcommand(),
            _ => {
                debug!("docker compose not available, using docker-compose");
                Self::hyphenated()
            }
        }
    }
}

impl Default for ComposeCommand {
    fn default() -> Self {
        Self::docker_subcommand()
    }
}

/// `ComposeRuntime` backed by the compose CLI.
#[derive(Debug, Clone)]
pub struct DockerComposeAdapter {
    runner: Arc<dyn ProcessRunner>,
    compose: ComposeCommand,
    container_program: String,
    command_timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl DockerComposeAdapter {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            compose: ComposeCommand::default(),
            container_program: "docker".to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            working_dir: None,
        }
    }

    pub fn with_compose_command(mut self, compose: ComposeCommand) -> Self {
        self.compose = compose;
        self
    }

    /// Program used for container-level operations (`ps`, `rm`).
    pub fn with_container_program(mut self, program: impl Into<String>) -> Self {
        self.container_program = program.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn compose_spec(&self, project_name: &str, files: &[PathBuf]) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.compose.program)
            .args(self.compose.base_args.iter().cloned())
            .args(["-p", project_name])
            .timeout(self.command_timeout);

        for file in files {
            spec = spec.arg("-f").arg(file.to_string_lossy());
        }

        if let Some(dir) = &self.working_dir {
            spec = spec.working_dir(dir);
        }

        spec
    }

    fn container_spec(&self) -> CommandSpec {
        let spec = CommandSpec::new(&self.container_program).timeout(self.command_timeout);
        match &self.working_dir {
            Some(dir) => spec.working_dir(dir),
            None => spec,
        }
    }

    fn ps(&self, project_name: &str, files: &[PathBuf], service: Option<&str>) -> Result<CommandOutput> {
        let mut spec = self
            .compose_spec(project_name, files)
            .args(["ps", "--all", "--format", "json"]);
        if let Some(service) = service {
            spec = spec.arg(service);
        }
        self.runner.run(&spec)
    }
}

impl ComposeRuntime for DockerComposeAdapter {
    fn up(&self, config: &ComposeConfig) -> Result<ComposeState> {
        let project = config.project_name.as_str();
        info!(project, stack = %config.stack_name, files = config.compose_files.len(), "compose up");

        let spec = self
            .compose_spec(project, &config.compose_files)
            .args(["up", "-d"]);
        let out = self.runner.run(&spec)?;

        if !out.success() {
            return Err(EnvError::Startup {
                project: project.to_string(),
                exit_code: out.exit_code,
                output: out.combined(),
            });
        }

        let ps = self.ps(project, &config.compose_files, None)?;
        if !ps.success() {
            return Err(EnvError::Query {
                project: project.to_string(),
                reason: ps.combined(),
            });
        }

        let entries = parse_ps_output(&ps.stdout)?;
        let state = compose_state_from_entries(project, &config.stack_name, &entries);
        debug!(project, services = state.services.len(), "discovered services");

        Ok(state)
    }

    fn down(&self, project_name: &str, compose_files: &[PathBuf]) -> Result<()> {
        let spec = self
            .compose_spec(project_name, compose_files)
            .args(["down", "-v", "--remove-orphans"]);
        let out = self.runner.run(&spec)?;

        if !out.success() {
            return Err(EnvError::Stop {
                project: project_name.to_string(),
                exit_code: out.exit_code,
                output: out.combined(),
            });
        }

        Ok(())
    }

    fn service_status(
        &self,
        project_name: &str,
        compose_files: &[PathBuf],
        service: &str,
    ) -> Result<ServiceStatus> {
        let out = self.ps(project_name, compose_files, Some(service))?;

        if !out.success() {
            // Compose refuses to `ps` a service that has no container yet.
            if out.combined().to_ascii_lowercase().contains("no such service") {
                return Ok(ServiceStatus::NotFound);
            }
            return Err(EnvError::Query {
                project: project_name.to_string(),
                reason: out.combined(),
            });
        }

        let entries = parse_ps_output(&out.stdout)?;
        Ok(status_for_service(&entries, service))
    }

    fn find_containers(&self, filter: &ContainerFilter) -> Result<Vec<String>> {
        let (filter_arg, project) = match filter {
            ContainerFilter::NameContains(value) => (format!("name={value}"), value),
            ContainerFilter::ProjectLabel(value) => {
                (format!("label={COMPOSE_PROJECT_LABEL}={value}"), value)
            }
        };

        let spec = self
            .container_spec()
            .args(["ps", "-a", "-q", "--no-trunc", "--filter"])
            .arg(filter_arg);
        let out = self.runner.run(&spec)?;

        if !out.success() {
            return Err(EnvError::Query {
                project: project.clone(),
                reason: out.combined(),
            });
        }

        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn remove_containers(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let spec = self
            .container_spec()
            .args(["rm", "-f", "-v"])
            .args(ids.iter().cloned());
        let out = self.runner.run(&spec)?;

        // A container that vanished between listing and removal is already gone.
        if !out.success() && !out.combined().contains("No such container") {
            return Err(EnvError::Remove {
                ids: ids.to_vec(),
                output: out.combined(),
            });
        }

        Ok(())
    }
}
