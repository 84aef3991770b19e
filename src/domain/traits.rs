use super::error::Result;
use super::{CommandOutput, CommandSpec, ComposeConfig, ComposeState, ServiceStatus};
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Executes external commands. The only place the crate touches `std::process`.
pub trait ProcessRunner: Send + Sync + Debug {
    /// Runs the command to completion or until its timeout elapses.
    ///
    /// A non-zero exit is *not* an error here; callers inspect `exit_code`.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// How containers are selected for force removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFilter {
    /// Container name contains the value.
    NameContains(String),
    /// `com.docker.compose.project` label equals the value.
    ProjectLabel(String),
}

/// Trait for compose engine operations
pub trait ComposeRuntime: Send + Sync + Debug {
    /// Bring up every declared file under the project and discover what started
    fn up(&self, config: &ComposeConfig) -> Result<ComposeState>;

    /// Tear the project down, removing its volumes. `compose_files` are the
    /// files it was started from; without them named volumes can survive.
    fn down(&self, project_name: &str, compose_files: &[PathBuf]) -> Result<()>;

    /// Current status of one service in the project
    fn service_status(
        &self,
        project_name: &str,
        compose_files: &[PathBuf],
        service: &str,
    ) -> Result<ServiceStatus>;

    /// Ids of all containers (running or not) matching the filter
    fn find_containers(&self, filter: &ContainerFilter) -> Result<Vec<String>>;

    /// Force-remove the given containers and their anonymous volumes
    fn remove_containers(&self, ids: &[String]) -> Result<()>;
}

/// Trait for abstracting time so polling code can be tested without sleeping
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);

    /// Wall-clock time, used for timestamps.
    fn utc_now(&self) -> DateTime<Utc>;
}
