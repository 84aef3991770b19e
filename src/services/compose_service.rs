use crate::domain::error::Result;
use crate::domain::{ComposeConfig, ComposeRuntime, ComposeState, ContainerFilter, ServiceStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Start, stop and query compose stacks.
#[derive(Debug, Clone)]
pub struct ComposeService {
    runtime: Arc<dyn ComposeRuntime>,
}

impl ComposeService {
    pub fn new(runtime: Arc<dyn ComposeRuntime>) -> Self {
        Self { runtime }
    }

    pub fn start(&self, config: &ComposeConfig) -> Result<ComposeState> {
        info!(
            project = %config.project_name,
            stack = %config.stack_name,
            "starting stack"
        );

        let state = self.runtime.up(config)?;

        for (service, info) in &state.services {
            debug!(
                project = %config.project_name,
                service,
                container = %info.container_name,
                ports = ?info.ports,
                "service container"
            );
        }

        Ok(state)
    }

    pub fn stop(&self, project_name: &str, compose_files: &[PathBuf]) -> Result<()> {
        info!(project = project_name, files = compose_files.len(), "stopping stack");
        self.runtime.down(project_name, compose_files).inspect_err(|e| {
            warn!(project = project_name, error = %e, "compose down failed");
        })
    }

    pub fn query_status(
        &self,
        project_name: &str,
        compose_files: &[PathBuf],
        service: &str,
    ) -> Result<ServiceStatus> {
        let status = self
            .runtime
            .service_status(project_name, compose_files, service)?;
        debug!(project = project_name, service, %status, "service status");
        Ok(status)
    }

    pub fn find_containers(&self, filter: &ContainerFilter) -> Result<Vec<String>> {
        self.runtime.find_containers(filter)
    }

    /// Removes every container matching the filter, returning how many there were.
    pub fn remove_matching(&self, filter: &ContainerFilter) -> Result<usize> {
        let ids = self.runtime.find_containers(filter)?;
        if ids.is_empty() {
            return Ok(0);
        }

        info!(count = ids.len(), ?filter, "force-removing containers");
        self.runtime.remove_containers(&ids)?;
        Ok(ids.len())
    }
}
