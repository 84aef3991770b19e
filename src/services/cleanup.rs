use super::ComposeService;
use super::state_file::remove_state_files;
use crate::domain::{ContainerFilter, ProjectName};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One cleanup step that failed. Never propagated, only reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub step: &'static str,
    pub message: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub project: String,
    pub completed: Vec<&'static str>,
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

type CleanupStep<'a> = (&'static str, Box<dyn FnOnce() -> anyhow::Result<()> + 'a>);

/// Multi-strategy teardown. Every step runs even when earlier ones fail.
#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    compose: Arc<ComposeService>,
}

impl CleanupCoordinator {
    pub const STEP_COMPOSE_DOWN: &'static str = "compose-down";
    pub const STEP_REMOVE_BY_NAME: &'static str = "remove-by-name";
    pub const STEP_REMOVE_BY_LABEL: &'static str = "remove-by-label";
    pub const STEP_STATE_FILES: &'static str = "state-files";

    pub fn new(compose: Arc<ComposeService>) -> Self {
        Self { compose }
    }

    /// Tears down everything attributable to `project`. Never fails; the
    /// report says which steps did.
    ///
    /// State files of other instances of the same scope are removed only once
    /// no container carries their project label.
    pub fn cleanup(
        &self,
        project: &ProjectName,
        compose_files: &[PathBuf],
        state_file: Option<&Path>,
    ) -> CleanupReport {
        let name = project.as_str();
        info!(project = name, "cleaning up");

        let mut steps: Vec<CleanupStep<'_>> = Vec::with_capacity(4);
        steps.push((
            Self::STEP_COMPOSE_DOWN,
            Box::new(move || -> anyhow::Result<()> {
                Ok(self.compose.stop(name, compose_files)?)
            }),
        ));
        steps.push((
            Self::STEP_REMOVE_BY_NAME,
            Box::new(move || -> anyhow::Result<()> {
                let filter = ContainerFilter::NameContains(name.to_string());
                let removed = self.compose.remove_matching(&filter)?;
                debug!(project = name, removed, "removed containers by name");
                Ok(())
            }),
        ));
        steps.push((
            Self::STEP_REMOVE_BY_LABEL,
            Box::new(move || -> anyhow::Result<()> {
                let filter = ContainerFilter::ProjectLabel(name.to_string());
                let removed = self.compose.remove_matching(&filter)?;
                debug!(project = name, removed, "removed containers by label");
                Ok(())
            }),
        ));
        steps.push((
            Self::STEP_STATE_FILES,
            Box::new(move || -> anyhow::Result<()> {
                let Some(path) = state_file else {
                    return Ok(());
                };
                let dir = match path.parent() {
                    Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                    _ => PathBuf::from("."),
                };
                let removed =
                    remove_state_files(&dir, project.scope_prefix(), Some(path), |other| {
                        self.has_containers(other)
                    })?;
                debug!(project = name, removed, "removed state files");
                Ok(())
            }),
        ));

        let report = run_steps(name, steps);

        if report.is_clean() {
            info!(project = name, "cleanup complete");
        } else {
            warn!(
                project = name,
                failed = report.warnings.len(),
                "cleanup finished with warnings"
            );
        }

        report
    }

    /// A failed query counts as live.
    fn has_containers(&self, project: &str) -> bool {
        let filter = ContainerFilter::ProjectLabel(project.to_string());
        match self.compose.find_containers(&filter) {
            Ok(ids) => !ids.is_empty(),
            Err(e) => {
                debug!(project, error = %e, "could not check containers, keeping state file");
                true
            }
        }
    }
}

fn run_steps(project: &str, steps: Vec<CleanupStep<'_>>) -> CleanupReport {
    let mut report = CleanupReport {
        project: project.to_string(),
        ..Default::default()
    };

    for (step, action) in steps {
        match action() {
            Ok(()) => report.completed.push(step),
            Err(e) => {
                warn!(project, step, error = %e, "cleanup step failed");
                report.warnings.push(CleanupWarning {
                    step,
                    message: format!("{e:#}"),
                });
            }
        }
    }

    report
}
