use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Per-service status as derived from what the compose engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    NotFound,
    Starting,
    Running,
    Healthy,
    Unhealthy,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Healthy => "HEALTHY",
            Self::Unhealthy => "UNHEALTHY",
        }
    }

    /// Lower means further from ready. Used to pick the status of the
    /// least-ready replica when a service has several containers.
    pub(crate) fn readiness_rank(&self) -> u8 {
        match self {
            Self::NotFound => 0,
            Self::Unhealthy => 1,
            Self::Starting => 2,
            Self::Running => 3,
            Self::Healthy => 4,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The readiness condition a caller waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Running,
    #[default]
    Healthy,
}

impl TargetStatus {
    /// `Running` is satisfied by a running or healthy container, `Healthy` only by healthy.
    pub fn is_satisfied_by(&self, status: ServiceStatus) -> bool {
        match self {
            Self::Running => matches!(status, ServiceStatus::Running | ServiceStatus::Healthy),
            Self::Healthy => status == ServiceStatus::Healthy,
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("RUNNING"),
            Self::Healthy => f.write_str("HEALTHY"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitConfig {
    pub project_name: String,
    /// Files the project was started from, passed to every status query.
    pub compose_files: Vec<PathBuf>,
    pub services: Vec<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub target: TargetStatus,
}

impl WaitConfig {
    pub fn new(
        project_name: impl Into<String>,
        services: Vec<String>,
        timeout: Duration,
        poll_interval: Duration,
        target: TargetStatus,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            compose_files: Vec::new(),
            services,
            timeout,
            poll_interval,
            target,
        }
    }

    pub fn compose_files(mut self, files: Vec<PathBuf>) -> Self {
        self.compose_files = files;
        self
    }
}
