use super::ServiceStatus;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadyService {
    pub name: String,
    pub last_status: ServiceStatus,
}

impl fmt::Display for UnreadyService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (last status: {})", self.name, self.last_status)
    }
}

fn join_unready(services: &[UnreadyService]) -> String {
    services
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("compose up failed for project '{project}' (exit code {}): {output}", exit_code_label(.exit_code))]
    Startup {
        project: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error(
        "services in project '{project}' not {target} after {timeout:?}: {}",
        join_unready(.unready)
    )]
    Timeout {
        project: String,
        target: String,
        timeout: Duration,
        unready: Vec<UnreadyService>,
    },

    #[error("could not write state file {path:?}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("compose down failed for project '{project}' (exit code {}): {output}", exit_code_label(.exit_code))]
    Stop {
        project: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("could not remove containers {ids:?}: {output}")]
    Remove { ids: Vec<String>, output: String },

    #[error("status query failed for project '{project}': {reason}")]
    Query { project: String, reason: String },

    #[error("could not run '{program}': {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {timeout:?}")]
    CommandTimeout { program: String, timeout: Duration },

    #[error("unexpected engine output ({context}): {reason}")]
    Parse { context: String, reason: String },
}

impl EnvError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Startup { .. })
    }

    pub fn is_publish(&self) -> bool {
        matches!(self, Self::Publish { .. })
    }
}

pub type Result<T> = std::result::Result<T, EnvError>;
