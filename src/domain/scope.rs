use super::{Scope, TargetStatus};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STATE_DIR: &str = "target/testbox";

/// Already-resolved inputs for one scope instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRequest {
    pub stack_name: String,
    pub scope: Scope,
    /// Names that tell scope instances apart, e.g. class and method.
    pub discriminator: Vec<String>,
    pub compose_files: Vec<PathBuf>,
    pub services: Vec<String>,
    pub target: TargetStatus,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub state_dir: PathBuf,
}

impl ScopeRequest {
    pub fn new(stack_name: impl Into<String>, compose_files: Vec<PathBuf>) -> Self {
        Self {
            stack_name: stack_name.into(),
            scope: Scope::default(),
            discriminator: Vec::new(),
            compose_files,
            services: Vec::new(),
            target: TargetStatus::default(),
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn discriminator<I, S>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discriminator = parts.into_iter().map(Into::into).collect();
        self
    }

    pub fn services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn target(mut self, target: TargetStatus) -> Self {
        self.target = target;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }
}
