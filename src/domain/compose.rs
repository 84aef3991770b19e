use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Granularity at which one environment is shared across test invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Suite,
    #[default]
    Class,
    Method,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suite => "suite",
            Self::Class => "class",
            Self::Method => "method",
        }
    }

    /// Suite and class environments serve many test invocations; method ones serve one.
    pub fn is_shared(&self) -> bool {
        !matches!(self, Self::Method)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collision-free environment identifier plus the prefix it shares with
/// other instances of the same scope (used to find stale state files).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectName {
    name: String,
    scope_prefix: String,
}

impl ProjectName {
    pub fn new(name: impl Into<String>, scope_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope_prefix: scope_prefix.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn scope_prefix(&self) -> &str {
        &self.scope_prefix
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Resolved input for bringing up one stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeConfig {
    pub compose_files: Vec<PathBuf>,
    pub project_name: String,
    pub stack_name: String,
}

impl ComposeConfig {
    pub fn new(
        compose_files: Vec<PathBuf>,
        project_name: impl Into<String>,
        stack_name: impl Into<String>,
    ) -> Self {
        Self {
            compose_files,
            project_name: project_name.into(),
            stack_name: stack_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub container: u16,
    pub host: u16,
    pub protocol: String,
}

impl PortMapping {
    pub fn tcp(container: u16, host: u16) -> Self {
        Self {
            container,
            host,
            protocol: "tcp".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub container_id: String,
    pub container_name: String,
    pub state: String,
    pub ports: Vec<PortMapping>,
}

impl ServiceInfo {
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container == container_port)
            .map(|p| p.host)
    }
}

/// Live result of a successful start, keyed by service name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComposeState {
    pub project_name: String,
    pub stack_name: String,
    pub services: BTreeMap<String, ServiceInfo>,
}

impl ComposeState {
    pub fn new(project_name: impl Into<String>, stack_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            stack_name: stack_name.into(),
            services: BTreeMap::new(),
        }
    }

    pub fn with_service(mut self, name: impl Into<String>, info: ServiceInfo) -> Self {
        self.services.insert(name.into(), info);
        self
    }

    pub fn service(&self, name: &str) -> Option<&ServiceInfo> {
        self.services.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_strings_are_lowercase() {
        assert_eq!(Scope::Suite.as_str(), "suite");
        assert_eq!(Scope::Class.to_string(), "class");
        assert_eq!(Scope::Method.as_str(), "method");
        assert!(Scope::Suite.is_shared());
        assert!(!Scope::Method.is_shared());
    }

    #[test]
    fn service_info_finds_host_port() {
        let info = ServiceInfo {
            container_id: "abc".into(),
            container_name: "p-api-1".into(),
            state: "running".into(),
            ports: vec![PortMapping::tcp(8080, 9001), PortMapping::tcp(9090, 9002)],
        };

        assert_eq!(info.host_port(8080), Some(9001));
        assert_eq!(info.host_port(9090), Some(9002));
        assert_eq!(info.host_port(1234), None);
    }
}
