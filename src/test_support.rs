use crate::domain::error::Result;
use crate::domain::{
    Clock, CommandOutput, CommandSpec, ComposeConfig, ComposeRuntime, ComposeState,
    ContainerFilter, EnvError, PortMapping, ProcessRunner, ServiceInfo, ServiceStatus,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub name: String,
    pub project_label: Option<String>,
}

impl MockContainer {
    fn matches(&self, filter: &ContainerFilter) -> bool {
        match filter {
            ContainerFilter::NameContains(value) => self.name.contains(value.as_str()),
            ContainerFilter::ProjectLabel(value) => {
                self.project_label.as_deref() == Some(value.as_str())
            }
        }
    }
}

/// In-memory compose engine. `up` creates one container per defined service,
/// named `<project>-<service>-1` and labelled with the project.
#[derive(Debug, Default)]
pub struct MockComposeRuntime {
    services: RwLock<BTreeMap<String, Vec<PortMapping>>>,
    containers: RwLock<Vec<MockContainer>>,
    status_sequences: RwLock<HashMap<String, VecDeque<ServiceStatus>>>,
    status_queries: RwLock<HashMap<String, usize>>,
    failing_status_queries: RwLock<usize>,
    commands: RwLock<Vec<String>>,
    compose_files: RwLock<Vec<(&'static str, Vec<PathBuf>)>>,
    fail_on: RwLock<Vec<String>>,
}

impl MockComposeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_service(&self, name: &str, ports: Vec<PortMapping>) {
        self.services.write().unwrap().insert(name.to_string(), ports);
    }

    pub fn add_container(&self, name: &str, project_label: Option<&str>) {
        self.containers.write().unwrap().push(MockContainer {
            id: format!("id-{name}"),
            name: name.to_string(),
            project_label: project_label.map(str::to_string),
        });
    }

    /// Each query pops the next status; the last one repeats forever.
    pub fn set_status_sequence(&self, service: &str, statuses: Vec<ServiceStatus>) {
        self.status_sequences
            .write()
            .unwrap()
            .insert(service.to_string(), statuses.into());
    }

    /// The next `n` status queries fail, for any service.
    pub fn fail_next_status_queries(&self, n: usize) {
        *self.failing_status_queries.write().unwrap() = n;
    }

    /// Operations: `up`, `down`, `status`, `find`, `remove`. Calls accumulate.
    pub fn set_fail_on(&self, operation: &str) {
        self.fail_on.write().unwrap().push(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_on.write().unwrap().clear();
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.commands.read().unwrap().clone()
    }

    /// Compose files passed to each `up`, `down` or `status` call, in order.
    pub fn compose_files_for(&self, operation: &str) -> Vec<Vec<PathBuf>> {
        self.compose_files
            .read()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == operation)
            .map(|(_, files)| files.clone())
            .collect()
    }

    /// Number of status queries for `service`, failed ones included.
    pub fn status_queries(&self, service: &str) -> usize {
        self.status_queries
            .read()
            .unwrap()
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    /// Containers whose name contains `project` or whose label equals it.
    pub fn container_count_matching(&self, project: &str) -> usize {
        self.containers
            .read()
            .unwrap()
            .iter()
            .filter(|c| {
                c.name.contains(project) || c.project_label.as_deref() == Some(project)
            })
            .count()
    }

    pub fn containers(&self) -> Vec<MockContainer> {
        self.containers.read().unwrap().clone()
    }

    fn record_command(&self, cmd: String) {
        self.commands.write().unwrap().push(cmd);
    }

    fn record_files(&self, operation: &'static str, files: &[PathBuf]) {
        self.compose_files
            .write()
            .unwrap()
            .push((operation, files.to_vec()));
    }

    fn should_fail(&self, operation: &str) -> bool {
        self.fail_on.read().unwrap().iter().any(|op| op == operation)
    }

    fn mock_failure(operation: &str) -> String {
        format!("mock failure on: {operation}")
    }
}

impl ComposeRuntime for MockComposeRuntime {
    fn up(&self, config: &ComposeConfig) -> Result<ComposeState> {
        let project = &config.project_name;
        self.record_command(format!("up:{project}"));
        self.record_files("up", &config.compose_files);
        if self.should_fail("up") {
            return Err(EnvError::Startup {
                project: project.clone(),
                exit_code: Some(1),
                output: Self::mock_failure("up"),
            });
        }

        let mut state = ComposeState::new(project, &config.stack_name);
        let services = self.services.read().unwrap().clone();
        for (service, ports) in services {
            let name = format!("{project}-{service}-1");
            self.add_container(&name, Some(project.as_str()));
            state = state.with_service(
                service,
                ServiceInfo {
                    container_id: format!("id-{name}"),
                    container_name: name,
                    state: "running".to_string(),
                    ports,
                },
            );
        }
        Ok(state)
    }

    fn down(&self, project_name: &str, compose_files: &[PathBuf]) -> Result<()> {
        self.record_command(format!("down:{project_name}"));
        self.record_files("down", compose_files);
        if self.should_fail("down") {
            return Err(EnvError::Stop {
                project: project_name.to_string(),
                exit_code: Some(1),
                output: Self::mock_failure("down"),
            });
        }

        self.containers
            .write()
            .unwrap()
            .retain(|c| c.project_label.as_deref() != Some(project_name));
        Ok(())
    }

    fn service_status(
        &self,
        project_name: &str,
        compose_files: &[PathBuf],
        service: &str,
    ) -> Result<ServiceStatus> {
        self.record_command(format!("status:{project_name}:{service}"));
        self.record_files("status", compose_files);
        *self
            .status_queries
            .write()
            .unwrap()
            .entry(service.to_string())
            .or_default() += 1;

        let injected = {
            let mut remaining = self.failing_status_queries.write().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        };
        if injected || self.should_fail("status") {
            return Err(EnvError::Query {
                project: project_name.to_string(),
                reason: Self::mock_failure("status"),
            });
        }

        if let Some(sequence) = self.status_sequences.write().unwrap().get_mut(service) {
            let status = if sequence.len() > 1 {
                sequence.pop_front()
            } else {
                sequence.front().copied()
            };
            if let Some(status) = status {
                return Ok(status);
            }
        }

        let name = format!("{project_name}-{service}-1");
        let exists = self.containers.read().unwrap().iter().any(|c| c.name == name);
        Ok(if exists {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::NotFound
        })
    }

    fn find_containers(&self, filter: &ContainerFilter) -> Result<Vec<String>> {
        let value = match filter {
            ContainerFilter::NameContains(v) => {
                self.record_command(format!("find:name:{v}"));
                v
            }
            ContainerFilter::ProjectLabel(v) => {
                self.record_command(format!("find:label:{v}"));
                v
            }
        };
        if self.should_fail("find") {
            return Err(EnvError::Query {
                project: value.clone(),
                reason: Self::mock_failure("find"),
            });
        }

        Ok(self
            .containers
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.matches(filter))
            .map(|c| c.id.clone())
            .collect())
    }

    fn remove_containers(&self, ids: &[String]) -> Result<()> {
        self.record_command(format!("remove:{}", ids.join(",")));
        if self.should_fail("remove") {
            return Err(EnvError::Remove {
                ids: ids.to_vec(),
                output: Self::mock_failure("remove"),
            });
        }

        self.containers
            .write()
            .unwrap()
            .retain(|c| !ids.contains(&c.id));
        Ok(())
    }
}

/// Answers commands from canned responses matched by substring of the
/// command line. Unmatched commands succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeProcessRunner {
    responses: RwLock<Vec<(String, CommandOutput)>>,
    specs: RwLock<Vec<CommandSpec>>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// First matching pattern wins.
    pub fn respond(&self, pattern: &str, output: CommandOutput) {
        self.responses
            .write()
            .unwrap()
            .push((pattern.to_string(), output));
    }

    pub fn get_commands(&self) -> Vec<String> {
        self.specs
            .read()
            .unwrap()
            .iter()
            .map(CommandSpec::display_line)
            .collect()
    }

    pub fn get_specs(&self) -> Vec<CommandSpec> {
        self.specs.read().unwrap().clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let line = spec.display_line();
        self.specs.write().unwrap().push(spec.clone());

        let output = self
            .responses
            .read()
            .unwrap()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));
        Ok(output)
    }
}

#[derive(Debug)]
struct FakeClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Clock whose time only moves on `sleep` or `advance`.
#[derive(Debug)]
pub struct FakeClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    state: RwLock<FakeClockState>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            // 2026-01-01T00:00:00Z
            wall_origin: DateTime::from_timestamp(1_767_225_600, 0).unwrap(),
            state: RwLock::new(FakeClockState {
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            }),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.state.write().unwrap().elapsed += duration;
    }

    pub fn sleeps(&self) -> usize {
        self.state.read().unwrap().sleeps.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.state.read().unwrap().elapsed
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.write().unwrap();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let offset = TimeDelta::from_std(self.elapsed()).unwrap_or(TimeDelta::zero());
        self.wall_origin + offset
    }
}
