use super::project_name::is_allocation_suffix;
use crate::domain::error::Result;
use crate::domain::{Clock, ComposeState, EnvError, PortMapping, Scope, ServiceInfo};
use anyhow::Context;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const STATE_FILE_EXTENSION: &str = "json";
/// Set by `testbox run` for the command it launches.
pub const STATE_FILE_ENV: &str = "TESTBOX_STATE_FILE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFileService {
    pub container_id: String,
    pub container_name: String,
    pub state: String,
    pub published_ports: Vec<PortMapping>,
}

/// The JSON document test code reads to find containers and ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateFile {
    pub stack_name: String,
    pub project_name: String,
    pub lifecycle: Scope,
    pub timestamp: String,
    pub services: BTreeMap<String, StateFileService>,
}

impl StateFile {
    pub fn from_state(state: &ComposeState, scope: Scope, timestamp: String) -> Self {
        let services = state
            .services
            .iter()
            .map(|(name, info)| {
                (
                    name.clone(),
                    StateFileService {
                        container_id: info.container_id.clone(),
                        container_name: info.container_name.clone(),
                        state: info.state.clone(),
                        published_ports: info.ports.clone(),
                    },
                )
            })
            .collect();

        Self {
            stack_name: state.stack_name.clone(),
            project_name: state.project_name.clone(),
            lifecycle: scope,
            timestamp,
            services,
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("reading state file {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parsing state file {:?}", path))
    }

    /// Loads the file named by `TESTBOX_STATE_FILE`.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = std::env::var_os(STATE_FILE_ENV)
            .with_context(|| format!("{STATE_FILE_ENV} is not set"))?;
        Self::load(Path::new(&path))
    }

    pub fn host_port(&self, service: &str, container_port: u16) -> Option<u16> {
        self.services
            .get(service)?
            .published_ports
            .iter()
            .find(|p| p.container == container_port)
            .map(|p| p.host)
    }

    pub fn container_id(&self, service: &str) -> Option<&str> {
        self.services.get(service).map(|s| s.container_id.as_str())
    }

    pub fn to_compose_state(&self) -> ComposeState {
        let mut state = ComposeState::new(&self.project_name, &self.stack_name);
        for (name, svc) in &self.services {
            state.services.insert(
                name.clone(),
                ServiceInfo {
                    container_id: svc.container_id.clone(),
                    container_name: svc.container_name.clone(),
                    state: svc.state.clone(),
                    ports: svc.published_ports.clone(),
                },
            );
        }
        state
    }
}

/// Writes `StateFile` documents in one complete write.
#[derive(Debug, Clone)]
pub struct StateFilePublisher {
    clock: Arc<dyn Clock>,
}

impl StateFilePublisher {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Serializes `state` to `destination`, creating parent directories.
    ///
    /// The document is written to a temporary file next to the destination and
    /// renamed into place, so readers never see a partial file.
    pub fn publish(&self, state: &ComposeState, scope: Scope, destination: &Path) -> Result<()> {
        let timestamp = self
            .clock
            .utc_now()
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let document = StateFile::from_state(state, scope, timestamp);

        write_atomically(&document, destination).map_err(|source| EnvError::Publish {
            path: destination.to_path_buf(),
            source,
        })?;

        info!(
            project = %state.project_name,
            path = ?destination,
            services = state.services.len(),
            "published state file"
        );
        Ok(())
    }
}

fn write_atomically(document: &StateFile, destination: &Path) -> io::Result<()> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    serde_json::to_writer_pretty(&mut tmp, document)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

/// Deletes `exact` and any stale state file of the same scope in `dir`.
///
/// A sibling is stale when its stem is `prefix` followed by exactly the
/// allocator's suffix and `is_live` says its project has no containers left.
/// Missing files and directories are not errors. Returns how many files were
/// removed.
pub fn remove_state_files<F>(
    dir: &Path,
    prefix: &str,
    exact: Option<&Path>,
    is_live: F,
) -> io::Result<usize>
where
    F: Fn(&str) -> bool,
{
    let mut removed = 0;

    if let Some(path) = exact {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(STATE_FILE_EXTENSION) {
            continue;
        }
        let Some(project) = path.file_stem().and_then(|n| n.to_str()) else {
            continue;
        };
        let same_scope = project
            .strip_prefix(prefix)
            .is_some_and(is_allocation_suffix);
        if !same_scope || !path.is_file() {
            continue;
        }
        if is_live(project) {
            debug!(path = ?path, "keeping state file of live project");
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = ?path, "removed stale state file");
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(removed)
}
