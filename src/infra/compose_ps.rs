//! Parsing of `compose ps --format json` output and status inference.
//!
//! Everything that interprets engine text lives here so the strategy can
//! change without touching the callers of `ComposeRuntime::service_status`.

use crate::domain::error::Result;
use crate::domain::{ComposeState, EnvError, PortMapping, ServiceInfo, ServiceStatus};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Publisher {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "TargetPort")]
    pub target_port: u16,
    #[serde(rename = "PublishedPort")]
    pub published_port: u16,
    #[serde(rename = "Protocol")]
    pub protocol: String,
}

/// One container as reported by `compose ps`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PsEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Health")]
    pub health: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Publishers")]
    pub publishers: Option<Vec<Publisher>>,
}

impl PsEntry {
    /// Health column, falling back to the `(healthy)` suffix of the status
    /// text that older engines print instead.
    pub fn effective_health(&self) -> String {
        if !self.health.trim().is_empty() {
            return self.health.trim().to_ascii_lowercase();
        }
        health_from_status_text(&self.status).to_string()
    }

    pub fn inferred_status(&self) -> ServiceStatus {
        infer_status(&self.state, &self.effective_health())
    }

    /// Published ports, skipping unpublished ones and IPv4/IPv6 duplicates.
    pub fn port_mappings(&self) -> Vec<PortMapping> {
        let mut ports: Vec<PortMapping> = Vec::new();
        for publisher in self.publishers.iter().flatten() {
            if publisher.published_port == 0 {
                continue;
            }
            let protocol = if publisher.protocol.is_empty() {
                "tcp".to_string()
            } else {
                publisher.protocol.to_ascii_lowercase()
            };
            let mapping = PortMapping {
                container: publisher.target_port,
                host: publisher.published_port,
                protocol,
            };
            if !ports.contains(&mapping) {
                ports.push(mapping);
            }
        }
        ports
    }

    pub fn to_service_info(&self) -> ServiceInfo {
        ServiceInfo {
            container_id: self.id.clone(),
            container_name: self.name.clone(),
            state: self.state.clone(),
            ports: self.port_mappings(),
        }
    }
}

/// Parses either a JSON array or newline-delimited JSON objects.
pub fn parse_ps_output(stdout: &str) -> Result<Vec<PsEntry>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| EnvError::Parse {
            context: "compose ps".to_string(),
            reason: e.to_string(),
        });
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str::<PsEntry>(line).map_err(|e| EnvError::Parse {
                context: "compose ps".to_string(),
                reason: format!("{e} in line {line:?}"),
            })
        })
        .collect()
}

/// Maps engine-reported container state and health to a `ServiceStatus`.
///
/// Any restart-indicating state is treated as not ready.
pub fn infer_status(state: &str, health: &str) -> ServiceStatus {
    let state = state.trim().to_ascii_lowercase();
    let health = health.trim().to_ascii_lowercase();

    if state.contains("restart") {
        return ServiceStatus::Starting;
    }

    match state.as_str() {
        "running" => match health.as_str() {
            "" | "none" => ServiceStatus::Running,
            "healthy" => ServiceStatus::Healthy,
            "unhealthy" => ServiceStatus::Unhealthy,
            _ => ServiceStatus::Starting,
        },
        "" => ServiceStatus::NotFound,
        "exited" | "dead" | "removing" => ServiceStatus::Unhealthy,
        _ => ServiceStatus::Starting,
    }
}

fn health_from_status_text(status: &str) -> &'static str {
    let status = status.to_ascii_lowercase();
    if status.contains("(unhealthy)") {
        "unhealthy"
    } else if status.contains("(healthy)") {
        "healthy"
    } else if status.contains("health: starting") {
        "starting"
    } else {
        ""
    }
}

/// Status of the least-ready replica of `service`, or `NotFound`.
pub fn status_for_service(entries: &[PsEntry], service: &str) -> ServiceStatus {
    entries
        .iter()
        .filter(|e| e.service == service)
        .map(PsEntry::inferred_status)
        .min_by_key(ServiceStatus::readiness_rank)
        .unwrap_or(ServiceStatus::NotFound)
}

/// Builds the state for a freshly started project. The first replica of a
/// scaled service (by container name) represents it.
pub fn compose_state_from_entries(
    project_name: &str,
    stack_name: &str,
    entries: &[PsEntry],
) -> ComposeState {
    let mut sorted: Vec<&PsEntry> = entries.iter().filter(|e| !e.service.is_empty()).collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut state = ComposeState::new(project_name, stack_name);
    for entry in sorted {
        state
            .services
            .entry(entry.service.clone())
            .or_insert_with(|| entry.to_service_info());
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    const NDJSON: &str = r#"{"ID":"aaa111","Name":"p1-web-1","Service":"web","State":"running","Health":"healthy","Status":"Up 3 seconds (healthy)","Publishers":[{"URL":"0.0.0.0","TargetPort":8080,"PublishedPort":54321,"Protocol":"tcp"},{"URL":"::","TargetPort":8080,"PublishedPort":54321,"Protocol":"tcp"},{"URL":"","TargetPort":9000,"PublishedPort":0,"Protocol":"tcp"}]}
{"ID":"bbb222","Name":"p1-db-1","Service":"db","State":"running","Health":"","Status":"Up 3 seconds","Publishers":null}
"#;

    #[test]
    fn parses_newline_delimited_json() {
        let entries = parse_ps_output(NDJSON).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].service, "web");
        assert_eq!(entries[1].publishers, None);
    }

    #[test]
    fn parses_json_array() {
        let out = r#"[{"ID":"c1","Name":"p-api-1","Service":"api","State":"exited"}]"#;
        let entries = parse_ps_output(out).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].inferred_status(), ServiceStatus::Unhealthy);
    }

    #[test]
    fn empty_output_is_no_containers() {
        assert!(parse_ps_output("  \n").unwrap().is_empty());
    }

    #[test]
    fn garbage_output_is_parse_error() {
        let err = parse_ps_output("NAME  IMAGE  STATUS").unwrap_err();
        assert!(matches!(err, EnvError::Parse { .. }));
    }

    #[test]
    fn ports_skip_unpublished_and_duplicates() {
        let entries = parse_ps_output(NDJSON).unwrap();
        assert_eq!(entries[0].port_mappings(), vec![PortMapping::tcp(8080, 54321)]);
        assert!(entries[1].port_mappings().is_empty());
    }

    #[test]
    fn infers_status_from_state_and_health() {
        assert_eq!(infer_status("running", ""), ServiceStatus::Running);
        assert_eq!(infer_status("running", "healthy"), ServiceStatus::Healthy);
        assert_eq!(infer_status("running", "unhealthy"), ServiceStatus::Unhealthy);
        assert_eq!(infer_status("running", "starting"), ServiceStatus::Starting);
        assert_eq!(infer_status("restarting", ""), ServiceStatus::Starting);
        assert_eq!(infer_status("Restarting", "healthy"), ServiceStatus::Starting);
        assert_eq!(infer_status("created", ""), ServiceStatus::Starting);
        assert_eq!(infer_status("exited", ""), ServiceStatus::Unhealthy);
        assert_eq!(infer_status("", ""), ServiceStatus::NotFound);
    }

    #[test]
    fn health_falls_back_to_status_text() {
        let entry = PsEntry {
            state: "running".into(),
            status: "Up 10 seconds (health: starting)".into(),
            ..Default::default()
        };
        assert_eq!(entry.inferred_status(), ServiceStatus::Starting);

        let entry = PsEntry {
            state: "running".into(),
            status: "Up 1 minute (unhealthy)".into(),
            ..Default::default()
        };
        assert_eq!(entry.inferred_status(), ServiceStatus::Unhealthy);
    }

    #[test]
    fn least_ready_replica_wins() {
        let entries = vec![
            PsEntry {
                service: "worker".into(),
                state: "running".into(),
                health: "healthy".into(),
                ..Default::default()
            },
            PsEntry {
                service: "worker".into(),
                state: "running".into(),
                health: "starting".into(),
                ..Default::default()
            },
        ];
        assert_eq!(status_for_service(&entries, "worker"), ServiceStatus::Starting);
        assert_eq!(status_for_service(&entries, "other"), ServiceStatus::NotFound);
    }

    #[test]
    fn builds_state_keyed_by_service() {
        let entries = parse_ps_output(NDJSON).unwrap();
        let state = compose_state_from_entries("p1", "stack", &entries);

        assert_eq!(state.services.len(), 2);
        let web = state.service("web").unwrap();
        assert_eq!(web.container_id, "aaa111");
        assert_eq!(web.container_name, "p1-web-1");
        assert_eq!(web.host_port(8080), Some(54321));
        assert_eq!(state.service("db").unwrap().state, "running");
    }
}
