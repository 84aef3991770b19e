use super::compose_adapter::ComposeCommand;
use super::compose_file::declared_services;
use crate::domain::{
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_STATE_DIR, DEFAULT_WAIT_TIMEOUT, Scope,
    ScopeRequest, TargetStatus,
};
use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_TOML_NAME: &str = "testbox.toml";

pub fn default_config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config/testbox")
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct EngineConfig {
    /// Compose program, e.g. `docker` or `docker-compose`
    pub program: Option<String>,
    /// Leading arguments, e.g. `["compose"]`
    pub compose_args: Option<Vec<String>>,
    /// Program for container-level `ps`/`rm`
    pub container_program: Option<String>,
    pub command_timeout: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct WaitDefaults {
    pub timeout: Option<String>,
    pub poll_interval: Option<String>,
    pub target: Option<TargetStatus>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct StateConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    pub compose_files: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub lifecycle: Option<Scope>,
    #[serde(default)]
    pub target: Option<TargetStatus>,
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub poll_interval: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub wait: WaitDefaults,
    #[serde(default)]
    pub state: StateConfig,
    /// Stacks defined inline as [stacks.NAME]
    #[serde(default)]
    pub stacks: Option<HashMap<String, StackConfig>>,
}

impl AppConfig {
    /// Merges another AppConfig into self.
    /// Values from `other` overwrite values in `self` if present.
    pub fn merge(&mut self, other: AppConfig) {
        if let Some(program) = other.engine.program {
            self.engine.program = Some(program);
        }
        if let Some(args) = other.engine.compose_args {
            self.engine.compose_args = Some(args);
        }
        if let Some(program) = other.engine.container_program {
            self.engine.container_program = Some(program);
        }
        if let Some(timeout) = other.engine.command_timeout {
            self.engine.command_timeout = Some(timeout);
        }
        if let Some(timeout) = other.wait.timeout {
            self.wait.timeout = Some(timeout);
        }
        if let Some(interval) = other.wait.poll_interval {
            self.wait.poll_interval = Some(interval);
        }
        if let Some(target) = other.wait.target {
            self.wait.target = Some(target);
        }
        if let Some(dir) = other.state.dir {
            self.state.dir = Some(dir);
        }

        // Stacks with same name in 'other' overwrite existing
        if let Some(other_stacks) = other.stacks {
            match &mut self.stacks {
                Some(existing) => existing.extend(other_stacks),
                None => self.stacks = Some(other_stacks),
            }
        }
    }

    /// Explicit compose command from config, if any part of it was set.
    pub fn compose_command(&self) -> Option<ComposeCommand> {
        if self.engine.program.is_none() && self.engine.compose_args.is_none() {
            return None;
        }

        let default = ComposeCommand::default();
        Some(ComposeCommand {
            program: self.engine.program.clone().unwrap_or(default.program),
            base_args: match (&self.engine.program, &self.engine.compose_args) {
                (_, Some(args)) => args.clone(),
                // A custom program without args is assumed to be a standalone compose binary.
                (Some(_), None) => Vec::new(),
                (None, None) => default.base_args,
            },
        })
    }

    pub fn container_program(&self) -> &str {
        self.engine.container_program.as_deref().unwrap_or("docker")
    }

    pub fn command_timeout(&self) -> Result<Duration> {
        self.engine
            .command_timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map(|d| d.unwrap_or(DEFAULT_COMMAND_TIMEOUT))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state
            .dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
    }

    pub fn stack_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stacks
            .as_ref()
            .map(|stacks| stacks.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn stack(&self, name: &str) -> Result<&StackConfig> {
        self.stacks
            .as_ref()
            .and_then(|stacks| stacks.get(name))
            .ok_or_else(|| anyhow!("stack '{name}' is not defined in {DEFAULT_CONFIG_TOML_NAME}"))
    }

    /// Compose files of a stack, relative paths taken from `base_dir`.
    pub fn compose_files(&self, name: &str, base_dir: &Path) -> Result<Vec<PathBuf>> {
        let stack = self.stack(name)?;
        if stack.compose_files.is_empty() {
            bail!("stack '{name}' declares no compose_files");
        }

        stack
            .compose_files
            .iter()
            .map(|raw| expand_path(raw, base_dir))
            .collect()
    }

    /// Resolves a named stack into the values the lifecycle core consumes.
    ///
    /// Relative compose file paths are taken from `base_dir`. When the stack
    /// lists no services, every service declared in its compose files is awaited.
    pub fn resolve_stack(
        &self,
        name: &str,
        discriminator: &[String],
        base_dir: &Path,
    ) -> Result<ScopeRequest> {
        let stack = self.stack(name)?;
        let compose_files = self.compose_files(name, base_dir)?;

        let services = if stack.services.is_empty() {
            let declared = declared_services(&compose_files)?;
            debug!(stack = name, services = ?declared, "waiting for all declared services");
            declared
        } else {
            stack.services.clone()
        };

        let timeout = match stack.timeout.as_deref().or(self.wait.timeout.as_deref()) {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_WAIT_TIMEOUT,
        };
        let poll_interval = match stack
            .poll_interval
            .as_deref()
            .or(self.wait.poll_interval.as_deref())
        {
            Some(raw) => parse_duration(raw)?,
            None => DEFAULT_POLL_INTERVAL,
        };
        let target = stack.target.or(self.wait.target).unwrap_or_default();

        Ok(ScopeRequest::new(name, compose_files)
            .scope(stack.lifecycle.unwrap_or_default())
            .discriminator(discriminator.iter().cloned())
            .services(services)
            .target(target)
            .timeout(timeout)
            .poll_interval(poll_interval)
            .state_dir(self.state_dir()))
    }
}

fn expand_path(raw: &str, base_dir: &Path) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("expanding compose file path {raw:?}"))?;
    let path = PathBuf::from(expanded.as_ref());
    Ok(if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    })
}

/// Parses `500ms`, `30s`, `2m` or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let parse = |num: &str| -> Result<u64> {
        num.trim()
            .parse::<u64>()
            .with_context(|| format!("invalid duration: {s}"))
    };

    if let Some(stripped) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(parse(stripped)?))
    } else if let Some(stripped) = s.strip_suffix('s') {
        Ok(Duration::from_secs(parse(stripped)?))
    } else if let Some(stripped) = s.strip_suffix('m') {
        Ok(Duration::from_secs(parse(stripped)? * 60))
    } else {
        Ok(Duration::from_secs(parse(s)?))
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    toml::from_str(&content).with_context(|| format!("parsing {:?}", path))
}

/// Loads `<config_dir>/testbox.toml`, then overlays `./testbox.toml` if present.
pub fn load_app_config(config_dir: &Path) -> Result<AppConfig> {
    load_app_config_from(
        &config_dir.join(DEFAULT_CONFIG_TOML_NAME),
        &PathBuf::from("./").join(DEFAULT_CONFIG_TOML_NAME),
    )
}

pub fn load_app_config_from(global_path: &Path, local_path: &Path) -> Result<AppConfig> {
    let mut app_config = AppConfig::default();

    if global_path.exists() {
        app_config = read_config(global_path)?;
    }

    if local_path.exists() {
        app_config.merge(read_config(local_path)?);
    }

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[engine]
command_timeout = "90s"

[wait]
timeout = "45s"
poll_interval = "250ms"

[state]
dir = "/tmp/testbox-state"

[stacks.web]
compose_files = ["compose.yml", "compose.ci.yml"]
services = ["web", "db"]
lifecycle = "method"
target = "running"

[stacks.minimal]
compose_files = ["minimal.yml"]
"#;

    #[test]
    fn parses_stacks_from_toml() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        let web = config.stack("web").unwrap();

        assert_eq!(web.compose_files, vec!["compose.yml", "compose.ci.yml"]);
        assert_eq!(web.lifecycle, Some(Scope::Method));
        assert_eq!(web.target, Some(TargetStatus::Running));
        assert_eq!(config.stack_names(), vec!["minimal", "web"]);
        assert_eq!(config.command_timeout().unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn rejects_stack_without_compose_files_field() {
        let result = toml::from_str::<AppConfig>("[stacks.broken]\nservices = [\"a\"]\n");
        assert!(result.is_err());
    }

    #[test]
    fn resolves_stack_with_defaults_and_overrides() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        let request = config
            .resolve_stack("web", &["ClassA".into(), "methodX".into()], Path::new("/repo"))
            .unwrap();

        assert_eq!(
            request.compose_files,
            vec![
                PathBuf::from("/repo/compose.yml"),
                PathBuf::from("/repo/compose.ci.yml")
            ]
        );
        assert_eq!(request.scope, Scope::Method);
        assert_eq!(request.target, TargetStatus::Running);
        assert_eq!(request.timeout, Duration::from_secs(45));
        assert_eq!(request.poll_interval, Duration::from_millis(250));
        assert_eq!(request.discriminator, vec!["ClassA", "methodX"]);
        assert_eq!(request.state_dir, PathBuf::from("/tmp/testbox-state"));
    }

    #[test]
    fn resolves_services_from_compose_files_when_unlisted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("minimal.yml"),
            "services:\n  api:\n    image: busybox\n",
        )
        .unwrap();

        let config: AppConfig = toml::from_str(SAMPLE).unwrap();
        let request = config.resolve_stack("minimal", &[], dir.path()).unwrap();

        assert_eq!(request.services, vec!["api"]);
        assert_eq!(request.scope, Scope::Class);
        assert_eq!(request.target, TargetStatus::Healthy);
    }

    #[test]
    fn compose_files_resolve_without_reading_them() {
        let config: AppConfig = toml::from_str(SAMPLE).unwrap();

        assert_eq!(
            config.compose_files("minimal", Path::new("/repo")).unwrap(),
            vec![PathBuf::from("/repo/minimal.yml")]
        );
        assert!(config.compose_files("nope", Path::new("/repo")).is_err());
    }

    #[test]
    fn unknown_stack_is_an_error() {
        let config = AppConfig::default();
        let err = config.resolve_stack("nope", &[], Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("stack 'nope'"));
    }

    #[test]
    fn merge_overrides_and_extends() {
        let mut base: AppConfig = toml::from_str(SAMPLE).unwrap();
        let local: AppConfig = toml::from_str(
            r#"
[engine]
program = "podman-compose"

[stacks.web]
compose_files = ["local.yml"]

[stacks.extra]
compose_files = ["extra.yml"]
"#,
        )
        .unwrap();

        base.merge(local);

        assert_eq!(base.stack_names(), vec!["extra", "minimal", "web"]);
        assert_eq!(base.stack("web").unwrap().compose_files, vec!["local.yml"]);
        assert_eq!(base.wait.timeout.as_deref(), Some("45s"));
        let compose = base.compose_command().unwrap();
        assert_eq!(compose.program, "podman-compose");
        assert!(compose.base_args.is_empty());
    }

    #[test]
    fn compose_command_defaults_to_detection() {
        assert!(AppConfig::default().compose_command().is_none());
        assert_eq!(AppConfig::default().container_program(), "docker");
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("10ms").unwrap(), Duration::from_millis(10));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(" 7 ").unwrap(), Duration::from_secs(7));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn loads_and_merges_global_and_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let local = dir.path().join("local.toml");
        fs::write(&global, SAMPLE).unwrap();
        fs::write(&local, "[wait]\ntarget = \"running\"\n").unwrap();

        let config = load_app_config_from(&global, &local).unwrap();
        assert_eq!(config.wait.target, Some(TargetStatus::Running));
        assert_eq!(config.stack_names().len(), 2);

        let missing = load_app_config_from(&dir.path().join("a"), &dir.path().join("b")).unwrap();
        assert!(missing.stacks.is_none());
    }
}
