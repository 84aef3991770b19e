use anyhow::Result;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use testbox::domain::{PortMapping, Scope, ScopeRequest, ServiceStatus, TargetStatus};
use testbox::infra::config::load_app_config_from;
use testbox::services::{LifecycleCoordinator, LifecycleState, StateFile};
use testbox::test_support::{FakeClock, MockComposeRuntime};

fn setup() -> (LifecycleCoordinator, Arc<MockComposeRuntime>, Arc<FakeClock>) {
    let mock = Arc::new(MockComposeRuntime::new());
    let clock = Arc::new(FakeClock::new());
    let coordinator = LifecycleCoordinator::new(mock.clone(), clock.clone());
    (coordinator, mock, clock)
}

fn request(state_dir: &std::path::Path) -> ScopeRequest {
    ScopeRequest::new("payments", vec!["compose.yml".into()])
        .scope(Scope::Method)
        .discriminator(["PaymentsIT", "refunds"])
        .services(["api", "db"])
        .target(TargetStatus::Healthy)
        .timeout(Duration::from_secs(10))
        .poll_interval(Duration::from_millis(500))
        .state_dir(state_dir)
}

#[test]
fn test_full_lifecycle_publishes_then_cleans_up() -> Result<()> {
    let (coordinator, mock, _clock) = setup();
    let dir = tempfile::tempdir()?;
    mock.define_service("api", vec![PortMapping::tcp(8080, 49001)]);
    mock.define_service("db", vec![PortMapping::tcp(5432, 49002)]);
    mock.set_status_sequence(
        "api",
        vec![ServiceStatus::Starting, ServiceStatus::Running, ServiceStatus::Healthy],
    );

    let context = coordinator
        .enter_scope(&request(dir.path()))
        .map_err(anyhow::Error::new)?;
    assert_eq!(context.state(), LifecycleState::Ready);

    let state_file = context.state_file().unwrap().to_path_buf();
    let published = StateFile::load(&state_file)?;
    assert_eq!(published.stack_name, "payments");
    assert_eq!(published.lifecycle, Scope::Method);
    assert_eq!(published.host_port("api", 8080), Some(49001));
    assert_eq!(published.host_port("db", 5432), Some(49002));
    assert_eq!(&published.to_compose_state(), context.compose_state().unwrap());

    let project = context.project().unwrap().as_str().to_string();
    let report = coordinator.exit_scope(context);

    assert!(report.is_clean());
    assert_eq!(mock.container_count_matching(&project), 0);
    assert!(!state_file.exists());
    Ok(())
}

#[test]
fn test_timeout_during_entry_leaves_nothing_behind() -> Result<()> {
    let (coordinator, mock, clock) = setup();
    let dir = tempfile::tempdir()?;
    mock.define_service("api", vec![]);
    mock.define_service("db", vec![]);
    mock.set_status_sequence("db", vec![ServiceStatus::Starting]);

    let err = coordinator.enter_scope(&request(dir.path())).unwrap_err();

    assert!(err.kind().is_timeout());
    assert!(err.kind().to_string().contains("db (last status: STARTING)"));
    assert!(clock.elapsed() >= Duration::from_secs(10));

    let project = err.context.project().unwrap().as_str().to_string();
    assert_eq!(mock.container_count_matching(&project), 0);
    assert!(fs::read_dir(dir.path())?.next().is_none());

    // The hook still calls exit; it must not fail.
    let report = coordinator.exit_scope(err.context);
    assert!(report.is_clean());
    Ok(())
}

#[test]
fn test_publish_failure_is_reported_and_cleaned() -> Result<()> {
    let (coordinator, mock, _clock) = setup();
    let dir = tempfile::tempdir()?;
    mock.define_service("db", vec![PortMapping::tcp(5432, 49002)]);
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "x")?;
    let request = request(dir.path()).services(["db"]).state_dir(&blocker);

    let err = coordinator.enter_scope(&request).unwrap_err();

    assert!(err.kind().is_publish());
    let project = err.context.project().unwrap().as_str().to_string();
    let commands = mock.get_commands();
    assert!(commands.contains(&format!("down:{project}")));
    assert!(commands.contains(&format!("find:name:{project}")));
    assert!(commands.contains(&format!("find:label:{project}")));
    assert_eq!(mock.container_count_matching(&project), 0);
    Ok(())
}

#[test]
fn test_parallel_method_scopes_are_isolated() -> Result<()> {
    let (coordinator, mock, _clock) = setup();
    let dir = tempfile::tempdir()?;
    mock.define_service("api", vec![]);
    mock.define_service("db", vec![]);

    let contexts: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let coordinator = &coordinator;
                let request = request(dir.path())
                    .discriminator(vec!["PaymentsIT".to_string(), format!("case{i}")]);
                s.spawn(move || coordinator.enter_scope(&request))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let contexts: Vec<_> = contexts
        .into_iter()
        .map(|r| r.map_err(anyhow::Error::new))
        .collect::<Result<Vec<_>>>()?;
    let mut projects: Vec<String> = contexts
        .iter()
        .map(|c| c.project().unwrap().as_str().to_string())
        .collect();
    projects.sort();
    projects.dedup();
    assert_eq!(projects.len(), 6);

    let mut contexts = contexts.into_iter();
    let first = contexts.next().unwrap();
    let first_project = first.project().unwrap().as_str().to_string();
    coordinator.exit_scope(first);

    assert_eq!(mock.container_count_matching(&first_project), 0);
    for other in contexts {
        let project = other.project().unwrap().as_str().to_string();
        assert_eq!(mock.container_count_matching(&project), 2);
        assert!(other.state_file().unwrap().exists());
        coordinator.exit_scope(other);
    }
    Ok(())
}

#[test]
fn test_sibling_with_longer_name_keeps_state_file() -> Result<()> {
    let (coordinator, mock, _clock) = setup();
    let dir = tempfile::tempdir()?;
    mock.define_service("api", vec![]);
    mock.define_service("db", vec![]);

    let first = coordinator
        .enter_scope(&request(dir.path()).discriminator(["OrdersIT", "test"]))
        .map_err(anyhow::Error::new)?;
    let second = coordinator
        .enter_scope(&request(dir.path()).discriminator(["OrdersIT", "test[1]"]))
        .map_err(anyhow::Error::new)?;

    let report = coordinator.exit_scope(first);

    assert!(report.is_clean());
    assert!(second.state_file().unwrap().exists());
    assert_eq!(fs::read_dir(dir.path())?.count(), 1);
    coordinator.exit_scope(second);
    assert!(fs::read_dir(dir.path())?.next().is_none());
    Ok(())
}

#[test]
fn test_request_resolved_from_config_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(
        dir.path().join("compose.yml"),
        "services:\n  api:\n    image: nginx\n  cache:\n    image: redis\n",
    )?;
    let config_path = dir.path().join("testbox.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[wait]
timeout = "5s"
poll_interval = "100ms"

[state]
dir = "{}"

[stacks.shop]
compose_files = ["compose.yml"]
lifecycle = "suite"
target = "running"
"#,
            dir.path().join("state").display()
        ),
    )?;

    let config = load_app_config_from(&config_path, &dir.path().join("missing.toml"))?;
    let request = config.resolve_stack("shop", &[], dir.path())?;
    assert_eq!(request.services, vec!["api", "cache"]);

    let (coordinator, mock, _clock) = setup();
    mock.define_service("api", vec![]);
    mock.define_service("cache", vec![]);
    mock.set_status_sequence("cache", vec![ServiceStatus::Running]);

    let guard = coordinator
        .enter_guarded(&request)
        .map_err(anyhow::Error::new)?;
    let state_file = guard.state_file().unwrap().to_path_buf();
    assert!(state_file.starts_with(dir.path().join("state")));
    assert!(guard.project().unwrap().as_str().starts_with("shop-suite-"));
    assert!(state_file.exists());

    drop(guard);
    assert!(!state_file.exists());
    Ok(())
}
