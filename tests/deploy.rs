mod common;

use std::fs;

use bot_launcher::deploy::{ArtifactSource, ServiceSpec};
use bot_launcher::store::Status;
use bot_launcher::ErrorKind;

use common::{bare_spec, free_port, memory_app, wait_terminal};

fn template(base: &std::path::Path) -> std::path::PathBuf {
    let template = base.join("template");
    fs::create_dir_all(template.join("plugins")).unwrap();
    fs::write(template.join("bot.py"), "print('hello')\n").unwrap();
    fs::write(template.join("plugins").join("echo.py"), "# echo\n").unwrap();
    template
}

#[tokio::test]
async fn local_deployment_copies_files_and_records_services() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let template = template(home.path());

    let mut spec = bare_spec("alpha", "~/bots/alpha", free_port());
    spec.source = Some(ArtifactSource::Local {
        path: template.display().to_string(),
    });
    spec.services.push(ServiceSpec {
        name: "napcat".to_string(),
        path: "~/bots/alpha-napcat".to_string(),
        port: u32::from(free_port()),
        run_command: Some("./run.sh".to_string()),
        install_command: None,
        source: None,
    });

    let id = state.deploy(&spec).unwrap();
    assert_eq!(id.len(), 40);

    let snapshot = wait_terminal(&state, &id).await;
    assert_eq!(snapshot.status, Status::Stopped, "{}", snapshot.message);
    assert_eq!(snapshot.progress, 100);

    let install = home.path().join("bots").join("alpha");
    assert!(install.join("bot.py").is_file());
    assert!(install.join("plugins").join("echo.py").is_file());
    assert!(home.path().join("bots").join("alpha-napcat").is_dir());

    let record = state.store.get_instance(&id).unwrap().unwrap();
    assert_eq!(record.install_path, install);
    assert_eq!(record.status, Status::Stopped);
    let services = state.store.list_services(&id).unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].path, home.path().join("bots").join("alpha-napcat"));
}

#[cfg(unix)]
#[tokio::test]
async fn failing_install_command_marks_error_with_its_output() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let template = template(home.path());

    let mut spec = bare_spec("broken", "broken", free_port());
    spec.source = Some(ArtifactSource::Local {
        path: template.display().to_string(),
    });
    spec.install_command = Some("echo dependency missing >&2; exit 7".to_string());

    let id = state.deploy(&spec).unwrap();
    let snapshot = wait_terminal(&state, &id).await;
    assert_eq!(snapshot.status, Status::Error);
    assert!(snapshot.message.contains("dependency missing"), "{}", snapshot.message);
    assert_eq!(
        state.store.get_instance(&id).unwrap().unwrap().status,
        Status::Error
    );
    assert!(state.store.list_services(&id).unwrap().is_empty());
}

#[tokio::test]
async fn non_empty_target_directory_fails_the_deployment() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let template = template(home.path());
    fs::create_dir_all(home.path().join("taken")).unwrap();
    fs::write(home.path().join("taken").join("keep.txt"), "mine").unwrap();

    let mut spec = bare_spec("taken", "taken", free_port());
    spec.source = Some(ArtifactSource::Local {
        path: template.display().to_string(),
    });

    let id = state.deploy(&spec).unwrap();
    let snapshot = wait_terminal(&state, &id).await;
    assert_eq!(snapshot.status, Status::Error);
    assert_eq!(
        fs::read_to_string(home.path().join("taken").join("keep.txt")).unwrap(),
        "mine"
    );
}

#[tokio::test]
async fn duplicate_name_is_rejected_without_side_effects() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    fs::create_dir_all(home.path().join("one")).unwrap();

    state
        .register_existing(&bare_spec("same", "one", free_port()))
        .unwrap();
    let err = state
        .deploy(&bare_spec("same", "two", free_port()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!home.path().join("two").exists());
    assert_eq!(state.store.list_instances().unwrap().len(), 1);
}

#[tokio::test]
async fn register_existing_checks_every_path_first() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());

    let err = state
        .register_existing(&bare_spec("ghost", "~/nowhere", free_port()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    fs::create_dir_all(home.path().join("present")).unwrap();
    let mut spec = bare_spec("partial", "~/present", free_port());
    spec.services.push(ServiceSpec {
        name: "adapter".to_string(),
        path: "~/missing-adapter".to_string(),
        port: u32::from(free_port()),
        run_command: None,
        install_command: None,
        source: None,
    });
    let err = state.register_existing(&spec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.payload()["service"], "adapter");
    assert!(state.store.list_instances().unwrap().is_empty());
}

#[tokio::test]
async fn register_existing_records_stopped_instance_and_services() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    fs::create_dir_all(home.path().join("bot")).unwrap();
    fs::create_dir_all(home.path().join("adapter")).unwrap();

    let mut spec = bare_spec("registered", "~/bot", free_port());
    spec.services.push(ServiceSpec {
        name: "adapter".to_string(),
        path: "~/adapter".to_string(),
        port: u32::from(free_port()),
        run_command: Some("./adapter".to_string()),
        install_command: None,
        source: None,
    });
    let id = state.register_existing(&spec).unwrap();

    let snapshot = state.deployment_status(&id).unwrap();
    assert_eq!(snapshot.status, Status::Stopped);
    assert!(snapshot.terminal);
    assert_eq!(snapshot.services.len(), 1);

    let summaries = state.list_instances().unwrap();
    assert_eq!(summaries[0].install_path, home.path().join("bot"));
    assert_eq!(summaries[0].services[0].path, home.path().join("adapter"));
}

#[tokio::test]
async fn invalid_ports_and_service_names_are_validation_errors() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());

    let mut spec = bare_spec("ports", "ports", 8000);
    spec.port = 70_000;
    assert_eq!(
        state.deploy(&spec).unwrap_err().kind(),
        ErrorKind::Validation
    );

    let mut spec = bare_spec("names", "names", 8000);
    spec.services.push(ServiceSpec {
        name: "bad_name".to_string(),
        path: "svc".to_string(),
        port: 9000,
        run_command: None,
        install_command: None,
        source: None,
    });
    assert_eq!(
        state.deploy(&spec).unwrap_err().kind(),
        ErrorKind::Validation
    );
    assert!(state.store.list_instances().unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn one_failing_service_is_distinguishable_from_the_others() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let template = template(home.path());

    let mut spec = bare_spec("mixed", "~/mixed", free_port());
    spec.source = Some(ArtifactSource::Local {
        path: template.display().to_string(),
    });
    spec.services.push(ServiceSpec {
        name: "healthy".to_string(),
        path: "~/mixed-healthy".to_string(),
        port: u32::from(free_port()),
        run_command: Some("./run.sh".to_string()),
        install_command: Some("echo fine".to_string()),
        source: None,
    });
    spec.services.push(ServiceSpec {
        name: "broken".to_string(),
        path: "~/mixed-broken".to_string(),
        port: u32::from(free_port()),
        run_command: Some("./run.sh".to_string()),
        install_command: Some("echo adapter deps unavailable >&2; exit 4".to_string()),
        source: None,
    });

    let id = state.deploy(&spec).unwrap();
    let snapshot = wait_terminal(&state, &id).await;
    assert_eq!(snapshot.status, Status::Error);

    let healthy = snapshot
        .services
        .iter()
        .find(|s| s.name == "healthy")
        .unwrap();
    assert_eq!(healthy.status, Status::Stopped);
    assert_eq!(healthy.progress, 100);
    assert_eq!(healthy.message, "Ready");

    let broken = snapshot
        .services
        .iter()
        .find(|s| s.name == "broken")
        .unwrap();
    assert_eq!(broken.status, Status::Error);
    assert!(
        broken.message.contains("adapter deps unavailable"),
        "{}",
        broken.message
    );

    assert!(state.store.list_services(&id).unwrap().is_empty());
    assert_eq!(
        state.store.get_instance(&id).unwrap().unwrap().status,
        Status::Error
    );
}
