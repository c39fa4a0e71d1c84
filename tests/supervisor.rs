#![cfg(unix)]

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use bot_launcher::commands::AppState;
use bot_launcher::deploy::ServiceSpec;
use bot_launcher::process::{StopOutcome, TargetState, MAIN_ROLE};
use bot_launcher::session::{HistoryRange, Inbound, Outbound};
use bot_launcher::store::{FileStore, Status, Store};
use bot_launcher::ErrorKind;

use common::{app, bare_spec, eventually, fast_supervisor, free_port, memory_app};

fn register(state: &AppState, base: &std::path::Path, name: &str, command: &str) -> String {
    let dir = base.join(name);
    fs::create_dir_all(&dir).unwrap();
    let mut spec = bare_spec(name, &dir.display().to_string(), free_port());
    spec.run_command = Some(command.to_string());
    state.register_existing(&spec).unwrap()
}

fn main_status(state: &AppState, id: &str) -> Status {
    state.store.get_instance(id).unwrap().unwrap().status
}

async fn next_output(receiver: &mut tokio::sync::mpsc::Receiver<Outbound>, wanted: &str) -> bool {
    let wait = async {
        while let Some(message) = receiver.recv().await {
            if let Outbound::Output { data, .. } = message {
                if data == wanted {
                    return true;
                }
            }
        }
        false
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or(false)
}

#[tokio::test]
async fn start_and_stop_write_through_to_the_store() {
    let home = tempfile::tempdir().unwrap();
    let store: Arc<dyn Store> = Arc::new(FileStore::open(home.path().join("state.toml")).unwrap());
    let state = app(home.path(), store, &fast_supervisor());
    let id = register(&state, home.path(), "runner", "echo ready; exec sleep 30");

    let pid = state.start_instance(&id).await.unwrap();
    assert!(pid > 0);
    assert_eq!(main_status(&state, &id), Status::Running);
    let reopened = FileStore::open(home.path().join("state.toml")).unwrap();
    assert_eq!(
        reopened.get_instance(&id).unwrap().unwrap().status,
        Status::Running
    );

    let live = state.supervisor.target_status(&id, MAIN_ROLE);
    assert_eq!(live.state, TargetState::Running);
    assert_eq!(live.pid, Some(pid));

    let outcome = state.stop_instance(&id).await.unwrap();
    assert_eq!(outcome, StopOutcome::Graceful);
    assert_eq!(main_status(&state, &id), Status::Stopped);
    assert_eq!(
        state.supervisor.target_status(&id, MAIN_ROLE).state,
        TargetState::Stopped
    );
    assert!(!bot_launcher::process::is_process_alive(pid));

    assert_eq!(
        state.stop_instance(&id).await.unwrap(),
        StopOutcome::AlreadyStopped
    );
}

#[tokio::test]
async fn second_start_of_a_running_target_conflicts() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let id = register(&state, home.path(), "twice", "exec sleep 30");

    let (first, second) = tokio::join!(
        state.supervisor.start(&id, MAIN_ROLE),
        state.supervisor.start(&id, MAIN_ROLE)
    );
    let errors: Vec<_> = [first, second].into_iter().filter_map(Result::err).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind(), ErrorKind::Conflict);

    state.stop_instance(&id).await.unwrap();
}

#[tokio::test]
async fn crash_is_observed_and_persisted_as_stopped() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let id = register(&state, home.path(), "crasher", "sleep 0.2; exit 3");

    state.start_instance(&id).await.unwrap();
    assert!(eventually(|| main_status(&state, &id) == Status::Stopped).await);

    let live = state.supervisor.target_status(&id, MAIN_ROLE);
    assert_eq!(live.state, TargetState::Stopped);
    assert_eq!(live.pid, None);
    assert_eq!(live.last_exit_code, Some(3));
}

#[tokio::test]
async fn missing_working_directory_marks_error() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let id = register(&state, home.path(), "vanishing", "exec sleep 30");
    fs::remove_dir_all(home.path().join("vanishing")).unwrap();

    let err = state.start_instance(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::External);
    assert_eq!(main_status(&state, &id), Status::Error);
}

#[tokio::test]
async fn occupied_port_is_a_conflict() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();

    let dir = home.path().join("porty");
    fs::create_dir_all(&dir).unwrap();
    let mut spec = bare_spec("porty", &dir.display().to_string(), port);
    spec.run_command = Some("exec sleep 30".to_string());
    let id = state.register_existing(&spec).unwrap();

    let err = state.start_instance(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(main_status(&state, &id), Status::Stopped);
    drop(listener);
}

#[tokio::test]
async fn restart_that_needs_force_times_out_and_leaves_nothing_running() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let id = register(
        &state,
        home.path(),
        "stubborn",
        "trap '' TERM; echo ready; while true; do sleep 1; done",
    );

    let mut viewer = state
        .attach_viewer(&format!("{id}_main"), &HistoryRange::default())
        .unwrap();
    let pid = state.start_instance(&id).await.unwrap();
    assert!(next_output(&mut viewer.receiver, "ready").await);

    let err = state.restart_instance(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(!state.supervisor.has_live_process(&id));
    assert!(!bot_launcher::process::is_process_alive(pid));
    assert_eq!(main_status(&state, &id), Status::Stopped);
}

#[tokio::test]
async fn viewers_see_history_then_live_output_and_can_write_stdin() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let id = register(
        &state,
        home.path(),
        "echoer",
        "echo booted; while read line; do echo \"got $line\"; done",
    );
    let key = format!("{id}_main");

    let mut early = state.attach_viewer(&key, &HistoryRange::default()).unwrap();
    state.start_instance(&id).await.unwrap();
    assert!(next_output(&mut early.receiver, "booted").await);

    let late = state.attach_viewer(&key, &HistoryRange::default()).unwrap();
    assert!(late.history.iter().any(|entry| entry.line == "booted"));

    let reply = state.handle_inbound(
        &key,
        Inbound::Input {
            data: "hello\n".to_string(),
        },
    );
    assert!(reply.is_none(), "{reply:?}");
    assert!(next_output(&mut early.receiver, "got hello").await);

    assert_eq!(state.handle_inbound(&key, Inbound::Ping), Some(Outbound::Pong));
    assert!(matches!(
        state.handle_inbound("unknown_main", Inbound::Ping),
        Some(Outbound::Error { .. })
    ));

    state.stop_instance(&id).await.unwrap();
    let reply = state.handle_inbound(
        &key,
        Inbound::Input {
            data: "late\n".to_string(),
        },
    );
    assert!(matches!(reply, Some(Outbound::Error { .. })));
}

#[tokio::test]
async fn instance_start_brings_up_services_before_main() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let bot = home.path().join("bot");
    let adapter = home.path().join("adapter");
    fs::create_dir_all(&bot).unwrap();
    fs::create_dir_all(&adapter).unwrap();

    let mut spec = bare_spec("stack", &bot.display().to_string(), free_port());
    spec.run_command = Some("exec sleep 30".to_string());
    spec.services.push(ServiceSpec {
        name: "adapter".to_string(),
        path: adapter.display().to_string(),
        port: u32::from(free_port()),
        run_command: Some("exec sleep 30".to_string()),
        install_command: None,
        source: None,
    });
    let id = state.register_existing(&spec).unwrap();

    state.start_instance(&id).await.unwrap();
    let services = state.store.list_services(&id).unwrap();
    assert_eq!(services[0].status, Status::Running);
    assert_eq!(main_status(&state, &id), Status::Running);

    let stats = state.instance_stats().unwrap();
    assert_eq!((stats.total, stats.running, stats.stopped), (1, 1, 0));

    state.delete_instance(&id).await.unwrap();
    assert!(!state.supervisor.has_live_process(&id));
    assert!(state.store.get_instance(&id).unwrap().is_none());
    assert!(bot.is_dir());
}

#[tokio::test]
async fn failed_main_start_stops_the_services_it_brought_up() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let bot = home.path().join("bot");
    let adapter = home.path().join("adapter");
    fs::create_dir_all(&bot).unwrap();
    fs::create_dir_all(&adapter).unwrap();

    let mut spec = bare_spec("blocked", &bot.display().to_string(), port);
    spec.run_command = Some("exec sleep 30".to_string());
    spec.services.push(ServiceSpec {
        name: "adapter".to_string(),
        path: adapter.display().to_string(),
        port: u32::from(free_port()),
        run_command: Some("exec sleep 30".to_string()),
        install_command: None,
        source: None,
    });
    let id = state.register_existing(&spec).unwrap();

    let err = state.start_instance(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!state.supervisor.has_live_process(&id));
    assert_eq!(
        state.supervisor.target_status(&id, "adapter").state,
        TargetState::Stopped
    );
    let services = state.store.list_services(&id).unwrap();
    assert_eq!(services[0].status, Status::Stopped);
    assert_eq!(main_status(&state, &id), Status::Stopped);
    drop(listener);
}

#[tokio::test]
async fn carriage_return_output_reaches_viewers_line_by_line() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let id = register(
        &state,
        home.path(),
        "progress",
        "printf '10%%\\r50%%\\r100%%\\n'; exec sleep 30",
    );
    let key = format!("{id}_main");

    let mut viewer = state.attach_viewer(&key, &HistoryRange::default()).unwrap();
    state.start_instance(&id).await.unwrap();
    assert!(next_output(&mut viewer.receiver, "10%").await);
    assert!(next_output(&mut viewer.receiver, "50%").await);
    assert!(next_output(&mut viewer.receiver, "100%").await);

    state.stop_instance(&id).await.unwrap();
}

#[tokio::test]
async fn boot_reconciliation_resets_stale_running_records() {
    let home = tempfile::tempdir().unwrap();
    let state = memory_app(home.path());
    let id = register(&state, home.path(), "stale", "exec sleep 30");
    state
        .store
        .update_instance_status(&id, Status::Running)
        .unwrap();

    assert_eq!(state.recover().unwrap(), 1);
    assert_eq!(main_status(&state, &id), Status::Stopped);
}
