use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use gantry::backend::{BackendEvent, ExecSpec, MachineBackend, ProcessKind};
use gantry::config::GantryConfig;
use gantry::console::{ConsoleOrchestrator, ProcessState};
use gantry::exec::ShellBackend;

fn temp_workspace(name: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("gantry-shell-{name}-{ts}"));
    fs::create_dir_all(&root).expect("mkdir workspace");
    root
}

#[test]
fn backend_streams_output_and_reports_exit() {
    let root = temp_workspace("stream");
    let (events_tx, events_rx) = mpsc::channel();
    let mut backend = ShellBackend::new(events_tx);
    let machine_id = backend
        .register_machine("stream", root)
        .expect("register machine");

    backend
        .exec_process(
            &machine_id,
            "cmd-1",
            ProcessKind::Command,
            &ExecSpec::shell("printf alpha-out"),
        )
        .expect("exec");

    let mut saw_ack = false;
    let mut saw_output = false;
    let mut exit_diagnostic = None;
    for _ in 0..50 {
        if saw_ack && saw_output && exit_diagnostic.is_some() {
            break;
        }
        let Ok(event) = events_rx.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        match event {
            BackendEvent::ExecStarted { process_id } => {
                assert_eq!(process_id, "cmd-1");
                saw_ack = true;
            }
            BackendEvent::Output { process_id, chunk } => {
                if process_id == "cmd-1"
                    && String::from_utf8_lossy(&chunk).contains("alpha-out")
                {
                    saw_output = true;
                }
            }
            BackendEvent::ProcessExited {
                process_id,
                diagnostic,
            } => {
                assert_eq!(process_id, "cmd-1");
                exit_diagnostic = Some(diagnostic);
            }
            _ => {}
        }
    }

    assert!(saw_ack);
    assert!(saw_output);
    assert_eq!(exit_diagnostic.as_deref(), Some("exit=0"));
}

#[test]
fn exec_on_unknown_machine_is_rejected() {
    let (events_tx, _events_rx) = mpsc::channel();
    let mut backend = ShellBackend::new(events_tx);
    let error = backend
        .exec_process(
            "ghost",
            "cmd-1",
            ProcessKind::Command,
            &ExecSpec::shell("true"),
        )
        .expect_err("unknown machine");
    assert_eq!(error.status, 404);
}

#[test]
fn start_machine_rejects_a_missing_directory() {
    let (events_tx, events_rx) = mpsc::channel();
    let mut backend = ShellBackend::new(events_tx);
    let error = backend
        .start_machine("/nonexistent/gantry/workspace")
        .expect_err("missing directory");
    assert_eq!(error.status, 400);
    assert!(events_rx.try_recv().is_err(), "no machine event on failure");
}

#[test]
fn orchestrator_runs_a_command_to_completion() {
    let root = temp_workspace("complete");
    let (events_tx, events_rx) = mpsc::channel();
    let backend = ShellBackend::new(events_tx);
    let mut orchestrator =
        ConsoleOrchestrator::new(GantryConfig::default(), Box::new(backend), events_rx);

    orchestrator
        .open_context(&root.display().to_string())
        .expect("open context");
    pump_until(&mut orchestrator, |orchestrator| {
        orchestrator.registry().len() == 1
    });
    let machine_id = orchestrator.registry().list()[0].id.clone();
    assert_eq!(
        orchestrator
            .registry()
            .dev_machine()
            .map(|machine| machine.id.clone()),
        Some(machine_id.clone())
    );

    let process_id = orchestrator
        .launch(
            &machine_id,
            ProcessKind::Command,
            "greet",
            ExecSpec::shell("printf 'hello from gantry\\n'"),
        )
        .expect("launch");

    // Output chunks and the exit report come from different reader threads,
    // so wait for both rather than assuming an order.
    pump_until(&mut orchestrator, |orchestrator| {
        let stopped = orchestrator
            .process(&process_id)
            .is_some_and(|process| process.state == ProcessState::Stopped);
        let greeted = orchestrator
            .output()
            .sink(&process_id)
            .is_some_and(|sink| sink.lines().any(|line| line.contains("hello from gantry")));
        stopped && greeted
    });

    let sink = orchestrator.output().sink(&process_id).expect("sink");
    assert!(sink.lines().any(|line| line == "exit=0"));

    orchestrator.close(&process_id).expect("close");
    assert!(orchestrator.tree().children_of(&machine_id).is_empty());
}

#[test]
fn orchestrator_stop_terminates_a_long_running_process() {
    let root = temp_workspace("stop");
    let (events_tx, events_rx) = mpsc::channel();
    let backend = ShellBackend::with_grace_timeout(events_tx, Duration::from_secs(1));
    let mut orchestrator =
        ConsoleOrchestrator::new(GantryConfig::default(), Box::new(backend), events_rx);

    orchestrator
        .open_context(&root.display().to_string())
        .expect("open context");
    pump_until(&mut orchestrator, |orchestrator| {
        orchestrator.registry().len() == 1
    });
    let machine_id = orchestrator.registry().list()[0].id.clone();

    let process_id = orchestrator
        .launch(
            &machine_id,
            ProcessKind::Command,
            "serve",
            ExecSpec::shell("sleep 30"),
        )
        .expect("launch");
    pump_until(&mut orchestrator, |orchestrator| {
        orchestrator
            .process(&process_id)
            .is_some_and(|process| process.state == ProcessState::Running)
    });

    orchestrator.stop(&process_id).expect("stop");
    assert_eq!(
        orchestrator.process(&process_id).expect("process").state,
        ProcessState::Stopping
    );

    pump_until(&mut orchestrator, |orchestrator| {
        orchestrator
            .process(&process_id)
            .is_some_and(|process| process.state == ProcessState::Stopped)
    });
    orchestrator.close(&process_id).expect("close");
}

fn pump_until<F>(orchestrator: &mut ConsoleOrchestrator, mut done: F)
where
    F: FnMut(&ConsoleOrchestrator) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        orchestrator.pump();
        orchestrator.tick(Instant::now());
        if done(orchestrator) {
            return;
        }
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(25));
    }
}
