//! End-to-end scenarios against the public Sheriff/ScriptManager API,
//! driven purely through `MemoryTransport` — no deputy process involved.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use sheriff::commands::{CommandSpec, Status};
use sheriff::ids::SheriffId;
use sheriff::script::model::{Action, ActionKind, Target, WaitStatusKind};
use sheriff::script::ScriptEvent;
use sheriff::sheriff::AddCommandRequest;
use sheriff::transport::memory::MemoryTransport;
use sheriff::transport::Transport;
use sheriff::{Sheriff, SheriffEvent};

fn spec(id: &str) -> CommandSpec {
    CommandSpec {
        exec_str: "/bin/sleep 60".into(),
        command_id: id.into(),
        group: String::new(),
        auto_respawn: false,
        stop_signal: 15,
        stop_time_allowed: 5,
    }
}

fn deputy_report(transport: &MemoryTransport, deputy_id: &str, id: &str, actual_runid: u32, pid: i32, exit_code: i32) {
    use sheriff::transport::ReportedCommand;

    transport.inject_deputy_info(sheriff::transport::DeputyInfo {
        send_micros: 1,
        deputy_id: deputy_id.into(),
        cpu_load: 0.0,
        phys_mem_total: 0,
        phys_mem_free: 0,
        cmds: vec![ReportedCommand {
            spec: spec(id),
            actual_runid,
            pid,
            exit_code,
            cpu_usage: 0.0,
            mem_vsize: 0,
            mem_rss: 0,
        }],
    });
}

fn drain_into(sheriff: &Sheriff, transport: &MemoryTransport) {
    for msg in transport.poll_deputy_info() {
        sheriff.on_deputy_info(msg.unwrap());
    }
}

#[test]
fn add_and_start_reaches_running() {
    let transport = Arc::new(MemoryTransport::new());
    let sheriff = Sheriff::new(SheriffId("sh1".into()), transport.clone(), false);

    sheriff
        .add_command(AddCommandRequest { deputy_id: "dep1".into(), spec: spec("s1") })
        .unwrap();
    assert_eq!(sheriff.get_command_by_id(&"s1".into()).unwrap().status(), Status::Unknown);

    deputy_report(&transport, "dep1", "s1", 0, 0, 0);
    drain_into(&sheriff, &transport);
    assert_eq!(sheriff.get_command_by_id(&"s1".into()).unwrap().status(), Status::TryingToStart);

    deputy_report(&transport, "dep1", "s1", 1, 4242, 0);
    drain_into(&sheriff, &transport);
    assert_eq!(sheriff.get_command_by_id(&"s1".into()).unwrap().status(), Status::Running);

    sheriff.shutdown();
}

#[test]
fn stop_round_trip_reaches_stopped_ok() {
    let transport = Arc::new(MemoryTransport::new());
    let sheriff = Sheriff::new(SheriffId("sh1".into()), transport.clone(), false);

    sheriff
        .add_command(AddCommandRequest { deputy_id: "dep1".into(), spec: spec("s1") })
        .unwrap();
    deputy_report(&transport, "dep1", "s1", 1, 1234, 0);
    drain_into(&sheriff, &transport);
    assert_eq!(sheriff.get_command_by_id(&"s1".into()).unwrap().status(), Status::Running);

    sheriff.stop_command(&"s1".into()).unwrap();
    assert_eq!(sheriff.get_command_by_id(&"s1".into()).unwrap().status(), Status::TryingToStop);

    deputy_report(&transport, "dep1", "s1", 1, 0, 0);
    drain_into(&sheriff, &transport);
    assert_eq!(sheriff.get_command_by_id(&"s1".into()).unwrap().status(), Status::StoppedOk);

    sheriff.shutdown();
}

#[test]
fn removal_is_confirmed_only_after_deputy_omits_it() {
    let transport = Arc::new(MemoryTransport::new());
    let sheriff = Sheriff::new(SheriffId("sh1".into()), transport.clone(), false);

    sheriff
        .add_command(AddCommandRequest { deputy_id: "dep1".into(), spec: spec("s1") })
        .unwrap();
    deputy_report(&transport, "dep1", "s1", 1, 1234, 0);
    drain_into(&sheriff, &transport);

    sheriff.schedule_for_removal(&"s1".into()).unwrap();
    assert_eq!(sheriff.get_command_by_id(&"s1".into()).unwrap().status(), Status::Removing);

    // Deputy still reports it: stays present, still Removing.
    deputy_report(&transport, "dep1", "s1", 1, 1234, 0);
    drain_into(&sheriff, &transport);
    assert!(sheriff.get_command_by_id(&"s1".into()).is_some());

    // Deputy omits it from the next report: the Sheriff drops the record.
    transport.inject_deputy_info(sheriff::transport::DeputyInfo {
        send_micros: 2,
        deputy_id: "dep1".into(),
        cpu_load: 0.0,
        phys_mem_total: 0,
        phys_mem_free: 0,
        cmds: vec![],
    });
    drain_into(&sheriff, &transport);
    assert!(sheriff.get_command_by_id(&"s1".into()).is_none());

    sheriff.shutdown();
}

#[test]
fn foreign_orders_are_a_conflict_outside_observer_mode() {
    let transport = Arc::new(MemoryTransport::new());
    let sheriff = Sheriff::new(SheriffId("sh1".into()), transport.clone(), false);

    let (tx, rx) = mpsc::channel();
    sheriff.add_listener(move |event| {
        let _ = tx.send(event);
    });

    transport
        .publish_orders(&sheriff::transport::Orders {
            send_micros: 0,
            deputy_id: "dep1".into(),
            sheriff_id: SheriffId("rival".into()),
            cmds: vec![],
        })
        .unwrap();
    for msg in transport.poll_orders() {
        sheriff.on_orders(msg.unwrap());
    }

    let event = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(event, SheriffEvent::SheriffConflictDetected(id) if id == SheriffId("rival".into())));

    sheriff.shutdown();
}

#[test]
fn observer_mode_treats_foreign_orders_as_state() {
    let transport = Arc::new(MemoryTransport::new());
    let sheriff = Sheriff::new(SheriffId("sh1".into()), transport.clone(), true);

    transport
        .publish_orders(&sheriff::transport::Orders {
            send_micros: 0,
            deputy_id: "dep1".into(),
            sheriff_id: SheriffId("rival".into()),
            cmds: vec![sheriff::transport::OrderedCommand { spec: spec("s1"), desired_runid: 1, force_quit: false }],
        })
        .unwrap();
    for msg in transport.poll_orders() {
        sheriff.on_orders(msg.unwrap());
    }

    assert!(sheriff.get_command_by_id(&"s1".into()).is_some());
    sheriff.shutdown();
}

#[test]
fn script_with_wait_sequences_through_events() {
    let transport = Arc::new(MemoryTransport::new());
    let sheriff = Sheriff::new(SheriffId("sh1".into()), transport.clone(), false);
    let manager = sheriff::ScriptManager::new();
    manager.wire(&sheriff);

    sheriff
        .add_command(AddCommandRequest { deputy_id: "dep1".into(), spec: spec("s1") })
        .unwrap();

    manager.add_script(
        "p".into(),
        vec![
            Action::StartStopRestart {
                kind: ActionKind::Start,
                target: Target::Cmd("s1".into()),
                wait_status: Some(WaitStatusKind::Running),
            },
            Action::WaitMs { delay_ms: 100 },
            Action::StartStopRestart {
                kind: ActionKind::Stop,
                target: Target::Cmd("s1".into()),
                wait_status: Some(WaitStatusKind::Stopped),
            },
        ],
    );

    let (tx, rx) = mpsc::channel();
    manager.add_listener(move |event| {
        let _ = tx.send(event);
    });

    manager.run_script("p").unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ScriptEvent::ScriptStarted("p".into()));
    assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ScriptEvent::ScriptActionExecuting(_)));

    // Deputy acknowledges the start.
    deputy_report(&transport, "dep1", "s1", 1, 1234, 0);
    drain_into(&sheriff, &transport);

    assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ScriptEvent::ScriptActionExecuting(Action::WaitMs { .. })));
    assert!(matches!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ScriptEvent::ScriptActionExecuting(_)));

    deputy_report(&transport, "dep1", "s1", 1, 0, 0);
    drain_into(&sheriff, &transport);

    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), ScriptEvent::ScriptFinished("p".into()));

    sheriff.shutdown();
    manager.shutdown();
}

#[test]
fn script_cycle_is_rejected_with_infinite_loop_message() {
    let manager = sheriff::ScriptManager::new();
    manager.add_script("p".into(), vec![Action::RunScript { name: "q".into() }]);
    manager.add_script("q".into(), vec![Action::RunScript { name: "p".into() }]);

    let errors = manager.check_script_for_errors("p");
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|e| e.to_lowercase().contains("infinite loop")));

    manager.shutdown();
}
