use super::sweep::parse_pids;
use super::*;
use crate::config::TimeBudget;
use crate::process::{signal, ProcessHandle};
use crate::test_support::{
    closed_port, eventually, fast_budget, spawn_cooperative, spawn_script, spawn_stubborn,
    RecordingInfra,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

const EPSILON: Duration = Duration::from_millis(500);

#[tokio::test]
async fn test_missing_handle_is_trivially_stopped() {
    let coordinator = ShutdownCoordinator::new(fast_budget());
    let outcomes = coordinator
        .shutdown_all(vec![ShutdownResource::Process(ProcessHandle::detached(
            "ingest", None,
        ))])
        .await;

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].succeeded);
    assert_eq!(outcomes[0].state, LadderState::Stopped);
    assert_eq!(outcomes[0].note, "no live process handle");
}

#[tokio::test]
async fn test_cooperative_process_stops_gracefully() {
    let budget = fast_budget();
    let process = spawn_cooperative("ingest");
    let pid = process.pid();

    let outcomes = ShutdownCoordinator::new(budget.clone())
        .shutdown_all(vec![ShutdownResource::Process(process.handle())])
        .await;

    assert!(outcomes[0].succeeded);
    assert_eq!(outcomes[0].note, "exited after graceful signal");
    assert!(outcomes[0].elapsed < budget.graceful_shutdown());
    assert!(!signal::is_process_running(pid));
}

#[tokio::test]
async fn test_stubborn_process_is_force_killed() {
    let budget = fast_budget();
    let process = spawn_stubborn("streaming");
    let handle = process.handle();

    // Give the shell time to install its trap
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let outcomes = ShutdownCoordinator::new(budget.clone())
        .shutdown_all(vec![ShutdownResource::Process(handle.clone())])
        .await;

    assert!(outcomes[0].succeeded, "{}", outcomes[0]);
    assert!(outcomes[0].note.starts_with("force killed")
        || outcomes[0].note.starts_with("exited during escalation"));
    assert!(started.elapsed() <= budget.escalation_bound() + EPSILON);
    assert!(!handle.is_alive());
}

#[tokio::test]
async fn test_already_exited_process() {
    let process = spawn_script("ingest", "exit 0");
    let mut handle = process.handle();
    handle.wait_for_exit().await;

    let outcomes = ShutdownCoordinator::new(fast_budget())
        .shutdown_all(vec![ShutdownResource::Process(handle)])
        .await;

    assert!(outcomes[0].succeeded);
}

#[tokio::test]
async fn test_global_deadline_bounds_hanging_resources() {
    let budget = TimeBudget {
        graceful_shutdown_ms: 5_000,
        overall_shutdown_ms: 600,
        ..fast_budget()
    };

    let stubborn: Vec<_> = (0..3)
        .map(|i| spawn_stubborn(&format!("worker-{}", i)))
        .collect();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut resources: Vec<ShutdownResource> = stubborn
        .iter()
        .map(|process| ShutdownResource::Process(process.handle()))
        .collect();
    resources.push(ShutdownResource::Infrastructure(Arc::new(
        RecordingInfra::hanging(),
    )));

    let started = Instant::now();
    let outcomes = ShutdownCoordinator::new(budget.clone())
        .shutdown_all(resources)
        .await;

    assert!(started.elapsed() <= budget.overall_shutdown() + EPSILON);
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|outcome| !outcome.succeeded));
    assert!(outcomes.iter().all(|outcome| outcome.state == LadderState::TimedOut));
    assert_eq!(outcomes[3].role, INFRASTRUCTURE_LABEL);
}

#[tokio::test]
async fn test_outcomes_follow_input_order() {
    let infra = Arc::new(RecordingInfra::default());
    let ingest = spawn_cooperative("ingest");
    let streaming = spawn_cooperative("streaming");

    let outcomes = ShutdownCoordinator::new(fast_budget())
        .shutdown_all(vec![
            ShutdownResource::Process(ingest.handle()),
            ShutdownResource::Process(streaming.handle()),
            ShutdownResource::Infrastructure(infra.clone()),
        ])
        .await;

    let roles: Vec<_> = outcomes.iter().map(|outcome| outcome.role.as_str()).collect();
    assert_eq!(roles, vec!["ingest", "streaming", INFRASTRUCTURE_LABEL]);
    assert!(outcomes.iter().all(|outcome| outcome.succeeded));
    assert_eq!(infra.stop_count(), 1);
}

#[tokio::test]
async fn test_sweep_failure_is_not_fatal() {
    let outcomes = ShutdownCoordinator::new(fast_budget())
        .with_port_sweep(true)
        .shutdown_all(vec![ShutdownResource::Process(ProcessHandle::detached(
            "streaming",
            Some(1),
        ))])
        .await;

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].succeeded);
}

#[tokio::test]
async fn test_background_children_die_with_their_worker() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("child.pid");
    // The background child ignores SIGTERM, so only the group kill reaches it
    let process = spawn_script(
        "ingest",
        &format!(
            "(trap '' TERM; exec sleep 300) & echo $! > {}; wait",
            pid_file.display()
        ),
    );

    assert!(
        eventually(Duration::from_secs(5), || {
            std::fs::read_to_string(&pid_file)
                .map(|contents| contents.ends_with('\n'))
                .unwrap_or(false)
        })
        .await
    );
    let child: u32 = std::fs::read_to_string(&pid_file)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(signal::is_process_running(child));

    let outcomes = ShutdownCoordinator::new(fast_budget())
        .shutdown_all(vec![ShutdownResource::Process(process.handle())])
        .await;

    assert!(outcomes[0].succeeded, "{}", outcomes[0]);
    assert!(!signal::is_process_running(process.pid()));
    assert!(
        eventually(Duration::from_secs(2), || !signal::is_process_running(child)).await,
        "background child {} outlived its worker",
        child
    );
}

#[tokio::test]
async fn test_sweep_kills_listener_of_detached_worker() {
    let port = closed_port().await;
    let listener = spawn_script(
        "streaming",
        &format!(
            "exec python3 -c \"import socket, time\n\
             s = socket.socket()\n\
             s.setsockopt(socket.SOL_SOCKET, socket.SO_REUSEADDR, 1)\n\
             s.bind(('127.0.0.1', {}))\n\
             s.listen()\n\
             time.sleep(300)\"",
            port
        ),
    );
    let pid = listener.pid();

    let bound = eventually(Duration::from_secs(5), || {
        std::net::TcpStream::connect(("127.0.0.1", port)).is_ok()
    })
    .await;
    if !bound {
        println!("Skipping: python3 listener did not come up");
        return;
    }

    let visible = std::process::Command::new("lsof")
        .args(["-t", "-n", "-P", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output()
        .map(|output| parse_pids(&String::from_utf8_lossy(&output.stdout)).contains(&pid))
        .unwrap_or(false);
    if !visible {
        println!("Skipping: lsof cannot see listener pid {}", pid);
        return;
    }

    // The pid is lost; only the port is left to go on
    let outcomes = ShutdownCoordinator::new(fast_budget())
        .with_port_sweep(true)
        .shutdown_all(vec![ShutdownResource::Process(ProcessHandle::detached(
            "streaming",
            Some(port),
        ))])
        .await;

    assert!(outcomes[0].succeeded);
    assert!(eventually(Duration::from_secs(2), || !signal::is_process_running(pid)).await);
}

#[test]
fn test_parse_lsof_pids() {
    assert_eq!(parse_pids("123\n456\n\nnot-a-pid\n"), vec![123, 456]);
    assert!(parse_pids("").is_empty());
}

#[test]
fn test_outcome_line() {
    let outcome = ShutdownOutcome {
        role: "ingest".to_string(),
        succeeded: false,
        elapsed: Duration::from_millis(1500),
        note: "timed out".to_string(),
        state: LadderState::TimedOut,
    };

    assert_eq!(outcome.to_string(), "ingest: FAILED after 1.5s (timed out)");
    let err = outcome.error().unwrap();
    assert!(!err.is_fatal());
    assert_eq!(
        err.to_string(),
        "ingest did not confirm termination after 1.5s: timed out"
    );
    assert!(LadderState::TimedOut.is_terminal());
    assert!(!LadderState::ForceKillPending.is_terminal());
}
