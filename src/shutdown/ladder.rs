use super::outcome::{LadderState, ShutdownOutcome};
use crate::config::TimeBudget;
use crate::infra::InfraLifecycle;
use crate::process::signal;
use crate::process::ProcessHandle;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum GracefulWait {
    Exited,
    Elapsed,
    Deadline,
}

/// graceful -> verify -> force kill -> retry, for one worker process.
///
/// Signals go to the worker's whole process group; the leader's liveness
/// decides the verdict. Steps run strictly in order. `deadline` is the global
/// shutdown deadline; once it fires the ladder reports a timeout instead of
/// waiting further.
pub(super) async fn run_process_ladder(
    mut handle: ProcessHandle,
    budget: TimeBudget,
    deadline: CancellationToken,
) -> ShutdownOutcome {
    let started = Instant::now();
    let role = handle.role.clone();

    let Some(pid) = handle.pid else {
        return ShutdownOutcome::stopped(&role, started.elapsed(), "no live process handle");
    };

    if handle.has_exited() && !signal::is_process_running(pid) {
        return stopped(&role, pid, started, "already exited");
    }

    let mut state = LadderState::Running;
    advance(&role, pid, &mut state, LadderState::GracefulPending);

    match signal::terminate_group(pid) {
        Ok(()) => {
            let wait = tokio::select! {
                _ = handle.wait_for_exit() => GracefulWait::Exited,
                _ = sleep(budget.graceful_shutdown()) => GracefulWait::Elapsed,
                _ = deadline.cancelled() => GracefulWait::Deadline,
            };

            match wait {
                GracefulWait::Exited => {
                    // The supervisor can report an exit while the pid still lingers
                    if !signal::is_process_running(pid) {
                        return stopped(&role, pid, started, "exited after graceful signal");
                    }
                    debug!("{} reported exit but pid {} is still present", role, pid);
                }
                GracefulWait::Elapsed => {
                    info!(
                        "{} did not exit within {:?}, escalating",
                        role,
                        budget.graceful_shutdown()
                    );
                }
                GracefulWait::Deadline => {
                    kill_group(&role, pid);
                    return ShutdownOutcome::timed_out(&role, started.elapsed());
                }
            }
        }
        Err(e) if signal::is_no_such_process(&e) => {
            return ShutdownOutcome::stopped(&role, started.elapsed(), "already exited");
        }
        Err(e) => warn!("Failed to send graceful signal to {} (pid {}): {}", role, pid, e),
    }

    advance(&role, pid, &mut state, LadderState::ForceKillPending);

    for attempt in 1..=budget.max_kill_retries {
        if !signal::is_process_running(pid) {
            return stopped(
                &role,
                pid,
                started,
                format!("exited during escalation (before kill attempt {})", attempt),
            );
        }

        match signal::force_kill_group(pid) {
            Ok(()) => {}
            Err(e) if signal::is_no_such_process(&e) => {
                return ShutdownOutcome::stopped(&role, started.elapsed(), "exited during escalation");
            }
            Err(e) => warn!(
                "Kill attempt {}/{} for {} (pid {}) failed: {}",
                attempt, budget.max_kill_retries, role, pid, e
            ),
        }

        tokio::select! {
            _ = sleep(budget.kill_retry_interval()) => {}
            _ = deadline.cancelled() => {
                return ShutdownOutcome::timed_out(&role, started.elapsed());
            }
        }

        if !signal::is_process_running(pid) {
            return stopped(
                &role,
                pid,
                started,
                format!("force killed after {} attempt(s)", attempt),
            );
        }
    }

    ShutdownOutcome::failed(
        &role,
        started.elapsed(),
        format!(
            "pid {} still running after {} kill attempts",
            pid, budget.max_kill_retries
        ),
    )
}

fn advance(role: &str, pid: u32, state: &mut LadderState, next: LadderState) {
    debug_assert!(!state.is_terminal());
    debug!("{} (pid {}): {:?} -> {:?}", role, pid, state, next);
    *state = next;
}

/// The leader is gone; anything it left in its group goes with it
fn stopped<N: Into<String>>(role: &str, pid: u32, started: Instant, note: N) -> ShutdownOutcome {
    if signal::is_group_running(pid) {
        debug!("Killing processes left in {} group {}", role, pid);
        kill_group(role, pid);
    }
    ShutdownOutcome::stopped(role, started.elapsed(), note)
}

fn kill_group(role: &str, pid: u32) {
    if let Err(e) = signal::force_kill_group(pid) {
        if !signal::is_no_such_process(&e) {
            warn!("Failed to kill {} process group {}: {}", role, pid, e);
        }
    }
}

/// Stop infrastructure this orchestrator started
pub(super) async fn run_infra_ladder(
    label: String,
    infra: Arc<dyn InfraLifecycle>,
    deadline: CancellationToken,
) -> ShutdownOutcome {
    let started = Instant::now();

    tokio::select! {
        result = infra.stop() => match result {
            Ok(()) => ShutdownOutcome::stopped(&label, started.elapsed(), format!("{} stopped", infra.describe())),
            Err(e) => ShutdownOutcome::failed(&label, started.elapsed(), e.to_string()),
        },
        _ = deadline.cancelled() => ShutdownOutcome::timed_out(&label, started.elapsed()),
    }
}
