use crate::config::TimeBudget;
use crate::error::{DevstackError, Result};
use crate::process::signal;
use crate::process::ProcessHandle;
use futures::future::join_all;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Backup sweep: force-kill whatever still listens on worker ports.
///
/// Detached handles (pid lost) are swept right away. Handles with a pid get
/// the graceful window first and are skipped if they exit during it.
/// Failures are logged and never propagated.
pub(super) async fn sweep_ports(
    targets: Vec<ProcessHandle>,
    budget: TimeBudget,
    deadline: CancellationToken,
) {
    let sweeps = targets.into_iter().filter_map(|mut handle| {
        let port = handle.port?;
        let role = handle.role.clone();
        let budget = budget.clone();
        let deadline = deadline.clone();
        Some(async move {
            if handle.pid.is_some() {
                tokio::select! {
                    _ = handle.wait_for_exit() => {
                        debug!("{} exited, port {} sweep not needed", role, port);
                        return;
                    }
                    _ = sleep(budget.graceful_shutdown()) => {}
                    _ = deadline.cancelled() => return,
                }
            }

            tokio::select! {
                _ = sweep_port(&role, port, &budget) => {}
                _ = deadline.cancelled() => {}
            }
        })
    });

    join_all(sweeps).await;
}

async fn sweep_port(role: &str, port: u16, budget: &TimeBudget) {
    let pids = match listening_pids(port, budget).await {
        Ok(pids) => pids,
        Err(e) => {
            debug!("Port sweep for {} (port {}) skipped: {}", role, port, e);
            return;
        }
    };

    let own_pid = std::process::id();
    for pid in pids.into_iter().filter(|pid| *pid != own_pid) {
        match signal::force_kill(pid) {
            Ok(()) => info!("Port sweep killed pid {} listening on {} port {}", pid, role, port),
            Err(e) if signal::is_no_such_process(&e) => {}
            Err(e) => warn!("Port sweep could not kill pid {} on port {}: {}", pid, port, e),
        }
    }
}

/// Pids listening on a TCP port, as reported by `lsof`
async fn listening_pids(port: u16, budget: &TimeBudget) -> Result<Vec<u32>> {
    let output = timeout(
        budget.port_sweep_timeout(),
        Command::new("lsof")
            .arg("-t")
            .arg("-n")
            .arg("-P")
            .arg(format!("-iTCP:{}", port))
            .arg("-sTCP:LISTEN")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| DevstackError::system(format!("lsof for port {} timed out", port)))??;

    // lsof exits 1 when nothing matches
    Ok(parse_pids(&String::from_utf8_lossy(&output.stdout)))
}

pub(super) fn parse_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}
