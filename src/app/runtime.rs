use super::types::{Phase, ShutdownReason};
use super::DevstackOrchestrator;
use crate::error::{DevstackError, Result};
use crate::process::ProcessExit;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

impl DevstackOrchestrator {
    /// Run the stack until a signal or a failure, then shut down.
    ///
    /// Returns the process exit code: 0 after a clean stop, 1 when shutdown
    /// was caused by an error.
    pub async fn run(&mut self) -> Result<i32> {
        let span = info_span!("devstack", run_id = %self.run_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<i32> {
        let mut shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| DevstackError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        let signals_done = CancellationToken::new();
        self.setup_signal_handlers(&signals_done);

        // A signal during startup abandons the remaining steps
        let interrupted = tokio::select! {
            result = self.start() => match result {
                Ok(()) => None,
                Err(e) => {
                    error!("Startup failed: {}", e);
                    Some(ShutdownReason::Error(e.to_string()))
                }
            },
            reason = shutdown_receiver.recv() => Some(reason.unwrap_or(ShutdownReason::UserRequest)),
        };

        let reason = match interrupted {
            Some(reason) => reason,
            None => self.keep_running(&mut shutdown_receiver).await,
        };

        let report = self.shutdown(reason).await;
        signals_done.cancel();
        Ok(report.exit_code())
    }

    /// The `Running` phase: stream worker output and wait for a reason to stop
    async fn keep_running(
        &mut self,
        shutdown_receiver: &mut mpsc::Receiver<ShutdownReason>,
    ) -> ShutdownReason {
        self.set_phase(Phase::Running);

        let sink = self.log_sink.clone();
        for process in self.registry.processes_mut() {
            process.stream_logs(sink.clone());
        }
        self.watch_worker_exits();

        info!(
            "Development stack is running: {}, {}",
            self.endpoints.database, self.endpoints.broker
        );

        shutdown_receiver
            .recv()
            .await
            .unwrap_or(ShutdownReason::UserRequest)
    }

    /// A worker exiting on its own is an error that shuts the whole stack down
    fn watch_worker_exits(&self) {
        for mut handle in self.registry.handles() {
            let sender = self.shutdown_sender.clone();
            let token = self.cancellation_token.child_token();
            let role = handle.role.clone();
            tokio::spawn(async move {
                tokio::select! {
                    exit = handle.wait_for_exit() => {
                        let detail = match exit {
                            Some(ProcessExit::Exited(status)) => status.to_string(),
                            Some(ProcessExit::WaitFailed(reason)) => reason,
                            None => "unknown status".to_string(),
                        };
                        warn!("{} worker exited unexpectedly: {}", role, detail);
                        let _ = sender
                            .send(ShutdownReason::Error(format!(
                                "{} worker exited: {}",
                                role, detail
                            )))
                            .await;
                    }
                    _ = token.cancelled() => {}
                }
            });
        }
    }

    /// Feed SIGINT and SIGTERM into the signal relay until `done` fires.
    ///
    /// Listeners stay installed through shutdown so a repeated signal can
    /// force the exit.
    fn setup_signal_handlers(&mut self, done: &CancellationToken) {
        let Some(signals) = self.signal_receiver.take() else {
            warn!("Signal handlers already installed");
            return;
        };

        #[cfg(unix)]
        {
            let relay = self.signal_sender.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        received = sigterm.recv() => {
                            if received.is_none() || relay.send("SIGTERM").is_err() {
                                return;
                            }
                        }
                        _ = done.cancelled() => return,
                    }
                }
            });
        }

        let relay = self.signal_sender.clone();
        let ctrl_c_done = done.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = signal::ctrl_c() => {
                        if let Err(e) = received {
                            warn!("Failed to listen for Ctrl+C: {}", e);
                            return;
                        }
                        if relay.send("SIGINT").is_err() {
                            return;
                        }
                    }
                    _ = ctrl_c_done.cancelled() => return,
                }
            }
        });

        tokio::spawn(relay_signals(
            signals,
            self.shutdown_sender.clone(),
            self.phase.subscribe(),
            self.force_quit.clone(),
            done.clone(),
        ));
    }
}

/// The first signal asks for a graceful shutdown. Any later one, or one that
/// arrives once shutdown is under way, forces the exit.
async fn relay_signals(
    mut signals: mpsc::UnboundedReceiver<&'static str>,
    sender: mpsc::Sender<ShutdownReason>,
    phase: watch::Receiver<Phase>,
    force_quit: CancellationToken,
    done: CancellationToken,
) {
    let mut requested = false;
    loop {
        let name = tokio::select! {
            name = signals.recv() => match name {
                Some(name) => name,
                None => return,
            },
            _ = done.cancelled() => return,
        };

        if requested || *phase.borrow() >= Phase::ShuttingDown {
            warn!("Received {} during shutdown, forcing exit", name);
            force_quit.cancel();
            return;
        }

        info!("Received {} signal", name);
        requested = true;
        let _ = sender.send(ShutdownReason::Signal(name.to_string())).await;
    }
}
