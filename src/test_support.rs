//! Helpers shared by unit tests across modules.

use crate::config::{DevstackConfig, TimeBudget};
use crate::process::ManagedProcess;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::process::Command;

/// Budget with short waits so ladders finish quickly in tests
pub fn fast_budget() -> TimeBudget {
    TimeBudget {
        graceful_shutdown_ms: 500,
        kill_retry_interval_ms: 100,
        max_kill_retries: 3,
        overall_shutdown_ms: 3_000,
        infra_readiness_ms: 1_000,
        infra_poll_interval_ms: 50,
        tcp_connect_timeout_ms: 200,
        db_connect_timeout_ms: 500,
        db_create_wait_ms: 20,
        broker_metadata_timeout_ms: 200,
        health_request_timeout_ms: 500,
        health_retry_delay_ms: 50,
        health_max_attempts: 3,
        compose_command_timeout_ms: 2_000,
        prompt_timeout_ms: 200,
        ..TimeBudget::default()
    }
}

pub fn test_config() -> DevstackConfig {
    let mut config = DevstackConfig::default();
    config.budget = fast_budget();
    config.shutdown.port_sweep = false;
    config
}

/// Spawn a shell script as a managed worker
pub fn spawn_script(role: &str, script: &str) -> ManagedProcess {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    ManagedProcess::spawn(role, command, None).unwrap()
}

/// Worker that exits promptly on SIGTERM
pub fn spawn_cooperative(role: &str) -> ManagedProcess {
    spawn_script(role, "trap 'exit 0' TERM; while :; do sleep 0.05; done")
}

/// Worker that ignores SIGTERM and only dies to SIGKILL
pub fn spawn_stubborn(role: &str) -> ManagedProcess {
    spawn_script(role, "trap '' TERM; while :; do sleep 0.05; done")
}

/// Serve a fixed `/health` response on an ephemeral port
pub async fn serve_health(status: StatusCode, body: &'static str) -> u16 {
    let router = Router::new().route("/health", get(move || async move { (status, body) }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    port
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Poll `condition` until it holds or `limit` passes
pub async fn eventually<F: Fn() -> bool>(limit: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Lifecycle double counting start/stop calls
#[derive(Default)]
pub struct RecordingInfra {
    pub starts: std::sync::atomic::AtomicUsize,
    pub stops: std::sync::atomic::AtomicUsize,
    pub hang_on_stop: bool,
}

impl RecordingInfra {
    pub fn hanging() -> Self {
        Self {
            hang_on_stop: true,
            ..Self::default()
        }
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl crate::infra::InfraLifecycle for RecordingInfra {
    fn describe(&self) -> String {
        "recording stack".to_string()
    }

    async fn start(&self) -> crate::error::Result<()> {
        self.starts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> crate::error::Result<()> {
        self.stops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.hang_on_stop {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Probe reporting not ready for the first `not_ready_calls` checks, ready afterwards
pub struct ScriptedProbe {
    not_ready_calls: usize,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedProbe {
    pub fn ready() -> Self {
        Self::not_ready_for(0)
    }

    pub fn never_ready() -> Self {
        Self::not_ready_for(usize::MAX)
    }

    pub fn not_ready_for(not_ready_calls: usize) -> Self {
        Self {
            not_ready_calls,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl crate::readiness::ReadinessCheck for ScriptedProbe {
    async fn check(&self, _endpoint: &crate::endpoint::ServiceEndpoint) -> crate::readiness::Readiness {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call < self.not_ready_calls {
            crate::readiness::Readiness::NotReady("starting up".to_string())
        } else {
            crate::readiness::Readiness::Ready
        }
    }
}

/// Confirmation double that records how often it was asked
pub struct CountingConfirm {
    pub answer: bool,
    pub asked: std::sync::atomic::AtomicUsize,
}

impl CountingConfirm {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn times_asked(&self) -> usize {
        self.asked.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl crate::infra::Confirm for CountingConfirm {
    async fn confirm(&self, _question: &str) -> bool {
        self.asked.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.answer
    }
}

/// Accept and hold TCP connections on an ephemeral port
pub async fn listening_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    port
}
