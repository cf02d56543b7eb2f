mod health;
mod logs;
mod managed;
pub mod signal;
mod supervisor;

pub use health::{CheckResult, HealthChecker, HealthReport, HealthVerdict};
pub use logs::{LogLine, LogSink, OutputStream};
pub use managed::{ManagedProcess, ProcessExit, ProcessHandle, ProcessState};
pub use supervisor::{ProcessSupervisor, WorkerRole};
