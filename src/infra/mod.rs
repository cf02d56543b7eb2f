mod compose;
mod prompt;
mod supervisor;

pub use compose::{ComposeLifecycle, InfraLifecycle};
pub use prompt::{AutoConfirm, Confirm, TerminalPrompt};
pub use supervisor::InfrastructureSupervisor;
