mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::{Components, DevstackOrchestrator};
pub use state::ResourceRegistry;
pub use types::{Phase, ShutdownReason, ShutdownReport};
