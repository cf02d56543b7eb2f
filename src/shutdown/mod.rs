mod coordinator;
mod ladder;
mod outcome;
mod sweep;
#[cfg(test)]
mod tests;

pub use coordinator::{ShutdownCoordinator, ShutdownResource, INFRASTRUCTURE_LABEL};
pub use outcome::{LadderState, ShutdownOutcome};
