mod broker;
mod database;
mod probe;

pub use database::{DatabaseAdmin, DbFailure, PgAdmin};
pub use probe::{Readiness, ReadinessCheck, ServiceProbe};
