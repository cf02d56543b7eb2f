use super::broker;
use super::database::{self, DatabaseAdmin, PgAdmin};
use crate::config::TimeBudget;
use crate::endpoint::{EndpointKind, ServiceEndpoint};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Result of a single readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready)
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready => write!(f, "ready"),
            Readiness::NotReady(reason) => write!(f, "not ready: {}", reason),
        }
    }
}

/// Answers "is this endpoint reachable and usable?"
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn check(&self, endpoint: &ServiceEndpoint) -> Readiness;
}

/// Readiness probe for the Postgres database and the Kafka broker.
///
/// The database check creates the target database when the server reports it
/// missing. That happens at most once per probe.
pub struct ServiceProbe {
    pub(super) budget: TimeBudget,
    pub(super) admin: Arc<dyn DatabaseAdmin>,
    pub(super) database_created: AtomicBool,
}

impl ServiceProbe {
    pub fn new(budget: TimeBudget) -> Self {
        Self::with_admin(budget, Arc::new(PgAdmin))
    }

    pub fn with_admin(budget: TimeBudget, admin: Arc<dyn DatabaseAdmin>) -> Self {
        Self {
            budget,
            admin,
            database_created: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ReadinessCheck for ServiceProbe {
    async fn check(&self, endpoint: &ServiceEndpoint) -> Readiness {
        match endpoint.kind() {
            EndpointKind::Database => database::check(self, endpoint).await,
            EndpointKind::Broker => broker::check(&self.budget, endpoint).await,
        }
    }
}
