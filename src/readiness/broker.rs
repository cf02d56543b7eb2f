use super::probe::Readiness;
use crate::config::TimeBudget;
use crate::endpoint::ServiceEndpoint;
use crate::error::Result;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use std::time::Duration;
use tokio::task;
use tracing::{debug, warn};

/// A reachable bootstrap address counts as ready; metadata is best-effort.
pub(super) async fn check(budget: &TimeBudget, endpoint: &ServiceEndpoint) -> Readiness {
    if !endpoint.is_reachable(budget.tcp_connect_timeout()).await {
        return Readiness::NotReady(format!("cannot connect to {}", endpoint.address()));
    }

    let brokers = endpoint.connection_string().to_string();
    let metadata_timeout = budget.broker_metadata_timeout();
    let lookup = task::spawn_blocking(move || fetch_metadata(&brokers, metadata_timeout));

    // fetch_metadata is bounded by the metadata timeout
    match lookup.await {
        Ok(Ok((brokers, topics))) => {
            debug!(
                "Broker {} metadata: {} brokers, {} topics",
                endpoint.address(),
                brokers,
                topics
            );
        }
        Ok(Err(e)) => warn!("Broker {} metadata unavailable: {}", endpoint.address(), e),
        Err(e) => warn!("Broker metadata task failed: {}", e),
    }

    Readiness::Ready
}

fn fetch_metadata(brokers: &str, metadata_timeout: Duration) -> Result<(usize, usize)> {
    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("socket.timeout.ms", metadata_timeout.as_millis().to_string())
        .create()?;

    let metadata = consumer.fetch_metadata(None, metadata_timeout)?;
    Ok((metadata.brokers().len(), metadata.topics().len()))
}
