use crate::config::TimeBudget;
use crate::error::{DevstackError, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Structured body served by `GET /health`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthReport {
    pub status: String,
    #[serde(default)]
    pub checks: BTreeMap<String, CheckResult>,
    #[serde(default)]
    pub version: Option<String>,
    /// Reported either as seconds or as a human readable string
    #[serde(default)]
    pub uptime: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CheckResult {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" && self.failing_checks().is_empty()
    }

    /// Names of sub-checks that did not pass
    pub fn failing_checks(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|(_, check)| check.status != "pass")
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn describe_failures(&self) -> String {
        let details: Vec<String> = self
            .checks
            .iter()
            .filter(|(_, check)| check.status != "pass")
            .map(|(name, check)| match &check.message {
                Some(message) => format!("{} ({}: {})", name, check.status, message),
                None => format!("{} ({})", name, check.status),
            })
            .collect();

        if details.is_empty() {
            format!("status '{}'", self.status)
        } else {
            format!("status '{}', failing checks: {}", self.status, details.join(", "))
        }
    }
}

/// Successful health verification
#[derive(Debug, Clone, PartialEq)]
pub enum HealthVerdict {
    Healthy(HealthReport),
    /// Plain 200 without a structured body
    Legacy,
}

/// Interpret a health response.
///
/// A body that parses as a [`HealthReport`] decides on its own; anything else
/// falls back to the status code.
pub fn evaluate(role: &str, status: StatusCode, body: &str) -> Result<HealthVerdict> {
    match serde_json::from_str::<HealthReport>(body) {
        Ok(report) if report.is_healthy() => Ok(HealthVerdict::Healthy(report)),
        Ok(report) => Err(DevstackError::HealthCheckFailure {
            role: role.to_string(),
            message: report.describe_failures(),
            failing_checks: report.failing_checks(),
        }),
        Err(_) if status == StatusCode::OK => Ok(HealthVerdict::Legacy),
        Err(_) => Err(DevstackError::HealthCheckFailure {
            role: role.to_string(),
            message: format!("unexpected status {}", status),
            failing_checks: Vec::new(),
        }),
    }
}

/// Health verification against a worker's HTTP health endpoint
#[derive(Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
    retry_delay: Duration,
}

impl HealthChecker {
    pub fn new(budget: &TimeBudget) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(budget.health_request_timeout())
            .build()?;

        Ok(Self {
            client,
            retry_delay: budget.health_retry_delay(),
        })
    }

    /// Single GET bounded by the request timeout
    pub async fn verify_healthy(&self, role: &str, url: &str) -> Result<HealthVerdict> {
        let response = self.client.get(url).send().await.map_err(|e| {
            DevstackError::HealthCheckFailure {
                role: role.to_string(),
                message: format!("request to {} failed: {}", url, e),
                failing_checks: Vec::new(),
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DevstackError::HealthCheckFailure {
                role: role.to_string(),
                message: format!("reading response from {} failed: {}", url, e),
                failing_checks: Vec::new(),
            })?;
        evaluate(role, status, &body)
    }

    /// Retry with a fixed delay; the final attempt's error is returned
    pub async fn verify_healthy_with_retries(
        &self,
        role: &str,
        url: &str,
        max_attempts: u32,
    ) -> Result<HealthVerdict> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.verify_healthy(role, url).await {
                Ok(verdict) => {
                    match &verdict {
                        HealthVerdict::Healthy(report) => info!(
                            "{} worker healthy (version {}, attempt {}/{})",
                            role,
                            report.version.as_deref().unwrap_or("unknown"),
                            attempt,
                            max_attempts
                        ),
                        HealthVerdict::Legacy => info!(
                            "{} worker answered 200 on {} (attempt {}/{})",
                            role, url, attempt, max_attempts
                        ),
                    }
                    return Ok(verdict);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!("{} worker health verification gave up: {}", role, e);
                    return Err(e);
                }
                Err(e) => {
                    debug!(
                        "{} worker not healthy yet (attempt {}/{}): {}",
                        role, attempt, max_attempts, e
                    );
                }
            }

            attempt += 1;
            sleep(self.retry_delay).await;
        }
    }
}
