use super::probe::{Readiness, ServiceProbe};
use crate::endpoint::ServiceEndpoint;
use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::fmt;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const UNDEFINED_DATABASE: &str = "3D000";
const DUPLICATE_DATABASE: &str = "42P04";

/// A failed database operation, with the server's SQLSTATE when there was one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFailure {
    pub code: Option<String>,
    pub message: String,
}

impl DbFailure {
    pub fn new<S: Into<String>>(code: Option<&str>, message: S) -> Self {
        Self {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    fn timed_out(what: &str, limit: Duration) -> Self {
        Self::new(None, format!("{} not finished within {:?}", what, limit))
    }

    /// Server said the database is missing, as opposed to a network-level failure
    pub fn is_missing_database(&self) -> bool {
        missing_database(self.code.as_deref(), &self.message)
    }

    pub fn is_already_exists(&self) -> bool {
        already_exists(self.code.as_deref(), &self.message)
    }
}

impl fmt::Display for DbFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<sqlx::Error> for DbFailure {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => Self::new(db.code().as_deref(), db.message()),
            _ => Self::new(None, err.to_string()),
        }
    }
}

/// Connection-level operations the database readiness check needs
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Open a connection to `url`, ping it and close it again
    async fn connect(&self, url: &str, limit: Duration) -> Result<(), DbFailure>;

    /// Create database `name` through the administrative connection at `admin_url`
    async fn create_database(&self, admin_url: &str, name: &str, limit: Duration)
        -> Result<(), DbFailure>;
}

/// `DatabaseAdmin` backed by real Postgres connections
pub struct PgAdmin;

#[async_trait]
impl DatabaseAdmin for PgAdmin {
    async fn connect(&self, url: &str, limit: Duration) -> Result<(), DbFailure> {
        let attempt = async {
            let mut conn = PgConnection::connect(url).await?;
            conn.ping().await?;
            conn.close().await
        };

        timeout(limit, attempt)
            .await
            .map_err(|_| DbFailure::timed_out("connection", limit))?
            .map_err(DbFailure::from)
    }

    async fn create_database(
        &self,
        admin_url: &str,
        name: &str,
        limit: Duration,
    ) -> Result<(), DbFailure> {
        let create = async {
            let mut conn = PgConnection::connect(admin_url).await?;

            let exists: Option<i32> =
                sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
                    .bind(name)
                    .fetch_optional(&mut conn)
                    .await?;

            if exists.is_none() {
                let statement = format!("CREATE DATABASE {}", quote_identifier(name));
                sqlx::query(&statement).execute(&mut conn).await?;
                info!("Created database '{}'", name);
            } else {
                debug!("Database '{}' already exists", name);
            }

            if let Err(e) = conn.close().await {
                warn!("Failed to close administrative connection: {}", e);
            }
            Ok::<(), sqlx::Error>(())
        };

        timeout(limit, create)
            .await
            .map_err(|_| DbFailure::timed_out(&format!("creating database '{}'", name), limit))?
            .map_err(DbFailure::from)
    }
}

pub(super) async fn check(probe: &ServiceProbe, endpoint: &ServiceEndpoint) -> Readiness {
    let connect_timeout = probe.budget.db_connect_timeout();
    let admin = probe.admin.as_ref();

    let err = match admin.connect(endpoint.connection_string(), connect_timeout).await {
        Ok(()) => return Readiness::Ready,
        Err(err) => err,
    };

    if !err.is_missing_database() {
        return Readiness::NotReady(err.to_string());
    }

    if probe.database_created.load(Ordering::Acquire) {
        return Readiness::NotReady(format!("database still unavailable after creation: {}", err));
    }

    let Some(name) = endpoint.database_name() else {
        return Readiness::NotReady(err.to_string());
    };
    let Some(admin_url) = endpoint.admin_connection_string() else {
        return Readiness::NotReady(err.to_string());
    };

    info!("Database '{}' does not exist yet, creating it", name);
    match admin.create_database(&admin_url, name, connect_timeout).await {
        Ok(()) => {}
        Err(e) if e.is_already_exists() => debug!("Database '{}' was created concurrently", name),
        Err(e) => {
            return Readiness::NotReady(format!("failed to create database '{}': {}", name, e))
        }
    }
    probe.database_created.store(true, Ordering::Release);

    let mut last_error = err.to_string();
    for attempt in 1..=probe.budget.db_create_retries {
        sleep(probe.budget.db_create_wait()).await;
        match admin.connect(endpoint.connection_string(), connect_timeout).await {
            Ok(()) => {
                info!("Database '{}' is ready", name);
                return Readiness::Ready;
            }
            Err(e) => {
                debug!(
                    "Database '{}' not usable yet (attempt {}/{}): {}",
                    name, attempt, probe.budget.db_create_retries, e
                );
                last_error = e.to_string();
            }
        }
    }

    Readiness::NotReady(last_error)
}

pub(super) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(super) fn missing_database(code: Option<&str>, message: &str) -> bool {
    code == Some(UNDEFINED_DATABASE)
        || (message.contains("database") && message.contains("does not exist"))
}

pub(super) fn already_exists(code: Option<&str>, message: &str) -> bool {
    code == Some(DUPLICATE_DATABASE) || message.contains("already exists")
}
