use crate::config::{BrokerConfig, DatabaseConfig};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Kind of dependency an endpoint points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Database,
    Broker,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Database => write!(f, "database"),
            EndpointKind::Broker => write!(f, "broker"),
        }
    }
}

/// Connection details for one infrastructure dependency. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    kind: EndpointKind,
    host: String,
    port: u16,
    connection_string: String,
    database: Option<DatabaseTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DatabaseTarget {
    user: String,
    password: String,
    name: String,
    admin_database: String,
}

impl ServiceEndpoint {
    pub fn database(config: &DatabaseConfig) -> Self {
        let target = DatabaseTarget {
            user: config.user.clone(),
            password: config.password.clone(),
            name: config.name.clone(),
            admin_database: config.admin_database.clone(),
        };

        Self {
            kind: EndpointKind::Database,
            host: config.host.clone(),
            port: config.port,
            connection_string: postgres_url(&target, &config.host, config.port, &config.name),
            database: Some(target),
        }
    }

    pub fn broker(config: &BrokerConfig) -> Self {
        Self {
            kind: EndpointKind::Broker,
            host: config.host.clone(),
            port: config.port,
            connection_string: format!("{}:{}", config.host, config.port),
            database: None,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Name of the target database, if this is a database endpoint
    pub fn database_name(&self) -> Option<&str> {
        self.database.as_ref().map(|target| target.name.as_str())
    }

    /// Connection string pointing at the administrative database of the same server
    pub fn admin_connection_string(&self) -> Option<String> {
        self.database.as_ref().map(|target| {
            postgres_url(target, &self.host, self.port, &target.admin_database)
        })
    }

    /// TCP reachability check bounded by `connect_timeout`
    pub async fn is_reachable(&self, connect_timeout: Duration) -> bool {
        let address = self.address();
        match timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                trace!("{} endpoint {} not reachable: {}", self.kind, address, e);
                false
            }
            Err(_) => {
                trace!("{} endpoint {} connect timed out", self.kind, address);
                false
            }
        }
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.address())
    }
}

/// Everything but RFC 3986 unreserved characters gets escaped
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn postgres_url(target: &DatabaseTarget, host: &str, port: u16, database: &str) -> String {
    format!(
        "postgres://{}:{}@{}:{}/{}",
        utf8_percent_encode(&target.user, URL_COMPONENT),
        utf8_percent_encode(&target.password, URL_COMPONENT),
        host,
        port,
        utf8_percent_encode(database, URL_COMPONENT)
    )
}

/// Both dependencies the workers need, built once from configuration
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub database: ServiceEndpoint,
    pub broker: ServiceEndpoint,
}

impl Endpoints {
    pub fn from_config(database: &DatabaseConfig, broker: &BrokerConfig) -> Self {
        Self {
            database: ServiceEndpoint::database(database),
            broker: ServiceEndpoint::broker(broker),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceEndpoint> {
        [&self.database, &self.broker].into_iter()
    }
}
