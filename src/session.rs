//! Gouge session module.

use crate::config::EndpointConfig;
use crate::errors::DriverError;
use async_trait::async_trait;

/// Consistency mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Consistency {
    /// Strong consistency. Both reads and writes go through the Raft leader,
    /// which makes them linearizable.
    Strong,
    /// Relaxed reads. Reads are performed on the node that receives the
    /// request, which allows stale reads.
    RelaxedReads,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::Strong
    }
}

/// A SQL statement and its bound parameters.
///
/// Requests must be idempotent: the retry layer may execute the same request
/// any number of times until one attempt succeeds. A request is immutable
/// once built, so every attempt carries the same parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    sql: String,
    params: Vec<String>,
    consistency: Consistency,
}

impl Request {
    /// Creates a new request with no parameters and strong consistency.
    pub fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            consistency: Consistency::default(),
        }
    }

    /// Binds the next positional parameter.
    pub fn bind<S: ToString>(mut self, value: S) -> Self {
        self.params.push(value.to_string());
        self
    }

    /// Sets the consistency mode.
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// The SQL statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bound parameters in position order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// The consistency mode.
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }
}

/// Query row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryRow {
    /// Column values of the row.
    pub values: Vec<String>,
}

/// Query results.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResults {
    /// Query result rows.
    pub rows: Vec<QueryRow>,
    /// Contact point that served the request.
    pub coordinator: String,
}

/// A live connection to a cluster.
///
/// Sessions are shared by many concurrent callers once built.
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute `request` once.
    async fn execute(&self, request: &Request) -> Result<QueryResults, DriverError>;

    /// Release the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Builds sessions from endpoint configuration.
///
/// Your application implements this trait to plug a driver into the
/// session establisher.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session type produced by this connector.
    type Session: Session;

    /// Establish a session to `endpoint`.
    async fn connect(&self, endpoint: &EndpointConfig) -> Result<Self::Session, DriverError>;
}
