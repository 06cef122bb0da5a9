//! Gouge RPC module.
//!
//! A [`Session`] over the `proto.Rpc` gRPC service that ChiselStore nodes
//! expose. One channel is kept per reachable contact point; requests start
//! at the next node in turn and move on when a node does not answer.

use crate::config::EndpointConfig;
use crate::errors::DriverError;
use crate::session::{Connector, Consistency, QueryResults, QueryRow, Request, Session};
use async_trait::async_trait;
use derivative::Derivative;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("proto");
}

use proto::rpc_client::RpcClient;

const CLIENT_TIMEOUT: &str = "Timeout expired";

#[derive(Debug)]
struct Node {
    addr: String,
    client: RpcClient<Channel>,
    requests: AtomicU64,
}

/// RPC session to the nodes of one endpoint.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RpcSession {
    endpoint: String,
    keyspace: String,
    #[derivative(Debug = "ignore")]
    authorization: Option<MetadataValue<Ascii>>,
    nodes: Vec<Node>,
    next_node: AtomicUsize,
    closed: AtomicBool,
}

impl RpcSession {
    /// Name of the endpoint this session is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Requests served by each connected node.
    pub fn request_counts(&self) -> Vec<(String, u64)> {
        self.nodes
            .iter()
            .map(|node| (node.addr.clone(), node.requests.load(Ordering::SeqCst)))
            .collect()
    }

    async fn send(&self, node: &Node, request: &Request) -> Result<Vec<QueryRow>, Status> {
        let consistency = match request.consistency() {
            Consistency::Strong => proto::Consistency::Strong,
            Consistency::RelaxedReads => proto::Consistency::RelaxedReads,
        };
        let mut query = tonic::Request::new(proto::Query {
            sql: request.sql().to_string(),
            consistency: consistency as i32,
            params: request.params().to_vec(),
            keyspace: self.keyspace.clone(),
        });
        if let Some(authorization) = &self.authorization {
            query
                .metadata_mut()
                .insert("authorization", authorization.clone());
        }
        let mut client = node.client.clone();
        let response = client.execute(query).await?.into_inner();
        Ok(response
            .rows
            .into_iter()
            .map(|row| QueryRow { values: row.values })
            .collect())
    }
}

#[async_trait]
impl Session for RpcSession {
    async fn execute(&self, request: &Request) -> Result<QueryResults, DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::SessionClosed);
        }
        let first = self.next_node.fetch_add(1, Ordering::Relaxed);
        let mut last_failure = None;
        for i in 0..self.nodes.len() {
            let node = &self.nodes[(first + i) % self.nodes.len()];
            match self.send(node, request).await {
                Ok(rows) => {
                    node.requests.fetch_add(1, Ordering::SeqCst);
                    return Ok(QueryResults {
                        rows,
                        coordinator: node.addr.clone(),
                    });
                }
                Err(status) if node_down(&status) => {
                    debug!("node {} did not answer: {}", node.addr, status.message());
                    last_failure = Some(format!("{}: {}", node.addr, status.message()));
                }
                Err(status) => return Err(classify(&node.addr, status)),
            }
        }
        Err(DriverError::AllTargetsUnreachable {
            endpoint: self.endpoint.clone(),
            message: last_failure.unwrap_or_else(|| "no connected nodes".to_string()),
        })
    }

    /// Stops the session from taking requests. The channels are released
    /// when the session is dropped.
    async fn close(&self) -> Result<(), DriverError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("closed session to '{}'", self.endpoint);
        }
        Ok(())
    }
}

fn node_down(status: &Status) -> bool {
    status.code() == Code::Unavailable
}

fn classify(node: &str, status: Status) -> DriverError {
    let node = node.to_string();
    let message = status.message().to_string();
    match status.code() {
        Code::DeadlineExceeded => DriverError::Timeout { node, message },
        // The client-side deadline set by `Endpoint::timeout`.
        Code::Cancelled if message == CLIENT_TIMEOUT => DriverError::Timeout { node, message },
        Code::Cancelled | Code::Aborted => DriverError::ConnectionClosed { node, message },
        // tonic reports a connection lost while the request was in flight as
        // `Unknown` "transport error".
        Code::Unknown if message.starts_with("transport error") => {
            DriverError::ConnectionClosed { node, message }
        }
        _ => DriverError::Server {
            node,
            message: format!("{:?}: {}", status.code(), message),
        },
    }
}

/// Connects [`RpcSession`]s.
#[derive(Debug, Default)]
pub struct RpcConnector;

impl RpcConnector {
    /// Creates a new RPC connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for RpcConnector {
    type Session = RpcSession;

    async fn connect(&self, endpoint: &EndpointConfig) -> Result<RpcSession, DriverError> {
        let authorization = match &endpoint.token {
            Some(token) => Some(
                format!("Bearer {}", token)
                    .parse::<MetadataValue<Ascii>>()
                    .map_err(|_| {
                        DriverError::InvalidEndpoint(format!(
                            "token for '{}' is not valid header text",
                            endpoint.name
                        ))
                    })?,
            ),
            None => None,
        };
        let mut nodes = Vec::new();
        let mut last_failure = None;
        for addr in &endpoint.contact_points {
            let target = Endpoint::from_shared(addr.clone())
                .map_err(|e| DriverError::InvalidEndpoint(format!("{}: {}", addr, e)))?
                .timeout(endpoint.request_timeout);
            match tokio::time::timeout(endpoint.connect_timeout, target.connect()).await {
                Ok(Ok(channel)) => nodes.push(Node {
                    addr: addr.clone(),
                    client: RpcClient::new(channel),
                    requests: AtomicU64::new(0),
                }),
                Ok(Err(e)) => {
                    warn!("failed to connect to {} of '{}': {}", addr, endpoint.name, e);
                    last_failure = Some(format!("{}: {}", addr, e));
                }
                Err(_) => {
                    warn!("connecting to {} of '{}' timed out", addr, endpoint.name);
                    last_failure = Some(format!("{}: connect timed out", addr));
                }
            }
        }
        if nodes.is_empty() {
            return Err(DriverError::AllTargetsUnreachable {
                endpoint: endpoint.name.clone(),
                message: last_failure.unwrap_or_else(|| "no contact points".to_string()),
            });
        }
        info!(
            "connected to {}/{} nodes of '{}'",
            nodes.len(),
            endpoint.contact_points.len(),
            endpoint.name
        );
        Ok(RpcSession {
            endpoint: endpoint.name.clone(),
            keyspace: endpoint.keyspace.clone().unwrap_or_default(),
            authorization,
            nodes,
            next_node: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }
}
