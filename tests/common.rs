#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::FutureExt;
use gouge::rpc::proto;
use gouge::rpc::proto::rpc_server::{Rpc, RpcServer};
use gouge::{
    Connector, DriverError, EndpointConfig, QueryResults, QueryRow, Request, Session,
};
use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};
use tonic::transport::Server;
use tonic::{Response, Status};

/// What a scripted session does on one `execute` call.
#[derive(Clone, Debug)]
pub enum Outcome {
    Ok,
    Timeout,
    Closed,
    Unreachable,
    Reject,
    Sleep(Duration),
}

/// In-memory session answering from a script.
#[derive(Debug)]
pub struct ScriptedSession {
    pub name: String,
    script: Mutex<VecDeque<Outcome>>,
    default: Outcome,
    pub calls: AtomicUsize,
    pub closes: AtomicUsize,
    fail_close: bool,
    seen: Mutex<Vec<Request>>,
}

impl ScriptedSession {
    pub fn new(name: &str) -> Self {
        Self::scripted(name, vec![], Outcome::Ok)
    }

    pub fn scripted(name: &str, script: Vec<Outcome>, default: Outcome) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            default,
            calls: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            fail_close: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Request> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn execute(&self, request: &Request) -> Result<QueryResults, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        let node = self.name.clone();
        match outcome {
            Outcome::Ok => Ok(QueryResults {
                rows: vec![QueryRow {
                    values: request.params().to_vec(),
                }],
                coordinator: node,
            }),
            Outcome::Sleep(delay) => {
                tokio::time::sleep(delay).await;
                Ok(QueryResults {
                    rows: vec![],
                    coordinator: node,
                })
            }
            Outcome::Timeout => Err(DriverError::Timeout {
                node,
                message: "deadline exceeded".to_string(),
            }),
            Outcome::Closed => Err(DriverError::ConnectionClosed {
                node,
                message: "connection reset".to_string(),
            }),
            Outcome::Unreachable => Err(DriverError::AllTargetsUnreachable {
                endpoint: node,
                message: "all nodes down".to_string(),
            }),
            Outcome::Reject => Err(DriverError::Server {
                node,
                message: "InvalidArgument: no such table".to_string(),
            }),
        }
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(DriverError::Server {
                node: self.name.clone(),
                message: "close failed".to_string(),
            });
        }
        Ok(())
    }
}

/// Connector that reaches only the endpoints it was told about.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    reachable: HashSet<String>,
    hanging: HashSet<String>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn reaching(names: &[&str]) -> Self {
        Self {
            reachable: names.iter().map(|name| name.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn hanging_on(mut self, name: &str) -> Self {
        self.hanging.insert(name.to_string());
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self, endpoint: &EndpointConfig) -> Result<ScriptedSession, DriverError> {
        self.attempts.lock().unwrap().push(endpoint.name.clone());
        if self.hanging.contains(&endpoint.name) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.reachable.contains(&endpoint.name) {
            Ok(ScriptedSession::new(&endpoint.name))
        } else {
            Err(DriverError::AllTargetsUnreachable {
                endpoint: endpoint.name.clone(),
                message: "connection refused".to_string(),
            })
        }
    }
}

pub fn endpoint(name: &str) -> EndpointConfig {
    EndpointConfig::new(name, vec![format!("http://{}.invalid:50001", name)])
}

/// What a scripted node saw in one request.
#[derive(Clone, Debug)]
pub struct Received {
    pub sql: String,
    pub params: Vec<String>,
    pub keyspace: String,
    pub consistency: i32,
    pub authorization: Option<String>,
}

/// gRPC node answering `Execute` from a script of statuses; answers with
/// the request parameters as a single row once the script is used up.
#[derive(Clone, Debug, Default)]
pub struct ScriptedNode {
    script: Arc<Mutex<VecDeque<Status>>>,
    received: Arc<Mutex<Vec<Received>>>,
    delay: Option<Duration>,
}

impl ScriptedNode {
    pub fn new(script: Vec<Status>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            received: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Answers every request only after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(vec![])
        }
    }
}

#[tonic::async_trait]
impl Rpc for ScriptedNode {
    async fn execute(
        &self,
        request: tonic::Request<proto::Query>,
    ) -> Result<Response<proto::QueryResults>, Status> {
        let authorization = request
            .metadata()
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let query = request.into_inner();
        self.received.lock().unwrap().push(Received {
            sql: query.sql.clone(),
            params: query.params.clone(),
            keyspace: query.keyspace.clone(),
            consistency: query.consistency,
            authorization,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        if let Some(status) = scripted {
            return Err(status);
        }
        Ok(Response::new(proto::QueryResults {
            rows: vec![proto::QueryRow {
                values: query.params,
            }],
        }))
    }
}

/// A scripted node listening on a local port.
pub struct NodeHandle {
    pub addr: String,
    pub node: ScriptedNode,
    shutdown: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
}

impl NodeHandle {
    pub fn received(&self) -> Vec<Received> {
        self.node.received.lock().unwrap().clone()
    }

    pub async fn halt(self) {
        let _ = self.shutdown.send(());
        self.server.await.unwrap();
    }
}

pub async fn start_node(port: u16, script: Vec<Status>) -> NodeHandle {
    serve_node(port, ScriptedNode::new(script)).await
}

pub async fn serve_node(port: u16, node: ScriptedNode) -> NodeHandle {
    let listen_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let service = node.clone();
    let server = tokio::task::spawn(async move {
        Server::builder()
            .add_service(RpcServer::new(service))
            .serve_with_shutdown(listen_addr, shutdown_rx.map(drop))
            .await
            .unwrap();
    });
    for _ in 0..100 {
        if TcpStream::connect(listen_addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    NodeHandle {
        addr: format!("http://127.0.0.1:{}", port),
        node,
        shutdown,
        server,
    }
}

/// TCP relay in front of a node whose live connections can be severed.
pub struct Proxy {
    pub addr: String,
    cut: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl Proxy {
    /// Drops every relayed connection; new connections are still accepted.
    pub fn cut(&self) {
        self.cut.notify_waiters();
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn start_proxy(port: u16, upstream: &str) -> Proxy {
    let upstream: SocketAddr = upstream.trim_start_matches("http://").parse().unwrap();
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let cut = Arc::new(Notify::new());
    let relays = cut.clone();
    let task = tokio::task::spawn(async move {
        while let Ok((mut inbound, _)) = listener.accept().await {
            let cut = relays.clone();
            tokio::task::spawn(async move {
                let mut outbound = match TcpStream::connect(upstream).await {
                    Ok(outbound) => outbound,
                    Err(_) => return,
                };
                tokio::select! {
                    _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {}
                    _ = cut.notified() => {}
                }
            });
        }
    });
    Proxy {
        addr: format!("http://127.0.0.1:{}", port),
        cut,
        task,
    }
}
