//! Gouge is a resilient client for [ChiselStore][1] clusters.
//!
//! ## Getting Started
//!
//! Gouge connects to a cluster through one of two endpoints: a primary
//! region and an optional fallback region. The fallback is only used when
//! the primary cannot be reached while the session is being established.
//!
//! Requests are executed by a [`RetryExecutor`], which resubmits a request
//! that timed out or lost its connection until it succeeds. Requests must
//! therefore be idempotent. A [`ThrottledPipeline`] bounds how many
//! requests are in flight, and a [`LatencyTracker`] records the latency of
//! every request that completed so that percentiles can be reported per
//! phase of a workload.
//!
//! ```no_run
//! use anyhow::Result;
//! use gouge::{
//!     EndpointConfig, LatencyTracker, Request, RetryExecutor, RetryPolicy, RpcConnector,
//!     Session, SessionEstablisher,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let primary = EndpointConfig::new("us-east", vec!["http://127.0.0.1:50001".into()]);
//!     let fallback = EndpointConfig::new("eu-west", vec!["http://127.0.0.1:50101".into()]);
//!     let establisher = SessionEstablisher::new(RpcConnector::new());
//!     let session = establisher.connect(&primary, Some(&fallback)).await?;
//!     let executor = RetryExecutor::new(Arc::new(LatencyTracker::new()), RetryPolicy::default());
//!     let results = executor.execute(&session, &Request::new("SELECT 1")).await?;
//!     println!("{:?}", results.rows);
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! [1]: https://github.com/chiselstrike/chiselstore

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod errors;
pub mod failover;
pub mod pipeline;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod tracker;
pub mod workload;

pub use config::EndpointConfig;
pub use errors::{DriverError, ErrorKind};
pub use failover::{Delegate, FailoverSession, SessionEstablisher};
pub use pipeline::{Backpressure, PendingOperation, ThrottledPipeline};
pub use retry::{RetryExecutor, RetryPolicy};
pub use rpc::{RpcConnector, RpcSession};
pub use session::{Connector, Consistency, QueryResults, QueryRow, Request, Session};
pub use tracker::{LatencyReport, LatencyTracker};
pub use workload::{Workload, WorkloadConfig, WorkloadSummary};
