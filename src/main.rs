use anyhow::{Context, Result};
use gouge::{
    Backpressure, Consistency, EndpointConfig, LatencyTracker, RetryExecutor, RetryPolicy,
    RpcConnector, Session, SessionEstablisher, Workload, WorkloadConfig,
};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "gouge")]
struct Opt {
    /// Bundle listing the contact points of the primary endpoint.
    #[structopt(long, parse(from_os_str))]
    primary_bundle: PathBuf,
    /// Bundle of the endpoint to use when the primary cannot be reached.
    #[structopt(long, parse(from_os_str))]
    fallback_bundle: Option<PathBuf>,
    /// Auth token of the connecting user.
    #[structopt(long)]
    token: Option<String>,
    /// Keyspace the demo table lives in.
    #[structopt(long)]
    keyspace: Option<String>,
    /// Number of rows to write.
    #[structopt(long, default_value = "100")]
    iterations: u64,
    /// Outstanding requests allowed before submission waits.
    #[structopt(long, default_value = "2000")]
    high_water_mark: usize,
    /// Admit requests with semaphore permits instead of polling.
    #[structopt(long)]
    permits: bool,
    /// Attempts per request before giving up (default: unlimited).
    #[structopt(long)]
    max_attempts: Option<u32>,
    /// Delay before the first retry, doubling on each retry.
    #[structopt(long, default_value = "0")]
    backoff_ms: u64,
    /// Cap on the retry delay.
    #[structopt(long, default_value = "1000")]
    max_backoff_ms: u64,
    /// Read from whichever node answers instead of the leader.
    #[structopt(long)]
    relaxed_reads: bool,
    /// Time allowed to connect to an endpoint.
    #[structopt(long, default_value = "10000")]
    connect_timeout_ms: u64,
    /// Deadline of each request.
    #[structopt(long, default_value = "10000")]
    request_timeout_ms: u64,
}

impl Opt {
    fn endpoint(&self, bundle: &Path) -> Result<EndpointConfig> {
        let mut endpoint = EndpointConfig::from_bundle(bundle)?
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_request_timeout(Duration::from_millis(self.request_timeout_ms));
        if let Some(token) = &self.token {
            endpoint = endpoint.with_token(token.clone());
        }
        if let Some(keyspace) = &self.keyspace {
            endpoint = endpoint.with_keyspace(keyspace.clone());
        }
        Ok(endpoint)
    }

    fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::unbounded().with_backoff(
            Duration::from_millis(self.backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        );
        if let Some(max_attempts) = self.max_attempts {
            policy = policy.with_max_attempts(max_attempts);
        }
        policy
    }

    fn workload(&self) -> WorkloadConfig {
        WorkloadConfig {
            iterations: self.iterations,
            high_water_mark: self.high_water_mark,
            backpressure: if self.permits {
                Backpressure::Permits
            } else {
                Backpressure::default()
            },
            read_consistency: if self.relaxed_reads {
                Consistency::RelaxedReads
            } else {
                Consistency::Strong
            },
            ..WorkloadConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    let opt = Opt::from_args();
    let primary = opt.endpoint(&opt.primary_bundle)?;
    let fallback = match &opt.fallback_bundle {
        Some(bundle) => Some(opt.endpoint(bundle)?),
        None => None,
    };
    if let Some(keyspace) = &primary.keyspace {
        info!("using keyspace '{}'", keyspace);
    }

    let establisher = SessionEstablisher::new(RpcConnector::new());
    let session = establisher
        .connect(&primary, fallback.as_ref())
        .await
        .context("no session connected")?;
    let session = Arc::new(session);

    let tracker = Arc::new(LatencyTracker::new());
    let executor = Arc::new(RetryExecutor::new(tracker, opt.retry_policy()));
    let workload = Workload::new(session.clone(), executor, opt.workload());
    let outcome = workload.run().await;

    if let Some(rpc) = session.active() {
        for (node, requests) in rpc.request_counts() {
            info!("{} served {} requests", node, requests);
        }
    }
    session.close().await?;

    let summary = outcome?;
    for phase in &summary.phases {
        println!(
            "{}: {} requests in {:?}: {}",
            phase.name, phase.submitted, phase.elapsed, phase.latency
        );
    }
    Ok(())
}
