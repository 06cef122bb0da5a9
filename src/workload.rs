//! Demo workload driver.
//!
//! Runs a write phase and a read phase against a session. Every request goes
//! through the retry executor and is admitted by a throttled pipeline; the
//! latency tracker is reset at the start of each phase and reported once
//! the phase has drained.

use crate::errors::DriverError;
use crate::pipeline::{Backpressure, ThrottledPipeline, DEFAULT_HIGH_WATER_MARK};
use crate::retry::RetryExecutor;
use crate::session::{Consistency, Request, Session};
use crate::tracker::LatencyReport;
use anyhow::{Context, Result};
use derivative::Derivative;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Workload configuration.
#[derive(Clone, Debug)]
pub struct WorkloadConfig {
    /// Rows written in the write phase.
    pub iterations: u64,
    /// Outstanding requests allowed before submission waits.
    pub high_water_mark: usize,
    /// How submission waits for room.
    pub backpressure: Backpressure,
    /// Table the demo rows go to.
    pub table: String,
    /// Ids looked up by each read.
    pub read_batch: usize,
    /// Consistency of the read phase. Writes are always strong.
    pub read_consistency: Consistency,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            backpressure: Backpressure::default(),
            table: "demo_singleton".to_string(),
            read_batch: 10,
            read_consistency: Consistency::Strong,
        }
    }
}

/// Outcome of one phase.
#[derive(Clone, Debug)]
pub struct PhaseReport {
    /// Phase name.
    pub name: String,
    /// Requests submitted.
    pub submitted: usize,
    /// Wall time from first submission to drain.
    pub elapsed: Duration,
    /// Latency figures.
    pub latency: LatencyReport,
}

/// Outcome of a run.
#[derive(Clone, Debug, Default)]
pub struct WorkloadSummary {
    /// Reports in the order the phases ran.
    pub phases: Vec<PhaseReport>,
}

/// Drives the demo workload.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Workload<S> {
    #[derivative(Debug = "ignore")]
    session: Arc<S>,
    executor: Arc<RetryExecutor>,
    config: WorkloadConfig,
    run_id: String,
}

impl<S: Session + 'static> Workload<S> {
    /// Creates a new workload over `session`.
    pub fn new(session: Arc<S>, executor: Arc<RetryExecutor>, config: WorkloadConfig) -> Self {
        let run_id = format!("{:x}", unix_millis());
        Self {
            session,
            executor,
            config,
            run_id,
        }
    }

    /// Runs the workload.
    ///
    /// Stops at the first request that fails for good and returns its error
    /// once the requests already in flight have drained.
    pub async fn run(&self) -> Result<WorkloadSummary> {
        if self.config.iterations == 0 {
            info!("no iterations requested");
            return Ok(WorkloadSummary::default());
        }
        debug!(
            "running demo with {} iterations on '{}'",
            self.config.iterations, self.config.table
        );
        self.prepare().await?;
        let ids: Vec<String> = (0..self.config.iterations)
            .map(|i| format!("{}-{:08}", self.run_id, i))
            .collect();
        let write = self.phase("write", self.write_requests(&ids)).await?;
        let read = self.phase("read", self.read_requests(&ids)).await?;
        Ok(WorkloadSummary {
            phases: vec![write, read],
        })
    }

    async fn prepare(&self) -> Result<()> {
        let create = Request::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, created_at INTEGER, string TEXT, number INTEGER)",
            self.config.table
        ));
        self.executor
            .execute(&*self.session, &create)
            .await
            .with_context(|| format!("failed to create table '{}'", self.config.table))?;
        Ok(())
    }

    fn write_requests(&self, ids: &[String]) -> Vec<Request> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, created_at, string, number) VALUES (?, ?, ?, ?)",
            self.config.table
        );
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                Request::new(sql.clone())
                    .bind(id)
                    .bind(unix_millis())
                    .bind(format!("entry-{}", i))
                    .bind(i * 7919 % 9999)
            })
            .collect()
    }

    fn read_requests(&self, ids: &[String]) -> Vec<Request> {
        let batch = self.config.read_batch.max(1);
        let placeholders = vec!["?"; batch].join(", ");
        let sql = format!(
            "SELECT created_at, string, number FROM {} WHERE id IN ({})",
            self.config.table, placeholders
        );
        ids.windows(batch)
            .map(|window| {
                window
                    .iter()
                    .fold(Request::new(sql.clone()), |request, id| request.bind(id))
                    .with_consistency(self.config.read_consistency)
            })
            .collect()
    }

    async fn phase(&self, name: &str, requests: Vec<Request>) -> Result<PhaseReport> {
        let tracker = self.executor.tracker().clone();
        tracker.reset();
        let (failures_tx, failures_rx) = crossbeam_channel::unbounded::<DriverError>();
        let mut pipeline =
            ThrottledPipeline::new(self.config.high_water_mark, self.config.backpressure);
        let start = Instant::now();
        let mut submitted = 0;
        for request in requests {
            if !failures_rx.is_empty() {
                break;
            }
            let session = self.session.clone();
            let executor = self.executor.clone();
            let failures_tx = failures_tx.clone();
            pipeline
                .admit(async move {
                    match executor.execute(&*session, &request).await {
                        Ok(results) => {
                            for row in &results.rows {
                                debug!(
                                    "received record {:?} from {}",
                                    row.values, results.coordinator
                                );
                            }
                        }
                        Err(e) => {
                            error!("'{}' failed: {}", request.sql(), e);
                            let _ = failures_tx.send(e);
                        }
                    }
                })
                .await;
            submitted += 1;
        }
        pipeline.drain_to(0).await;
        let elapsed = start.elapsed();
        if let Ok(e) = failures_rx.try_recv() {
            return Err(anyhow::Error::new(e).context(format!("{} phase aborted", name)));
        }
        let latency = tracker.report();
        info!(
            "{} phase: {} requests in {:?}: {}",
            name, submitted, elapsed, latency
        );
        Ok(PhaseReport {
            name: name.to_string(),
            submitted,
            elapsed,
            latency,
        })
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
