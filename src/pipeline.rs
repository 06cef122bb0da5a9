//! Throttled submission of asynchronous operations.

use log::{debug, error};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Default cap on outstanding operations.
pub const DEFAULT_HIGH_WATER_MARK: usize = 2000;

/// Default pause between two scans of a busy-poll drain.
///
/// Tokio's timer rounds this up to its millisecond resolution.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// How the pipeline waits for room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backpressure {
    /// Rescan the tracked operations every interval until enough completed.
    Poll(Duration),
    /// Hand out one semaphore permit per running operation; drains wait on
    /// the oldest outstanding operation instead of sleeping.
    Permits,
}

impl Default for Backpressure {
    fn default() -> Self {
        Backpressure::Poll(DEFAULT_POLL_INTERVAL)
    }
}

/// An operation running on the tokio runtime.
#[derive(Debug)]
pub struct PendingOperation {
    handle: JoinHandle<()>,
}

impl PendingOperation {
    /// Spawns `op` and returns its handle.
    pub fn spawn<F>(op: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::task::spawn(op),
        }
    }

    /// Has the operation finished, successfully or not?
    pub fn is_completed(&self) -> bool {
        self.handle.is_finished()
    }

    async fn join(self) {
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("pipeline operation panicked: {}", e);
            }
        }
    }
}

impl From<JoinHandle<()>> for PendingOperation {
    fn from(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

/// Bounds the number of operations in flight.
///
/// Every admission first waits until fewer than `high_water_mark`
/// operations are outstanding. At the end of a phase, `drain_to(0)` waits
/// for all of them.
#[derive(Debug)]
pub struct ThrottledPipeline {
    high_water_mark: usize,
    backpressure: Backpressure,
    permits: Option<Arc<Semaphore>>,
    pending: VecDeque<PendingOperation>,
}

impl ThrottledPipeline {
    /// Creates a new pipeline. A zero high-water mark is treated as one.
    pub fn new(high_water_mark: usize, backpressure: Backpressure) -> Self {
        let high_water_mark = high_water_mark.max(1);
        let permits = match backpressure {
            Backpressure::Poll(_) => None,
            Backpressure::Permits => Some(Arc::new(Semaphore::new(high_water_mark))),
        };
        Self {
            high_water_mark,
            backpressure,
            permits,
            pending: VecDeque::new(),
        }
    }

    /// The admission threshold.
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Number of tracked operations, including completed ones not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Wait for room, then start `op` and track it.
    pub async fn admit<F>(&mut self, op: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.permits.clone() {
            None => {
                self.drain_to(self.high_water_mark).await;
                self.pending.push_back(PendingOperation::spawn(op));
            }
            Some(permits) => {
                self.reap().await;
                // The semaphore is never closed, so this only waits.
                let permit = permits.acquire_owned().await.ok();
                self.pending.push_back(PendingOperation::spawn(async move {
                    op.await;
                    drop(permit);
                }));
            }
        }
    }

    /// Wait for room, then track an operation spawned elsewhere.
    pub async fn track(&mut self, op: PendingOperation) {
        self.drain_to(self.high_water_mark).await;
        self.pending.push_back(op);
    }

    /// Wait until fewer than `threshold` operations are outstanding.
    ///
    /// `drain_to(0)` returns once every tracked operation has completed.
    pub async fn drain_to(&mut self, threshold: usize) {
        if threshold == 0 && !self.pending.is_empty() {
            debug!("draining {} outstanding operations", self.pending.len());
        }
        loop {
            self.reap().await;
            if self.pending.is_empty() || self.pending.len() < threshold {
                return;
            }
            match self.backpressure {
                Backpressure::Poll(interval) => tokio::time::sleep(interval).await,
                Backpressure::Permits => {
                    if let Some(oldest) = self.pending.pop_front() {
                        oldest.join().await;
                    }
                }
            }
        }
    }

    async fn reap(&mut self) {
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(PendingOperation::is_completed);
        self.pending = pending.into();
        for op in done {
            op.join().await;
        }
    }
}

impl Default for ThrottledPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_WATER_MARK, Backpressure::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reap_keeps_running_operations_in_order() {
        let mut pipeline = ThrottledPipeline::new(10, Backpressure::default());
        let (release, released) = tokio::sync::oneshot::channel::<()>();
        pipeline.pending.push_back(PendingOperation::spawn(async {}));
        pipeline.pending.push_back(PendingOperation::spawn(async move {
            let _ = released.await;
        }));
        pipeline.pending.push_back(PendingOperation::spawn(async {}));
        while !(pipeline.pending[0].is_completed() && pipeline.pending[2].is_completed()) {
            tokio::task::yield_now().await;
        }
        pipeline.reap().await;
        assert_eq!(pipeline.in_flight(), 1);
        assert!(!pipeline.pending[0].is_completed());

        release.send(()).unwrap();
        pipeline.drain_to(0).await;
        assert_eq!(pipeline.in_flight(), 0);
    }
}
