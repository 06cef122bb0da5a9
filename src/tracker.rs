//! Request latency tracking.

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Collects per-request outcomes for one measurement phase.
///
/// Recording is lock-free and may happen from any number of completion
/// tasks at once: samples land in a queue. Readers move whatever has
/// arrived into the settled samples under a lock and read from there, so
/// a read never hides samples from a concurrent reader.
///
/// `reset` does not wait for requests of the previous phase that are still
/// completing. A straggler recorded after `reset` is counted in the new
/// phase; drain the pipeline before resetting to avoid this.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    arrivals: SegQueue<Duration>,
    samples: Mutex<Vec<Duration>>,
    errors: AtomicU64,
}

impl LatencyTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latency of a successful request.
    pub fn record_success(&self, latency: Duration) {
        self.arrivals.push(latency);
    }

    /// Record a request that failed for good.
    pub fn record_failure(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of successful requests recorded.
    pub fn count(&self) -> usize {
        let mut samples = self.samples.lock();
        self.settle(&mut samples);
        samples.len()
    }

    /// Number of failed requests recorded.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    /// Latency at each of the given percentiles, nearest-rank.
    ///
    /// Each result is the sample at index `ceil(p / 100 * n) - 1` of the
    /// ascending samples. Percentiles above 100 yield the largest sample.
    /// With no samples every percentile is `Duration::ZERO`.
    pub fn percentiles(&self, percentiles: &[u32]) -> Vec<Duration> {
        let samples = self.sorted_samples();
        percentiles
            .iter()
            .map(|&p| percentile(&samples, p))
            .collect()
    }

    /// Average latency of the successful requests, zero if there are none.
    pub fn mean(&self) -> Duration {
        mean(&self.sorted_samples())
    }

    /// Summary of the current phase, taken from a single copy of the samples.
    pub fn report(&self) -> LatencyReport {
        let samples = self.sorted_samples();
        LatencyReport {
            count: samples.len(),
            errors: self.errors(),
            mean: mean(&samples),
            p50: percentile(&samples, 50),
            p90: percentile(&samples, 90),
            p99: percentile(&samples, 99),
        }
    }

    /// Clear all samples and zero the error counter.
    pub fn reset(&self) {
        let mut samples = self.samples.lock();
        while self.arrivals.pop().is_some() {}
        samples.clear();
        self.errors.store(0, Ordering::SeqCst);
    }

    fn sorted_samples(&self) -> Vec<Duration> {
        let mut samples = self.samples.lock();
        self.settle(&mut samples);
        let mut copy = samples.clone();
        drop(samples);
        copy.sort_unstable();
        copy
    }

    fn settle(&self, samples: &mut Vec<Duration>) {
        while let Some(sample) = self.arrivals.pop() {
            samples.push(sample);
        }
    }
}

fn percentile(sorted: &[Duration], p: u32) -> Duration {
    match sorted.len() {
        0 => Duration::ZERO,
        n => sorted[nearest_rank(p, n)],
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

// Summed in nanoseconds so neither the total nor the count can overflow.
fn mean(samples: &[Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let total: u128 = samples.iter().map(Duration::as_nanos).sum();
    let nanos = total / samples.len() as u128;
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}

fn nearest_rank(percentile: u32, n: usize) -> usize {
    let rank = (percentile as usize * n + 99) / 100;
    rank.saturating_sub(1).min(n - 1)
}

/// Latency summary of one phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatencyReport {
    /// Successful requests.
    pub count: usize,
    /// Failed requests.
    pub errors: u64,
    /// Average latency.
    pub mean: Duration,
    /// Median latency.
    pub p50: Duration,
    /// 90th percentile latency.
    pub p90: Duration,
    /// 99th percentile latency.
    pub p99: Duration,
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok={} errors={} mean={:?} p50={:?} p90={:?} p99={:?}",
            self.count, self.errors, self.mean, self.p50, self.p90, self.p99
        )
    }
}
