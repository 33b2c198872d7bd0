//! Measurement results
//!
//! All types serialize with `serde`; rendering is left to the caller.

use crate::transfer::Executor;
use serde::Serialize;
use std::collections::BTreeSet;

/// `GB/s = (bytes / 1e9) / (ms / 1000)`, zero for non-positive durations
pub fn bandwidth_gbps(bytes: usize, ms: f64) -> f64 {
    if ms > 0.0 {
        (bytes as f64 / 1.0e9) / (ms / 1000.0)
    } else {
        0.0
    }
}

/// Compute unit a kernel block ran on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ComputeUnit {
    pub xcc: i32,
    pub cu: u32,
}

/// One timed iteration of a Transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationSample {
    /// 1-based timed iteration number
    pub iteration: usize,
    pub duration_ms: f64,
    pub bandwidth_gbps: f64,
    /// Compute units used by kernel executors (empty otherwise)
    pub compute_units: Vec<ComputeUnit>,
}

impl IterationSample {
    pub fn xccs(&self) -> BTreeSet<i32> {
        self.compute_units.iter().map(|c| c.xcc).collect()
    }
}

/// Per-iteration detail of one Transfer
#[derive(Debug, Clone, Serialize)]
pub struct IterationStats {
    /// Samples ordered by ascending duration
    pub samples: Vec<IterationSample>,
    pub std_dev_ms: f64,
    pub std_dev_gbps: f64,
    /// XCCs used across all iterations
    pub xccs: Vec<i32>,
}

impl IterationStats {
    /// Summarize samples around the Transfer's average duration and bandwidth
    pub fn new(mut samples: Vec<IterationSample>, mean_ms: f64, mean_gbps: f64) -> Self {
        let n = samples.len().max(1) as f64;
        let var_ms: f64 = samples.iter().map(|s| (s.duration_ms - mean_ms).powi(2)).sum();
        let var_gbps: f64 = samples.iter().map(|s| (s.bandwidth_gbps - mean_gbps).powi(2)).sum();

        let xccs: BTreeSet<i32> = samples.iter().flat_map(|s| s.xccs()).collect();
        samples.sort_by(|a, b| a.duration_ms.total_cmp(&b.duration_ms).then(a.iteration.cmp(&b.iteration)));

        Self {
            samples,
            std_dev_ms: (var_ms / n).sqrt(),
            std_dev_gbps: (var_gbps / n).sqrt(),
            xccs: xccs.into_iter().collect(),
        }
    }
}

/// Result of one Transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferStats {
    pub index: usize,
    pub srcs: String,
    pub executor: Executor,
    pub dsts: String,
    pub num_bytes: usize,
    pub num_sub_execs: usize,
    pub bandwidth_gbps: f64,
    /// Average duration of one timed iteration
    pub duration_ms: f64,
    /// Destinations matched the reference (false only under continue-on-error)
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<IterationStats>,
}

/// Result of one executor over all of its Transfers
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub executor: Executor,
    pub bandwidth_gbps: f64,
    pub duration_ms: f64,
    pub num_bytes: usize,
    pub num_sub_execs: usize,
    /// Indices of the Transfers run by this executor
    pub transfers: Vec<usize>,
}

/// Whole-test result as seen from the host
#[derive(Debug, Clone, Serialize)]
pub struct AggregateStats {
    /// Total bytes over average host wall-clock per iteration
    pub bandwidth_gbps: f64,
    /// Average host wall-clock per timed iteration
    pub duration_ms: f64,
    pub num_bytes: usize,
    /// Slowest executor
    pub max_device_ms: f64,
    /// Host wall-clock beyond the slowest executor
    pub overhead_ms: f64,
    pub timed_iterations: usize,
}

/// Everything measured by one `execute_transfers` call
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub test_id: usize,
    pub transfers: Vec<TransferStats>,
    pub executors: Vec<ExecutorStats>,
    pub aggregate: AggregateStats,
    /// Every source read back equal to its reference
    pub source_valid: bool,
    /// Every destination matched its reference
    pub destinations_valid: bool,
}

impl TestReport {
    pub fn is_valid(&self) -> bool {
        self.source_valid && self.destinations_valid
    }
}
