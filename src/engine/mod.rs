//! Transfer execution engine
//!
//! ## Module Structure
//!
//! - [`config`] - Session configuration and builders
//! - [`remap`] - Logical to physical NUMA node and device indices
//! - [`block_order`] - Unit placement for combined kernel launches
//! - [`group`] - Per-executor runtime state
//! - [`dispatch`] - One iteration across all executors
//! - [`orchestrator`] - [`TransferEngine`], the test driver
//! - [`stats`] - Serializable results

pub mod block_order;
pub mod config;
pub mod dispatch;
pub mod group;
pub mod orchestrator;
pub mod remap;
pub mod stats;

pub use config::{BenchConfig, BlockOrder, IterationLimit, XccFilter};
pub use orchestrator::{execute_transfers, TransferEngine};
pub use remap::IndexRemap;
pub use stats::{
    bandwidth_gbps, AggregateStats, ComputeUnit, ExecutorStats, IterationSample, IterationStats, TestReport,
    TransferStats,
};
