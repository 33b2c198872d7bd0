//! transferbench - parallel memory Transfer benchmark
//!
//! Measures copy bandwidth between NUMA nodes and accelerator devices by
//! running many Transfers (read N sources, sum, write M destinations) at once
//! on host threads, device kernels or device copy engines, validating every
//! destination against a reference pattern.

#![allow(clippy::too_many_arguments)] // Kernel launches and dispatch need many args
#![allow(clippy::manual_slice_size_calculation)] // Common in raw buffer code
#![allow(clippy::needless_range_loop)] // Clearer for index-parallel buffers
#![allow(clippy::missing_safety_doc)] // FFI bindings documented at module level

pub mod backend;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod logging;
pub mod memory;
pub mod transfer;

pub use backend::{DeviceStream, HostPlatform, HostPlatformConfig, Platform};
pub use engine::{execute_transfers, BenchConfig, BlockOrder, IterationLimit, TestReport, TransferEngine};
pub use error::{BenchError, BenchResult, ErrorCategory};
pub use memory::{MemoryBlock, MemoryManager};
pub use transfer::{Executor, ExecutorKind, MemoryDomain, MemoryKind, TransferSpec};

#[cfg(feature = "rocm")]
pub use backend::HipPlatform;
