//! Transfer descriptions

use super::types::{Executor, ExecutorKind, MemoryDomain};
use crate::error::{BenchError, BenchResult};
use crate::kernels::{MAX_DSTS, MAX_SRCS};
use std::fmt;

/// Size of one element moved by every executor
pub const ELEMENT_BYTES: usize = std::mem::size_of::<f32>();

/// Number of NUMA nodes and devices visible to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemTopology {
    pub numa_nodes: usize,
    pub devices: usize,
}

impl SystemTopology {
    fn check_domain(&self, domain: &MemoryDomain) -> BenchResult<()> {
        if domain.is_host() {
            check_index("NUMA node", domain.index, self.numa_nodes)
        } else {
            check_index("GPU", domain.index, self.devices)
        }
    }

    fn check_executor(&self, executor: &Executor) -> BenchResult<()> {
        match executor.kind {
            ExecutorKind::HostThreads => check_index("NUMA node", executor.index, self.numa_nodes),
            ExecutorKind::DeviceKernel | ExecutorKind::DeviceDma => {
                check_index("GPU", executor.index, self.devices)
            }
        }
    }
}

fn check_index(what: &'static str, index: usize, count: usize) -> BenchResult<()> {
    if index >= count {
        return Err(BenchError::IndexOutOfRange { what, index, count });
    }
    Ok(())
}

/// One copy operation: read every source, sum, write every destination.
///
/// Indices are logical; the engine maps them to physical NUMA nodes and
/// devices. `num_bytes == 0` inherits the run-wide element count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSpec {
    pub srcs: Vec<MemoryDomain>,
    pub executor: Executor,
    pub dsts: Vec<MemoryDomain>,
    pub num_sub_execs: usize,
    pub num_bytes: usize,
}

impl TransferSpec {
    pub fn new(
        srcs: Vec<MemoryDomain>,
        executor: Executor,
        dsts: Vec<MemoryDomain>,
        num_sub_execs: usize,
    ) -> Self {
        Self {
            srcs,
            executor,
            dsts,
            num_sub_execs,
            num_bytes: 0,
        }
    }

    /// Single source to single destination
    pub fn copy(src: MemoryDomain, executor: Executor, dst: MemoryDomain, num_sub_execs: usize) -> Self {
        Self::new(vec![src], executor, vec![dst], num_sub_execs)
    }

    /// Override the run-wide size for this Transfer
    pub fn with_bytes(mut self, num_bytes: usize) -> Self {
        self.num_bytes = num_bytes;
        self
    }

    /// Bytes actually moved when the run-wide element count is `n`
    pub fn bytes_for(&self, n: usize) -> usize {
        if self.num_bytes == 0 {
            n * ELEMENT_BYTES
        } else {
            self.num_bytes
        }
    }

    /// Check the invariants that must hold before anything is allocated.
    pub fn validate(&self, index: usize, topology: &SystemTopology) -> BenchResult<()> {
        let invalid = |reason: String| BenchError::InvalidTransfer { index, reason };

        if self.srcs.is_empty() && self.dsts.is_empty() {
            return Err(invalid("must have at least one source or destination".to_string()));
        }
        if self.srcs.len() > MAX_SRCS {
            return Err(invalid(format!(
                "{} sources exceed the maximum of {}",
                self.srcs.len(),
                MAX_SRCS
            )));
        }
        if self.dsts.len() > MAX_DSTS {
            return Err(invalid(format!(
                "{} destinations exceed the maximum of {}",
                self.dsts.len(),
                MAX_DSTS
            )));
        }
        if self.num_sub_execs == 0 {
            return Err(invalid("requires at least one sub-executor".to_string()));
        }
        if self.num_bytes % ELEMENT_BYTES != 0 {
            return Err(invalid(format!(
                "byte count {} is not a multiple of {}",
                self.num_bytes, ELEMENT_BYTES
            )));
        }
        if self.executor.kind == ExecutorKind::DeviceDma
            && (self.dsts.len() != 1 || self.srcs.len() > 1)
        {
            return Err(invalid(format!(
                "DMA executor requires one destination and at most one source (got {} -> {})",
                self.srcs.len(),
                self.dsts.len()
            )));
        }

        topology.check_executor(&self.executor)?;
        for domain in self.srcs.iter().chain(&self.dsts) {
            topology.check_domain(domain)?;
        }
        Ok(())
    }
}

fn write_domains(f: &mut fmt::Formatter<'_>, domains: &[MemoryDomain]) -> fmt::Result {
    if domains.is_empty() {
        return write!(f, "N");
    }
    for d in domains {
        write!(f, "{}", d)?;
    }
    Ok(())
}

impl fmt::Display for TransferSpec {
    /// `SRC -> EXE:subexecs -> DST`, e.g. `G0 -> G0:4 -> G1`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_domains(f, &self.srcs)?;
        write!(f, " -> {}:{} -> ", self.executor, self.num_sub_execs)?;
        write_domains(f, &self.dsts)
    }
}
