//! Logical to physical index mapping
//!
//! Transfers name NUMA nodes and devices by logical index. The table is built
//! once per engine and shared read-only with every executor thread.

use crate::backend::Platform;
use crate::error::{BenchError, BenchResult};
use crate::transfer::{Executor, ExecutorKind, MemoryDomain, SystemTopology};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRemap {
    cpu: Vec<usize>,
    gpu: Vec<usize>,
}

impl IndexRemap {
    pub fn new(cpu: Vec<usize>, gpu: Vec<usize>) -> Self {
        Self { cpu, gpu }
    }

    /// Build from the platform: NUMA nodes in ascending order, devices in
    /// runtime order or by ascending PCIe bus id.
    pub fn from_platform(platform: &dyn Platform, use_pcie_index: bool) -> BenchResult<Self> {
        let cpu = platform.numa_nodes();
        let mut gpu: Vec<usize> = (0..platform.device_count()).collect();

        if use_pcie_index && !gpu.is_empty() {
            let bus_ids = platform.pci_bus_ids()?;
            if bus_ids.len() != gpu.len() {
                return Err(BenchError::InternalError(format!(
                    "Platform reported {} bus ids for {} devices",
                    bus_ids.len(),
                    gpu.len()
                )));
            }
            gpu.sort_by(|&a, &b| bus_ids[a].cmp(&bus_ids[b]));
        }

        tracing::debug!("IndexRemap::from_platform: cpu {:?}, gpu {:?}", cpu, gpu);
        Ok(Self { cpu, gpu })
    }

    pub fn topology(&self) -> SystemTopology {
        SystemTopology {
            numa_nodes: self.cpu.len(),
            devices: self.gpu.len(),
        }
    }

    pub fn numa_node(&self, logical: usize) -> BenchResult<usize> {
        self.cpu.get(logical).copied().ok_or(BenchError::IndexOutOfRange {
            what: "NUMA node",
            index: logical,
            count: self.cpu.len(),
        })
    }

    pub fn device(&self, logical: usize) -> BenchResult<usize> {
        self.gpu.get(logical).copied().ok_or(BenchError::IndexOutOfRange {
            what: "GPU",
            index: logical,
            count: self.gpu.len(),
        })
    }

    pub fn domain(&self, domain: &MemoryDomain) -> BenchResult<MemoryDomain> {
        let index = if domain.is_host() {
            self.numa_node(domain.index)?
        } else {
            self.device(domain.index)?
        };
        Ok(MemoryDomain::new(domain.kind, index))
    }

    pub fn executor(&self, executor: &Executor) -> BenchResult<Executor> {
        let index = match executor.kind {
            ExecutorKind::HostThreads => self.numa_node(executor.index)?,
            ExecutorKind::DeviceKernel | ExecutorKind::DeviceDma => self.device(executor.index)?,
        };
        Ok(Executor::new(executor.kind, index))
    }
}
