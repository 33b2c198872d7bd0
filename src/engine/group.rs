//! Runtime state of Transfers and the executors that run them

use super::stats::{bandwidth_gbps, ComputeUnit, IterationSample};
use crate::backend::{DeviceStream, LaunchConfig, Platform};
use crate::error::BenchResult;
use crate::kernels::BlockParams;
use crate::memory::MemoryBlock;
use crate::transfer::{
    validate_buffer, Executor, MemoryDomain, MismatchPolicy, SubExecutorUnit, TransferSpec, ELEMENT_BYTES,
};
use std::collections::BTreeSet;

/// One Transfer with its memory, partition and accumulated timing
#[derive(Debug)]
pub struct TransferState {
    /// Position in the caller's Transfer list
    pub index: usize,
    /// As requested, with logical indices
    pub spec: TransferSpec,
    /// Physical executor and endpoints
    pub executor: Executor,
    pub srcs: Vec<MemoryDomain>,
    pub dsts: Vec<MemoryDomain>,
    pub num_bytes: usize,
    pub src_mem: Vec<MemoryBlock>,
    pub dst_mem: Vec<MemoryBlock>,
    pub units: Vec<SubExecutorUnit>,
    /// Parameter record of every unit (inputs only until a launch fills the outputs)
    pub block_params: Vec<BlockParams>,
    /// Parameter buffer slot of every unit
    pub slots: Vec<usize>,
    /// Expected contents of every destination
    pub expected: Vec<f32>,
    /// Sum over timed iterations
    pub transfer_ms: f64,
    pub samples: Vec<IterationSample>,
    pub valid: bool,
}

impl TransferState {
    pub fn num_elements(&self) -> usize {
        self.num_bytes / ELEMENT_BYTES
    }

    /// Log prefix identifying the Transfer
    pub fn label(&self) -> String {
        format!("Transfer #{:02}: {}", self.index, self.spec)
    }

    /// Fill `block_params` from the partition and the allocated buffers
    pub fn build_block_params(&mut self, byte_offset: usize) {
        let srcs: Vec<*const f32> = self.src_mem.iter().map(|m| m.f32_ptr(byte_offset) as *const f32).collect();
        let dsts: Vec<*mut f32> = self.dst_mem.iter().map(|m| m.f32_ptr(byte_offset)).collect();

        self.block_params = self
            .units
            .iter()
            .map(|unit| {
                let s: Vec<*const f32> = srcs.iter().map(|p| p.wrapping_add(unit.offset)).collect();
                let d: Vec<*mut f32> = dsts.iter().map(|p| p.wrapping_add(unit.offset)).collect();
                BlockParams::new(unit.count, &s, &d, unit.preferred_xcc)
            })
            .collect();
    }

    /// Account one iteration; warmups (negative iterations) are ignored
    pub fn record(&mut self, iteration: isize, ms: f64, compute_units: Vec<ComputeUnit>, keep_sample: bool) {
        if iteration < 0 {
            return;
        }
        self.transfer_ms += ms;
        if keep_sample {
            self.samples.push(IterationSample {
                iteration: iteration as usize + 1,
                duration_ms: ms,
                bandwidth_gbps: bandwidth_gbps(self.num_bytes, ms),
                compute_units,
            });
        }
    }

    /// Copy the returned block outputs into the partition
    pub fn absorb_records(&mut self, records: &[BlockParams]) {
        for (unit, record) in self.units.iter_mut().zip(records) {
            unit.start_cycle = record.start_cycle;
            unit.stop_cycle = record.stop_cycle;
        }
    }

    /// Compare every destination with the reference.
    ///
    /// Returns `Ok(false)` after marking the Transfer invalid when a
    /// destination differs under [`MismatchPolicy::Continue`].
    pub fn validate_destinations(
        &mut self,
        byte_offset: usize,
        direct: bool,
        policy: MismatchPolicy,
    ) -> BenchResult<bool> {
        let n = self.num_elements();
        let mut all_valid = true;
        for (d, block) in self.dst_mem.iter().enumerate() {
            let actual = block.read_f32(byte_offset, n, direct)?;
            let context = format!("{} destination {} ({})", self.label(), d, self.dsts[d]);
            if !validate_buffer(&actual, &self.expected, policy, &context)? {
                all_valid = false;
            }
        }
        if !all_valid {
            self.valid = false;
        }
        Ok(all_valid)
    }
}

/// Compute units recorded by a set of block outputs
pub fn used_compute_units(platform: &dyn Platform, records: &[BlockParams]) -> Vec<ComputeUnit> {
    records
        .iter()
        .map(|r| ComputeUnit {
            xcc: r.xcc_id,
            cu: platform.compute_unit_id(r.hw_id),
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Transfers sharing one executor
#[derive(Debug)]
pub struct ExecutorGroup {
    /// Physical executor
    pub executor: Executor,
    pub transfers: Vec<TransferState>,
    /// One per Transfer, or a single stream in combined mode (empty for host executors)
    pub streams: Vec<Box<dyn DeviceStream>>,
    /// Parameter records of every unit of the group (kernel executors)
    pub params: Option<MemoryBlock>,
    pub total_sub_execs: usize,
    /// All Transfers run as one kernel launch
    pub combined: bool,
    pub launch: LaunchConfig,
    /// Cycle counter frequency of the executing device
    pub wall_clock_khz: f64,
    /// Sum of combined launch durations over timed iterations
    pub kernel_time_ms: f64,
}

impl ExecutorGroup {
    pub fn total_bytes(&self) -> usize {
        self.transfers.iter().map(|t| t.num_bytes).sum()
    }

    /// Time spent by the executor over all timed iterations.
    ///
    /// Combined launches report their own duration; otherwise Transfers run
    /// concurrently, so the slowest one bounds the executor.
    pub fn executor_time_ms(&self) -> f64 {
        if self.combined {
            self.kernel_time_ms
        } else {
            self.transfers.iter().map(|t| t.transfer_ms).fold(0.0, f64::max)
        }
    }
}
