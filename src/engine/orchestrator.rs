//! Transfer orchestration
//!
//! [`TransferEngine::execute_transfers`] runs one test: it validates the
//! Transfers, groups them by executor, allocates and fills every buffer, runs
//! the warmup and timed iterations and turns the accumulated timings into a
//! [`TestReport`]. Every resource is owned by the per-call executor groups and
//! released when they go out of scope, on success and on error alike.

use super::block_order::order_units;
use super::config::{BenchConfig, BlockOrder, IterationLimit};
use super::dispatch::{run_iteration, DispatchContext};
use super::group::{ExecutorGroup, TransferState};
use super::remap::IndexRemap;
use super::stats::{bandwidth_gbps, AggregateStats, ExecutorStats, IterationStats, TestReport, TransferStats};
use crate::backend::{LaunchConfig, Platform};
use crate::error::BenchResult;
use crate::kernels::BlockParams;
use crate::memory::MemoryManager;
use crate::transfer::{
    assign_preferred_xcc, partition, validate_buffer, Executor, ExecutorKind, MemoryDomain, MemoryKind,
    MismatchPolicy, PatternGenerator, TransferSpec, ELEMENT_BYTES,
};
use std::collections::BTreeMap;
use std::mem::size_of;
use std::sync::Arc;
use std::time::Instant;

/// Runs Transfer tests against one platform
#[derive(Debug)]
pub struct TransferEngine {
    platform: Arc<dyn Platform>,
    config: BenchConfig,
    memory: MemoryManager,
    remap: IndexRemap,
    pattern: PatternGenerator,
}

impl TransferEngine {
    pub fn new(platform: Arc<dyn Platform>, config: BenchConfig) -> BenchResult<Self> {
        config.validate()?;
        let remap = IndexRemap::from_platform(platform.as_ref(), config.use_pcie_index)?;
        tracing::debug!(
            "TransferEngine::new: platform '{}' with {} NUMA nodes and {} devices",
            platform.name(),
            remap.topology().numa_nodes,
            remap.topology().devices
        );

        Ok(Self {
            memory: MemoryManager::new(Arc::clone(&platform)),
            pattern: PatternGenerator::new(config.fill_pattern.clone()),
            platform,
            config,
            remap,
        })
    }

    /// Replace the logical to physical index table
    pub fn with_remap(mut self, remap: IndexRemap) -> Self {
        self.remap = remap;
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn remap(&self) -> &IndexRemap {
        &self.remap
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    fn mismatch_policy(&self) -> MismatchPolicy {
        if self.config.continue_on_error {
            MismatchPolicy::Continue
        } else {
            MismatchPolicy::Abort
        }
    }

    /// Run one test of `transfers`, each moving `num_elements` f32 values
    /// unless it sets its own byte count.
    pub fn execute_transfers(
        &self,
        test_id: usize,
        num_elements: usize,
        transfers: &[TransferSpec],
    ) -> BenchResult<TestReport> {
        if transfers.is_empty() {
            return Err(crate::config_error!("test {} has no Transfers", test_id));
        }
        let topology = self.remap.topology();
        for (i, spec) in transfers.iter().enumerate() {
            spec.validate(i, &topology)?;
        }

        let mut by_executor: BTreeMap<Executor, Vec<usize>> = BTreeMap::new();
        for (i, spec) in transfers.iter().enumerate() {
            by_executor.entry(spec.executor).or_default().push(i);
        }

        let mut groups = Vec::with_capacity(by_executor.len());
        for (executor, indices) in &by_executor {
            groups.push(self.prepare_group(executor, indices, transfers, num_elements)?);
        }

        let mut source_valid = true;
        for state in groups.iter().flat_map(|g| &g.transfers) {
            if !self.prepare_sources(state)? {
                source_valid = false;
            }
        }

        let (timed_iterations, total_cpu_ms) = self.run_iterations(&mut groups, source_valid)?;

        let policy = self.mismatch_policy();
        let mut destinations_valid = true;
        for state in groups.iter_mut().flat_map(|g| g.transfers.iter_mut()) {
            state.validate_destinations(self.config.byte_offset, self.config.validate_direct, policy)?;
            destinations_valid &= state.valid;
        }

        let report = self.build_report(test_id, &groups, timed_iterations, total_cpu_ms, source_valid, destinations_valid);
        tracing::info!(
            "TransferEngine::execute_transfers: test {} moved {} bytes in {:.3} ms ({:.3} GB/s) over {} iterations",
            test_id,
            report.aggregate.num_bytes,
            report.aggregate.duration_ms,
            report.aggregate.bandwidth_gbps,
            timed_iterations
        );
        Ok(report)
    }

    /// Allocate, partition and lay out every Transfer of one executor
    fn prepare_group(
        &self,
        logical: &Executor,
        indices: &[usize],
        transfers: &[TransferSpec],
        num_elements: usize,
    ) -> BenchResult<ExecutorGroup> {
        let executor = self.remap.executor(logical)?;
        let mut states = Vec::with_capacity(indices.len());
        for &i in indices {
            states.push(self.prepare_transfer(i, &transfers[i], executor, num_elements)?);
        }

        let device = executor.index;
        let is_kernel = executor.kind == ExecutorKind::DeviceKernel;
        let combined = is_kernel && self.config.use_single_stream;

        let mut streams = Vec::new();
        let mut wall_clock_khz = 0.0;
        if executor.kind.is_device() {
            self.platform.bind_device(device)?;
            let count = if combined { 1 } else { states.len() };
            for _ in 0..count {
                streams.push(self.platform.create_stream(device)?);
            }
            wall_clock_khz = self.platform.wall_clock_khz(device)?;
        }

        let total_sub_execs: usize = states.iter().map(|t| t.units.len()).sum();
        let mut params = None;
        if is_kernel {
            let order = if combined { self.config.block_order } else { BlockOrder::Sequential };
            let counts: Vec<usize> = states.iter().map(|t| t.units.len()).collect();
            let mut records = vec![BlockParams::default(); total_sub_execs];
            for state in states.iter_mut() {
                state.slots = vec![0; state.units.len()];
            }
            for (slot, (t, u)) in order_units(&counts, order, self.config.random_seed).into_iter().enumerate() {
                states[t].slots[u] = slot;
                records[slot] = states[t].block_params[u];
            }

            let block = self.memory.allocate(
                MemoryKind::Device,
                device,
                total_sub_execs * size_of::<BlockParams>(),
            )?;
            block.write_slice(0, &records)?;
            params = Some(block);
        }

        tracing::debug!(
            "TransferEngine::prepare_group: {} ({}) with {} Transfers, {} sub-executors, {} streams",
            logical,
            executor,
            states.len(),
            total_sub_execs,
            streams.len()
        );

        Ok(ExecutorGroup {
            executor,
            transfers: states,
            streams,
            params,
            total_sub_execs,
            combined,
            launch: launch_config(&self.config, executor, total_sub_execs),
            wall_clock_khz,
            kernel_time_ms: 0.0,
        })
    }

    fn prepare_transfer(
        &self,
        index: usize,
        spec: &TransferSpec,
        executor: Executor,
        num_elements: usize,
    ) -> BenchResult<TransferState> {
        let srcs = spec
            .srcs
            .iter()
            .map(|d| self.remap.domain(d))
            .collect::<BenchResult<Vec<MemoryDomain>>>()?;
        let dsts = spec
            .dsts
            .iter()
            .map(|d| self.remap.domain(d))
            .collect::<BenchResult<Vec<MemoryDomain>>>()?;

        if executor.kind.is_device() {
            for domain in srcs.iter().chain(&dsts) {
                if domain.is_device() && domain.index != executor.index {
                    self.memory.enable_access(executor.index, domain.index)?;
                }
            }
        }

        let num_bytes = spec.bytes_for(num_elements);
        let alloc_bytes = num_bytes + self.config.byte_offset;
        let src_mem = srcs
            .iter()
            .map(|d| self.memory.allocate(d.kind, d.index, alloc_bytes))
            .collect::<BenchResult<Vec<_>>>()?;
        let dst_mem = dsts
            .iter()
            .map(|d| self.memory.allocate(d.kind, d.index, alloc_bytes))
            .collect::<BenchResult<Vec<_>>>()?;

        let elements = num_bytes / ELEMENT_BYTES;
        let mut units = partition(elements, spec.num_sub_execs, self.config.block_elements());
        if let (Some(filter), ExecutorKind::DeviceKernel, [dst]) = (&self.config.xcc_filter, executor.kind, dsts.as_slice()) {
            if dst.is_device() {
                if let Some(xcc) = filter.preferred(executor.index, dst.index) {
                    assign_preferred_xcc(&mut units, xcc);
                }
            }
        }

        let mut state = TransferState {
            index,
            spec: spec.clone(),
            executor,
            expected: self.pattern.destination(srcs.len(), elements),
            srcs,
            dsts,
            num_bytes,
            src_mem,
            dst_mem,
            units,
            block_params: Vec::new(),
            slots: Vec::new(),
            transfer_ms: 0.0,
            samples: Vec::new(),
            valid: true,
        };
        state.build_block_params(self.config.byte_offset);
        Ok(state)
    }

    /// Write the reference pattern into every source and read it back
    fn prepare_sources(&self, state: &TransferState) -> BenchResult<bool> {
        let offset = self.config.byte_offset;
        let n = state.num_elements();
        let mut valid = true;
        for (s, block) in state.src_mem.iter().enumerate() {
            let reference = self.pattern.source(s, n);
            block.write_slice(offset, &reference)?;
            let readback = block.read_f32(offset, n, false)?;
            let context = format!("{} source {} ({})", state.label(), s, state.srcs[s]);
            if !validate_buffer(&readback, &reference, self.mismatch_policy(), &context)? {
                valid = false;
            }
        }
        Ok(valid)
    }

    /// Warmups then timed iterations. Returns the number of timed iterations
    /// and their summed host wall-clock in ms.
    fn run_iterations(&self, groups: &mut [ExecutorGroup], source_valid: bool) -> BenchResult<(usize, f64)> {
        let ctx = DispatchContext {
            platform: self.platform.as_ref(),
            config: &self.config,
        };
        let policy = self.mismatch_policy();

        let mut timed_iterations = 0usize;
        let mut total_cpu_ms = 0.0;
        let mut iteration = -(self.config.num_warmups as isize);
        loop {
            if !source_valid {
                tracing::warn!("TransferEngine::run_iterations: source check failed, skipping iterations");
                break;
            }
            let done = match self.config.iterations {
                IterationLimit::Count(n) => iteration >= n as isize,
                IterationLimit::Duration(secs) => total_cpu_ms / 1000.0 > secs,
            };
            if done {
                break;
            }

            let start = Instant::now();
            run_iteration(ctx, groups, iteration)?;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            if iteration >= 0 {
                timed_iterations += 1;
                total_cpu_ms += elapsed_ms;
            }
            tracing::trace!(
                "TransferEngine::run_iterations: iteration {} took {:.3} ms",
                iteration,
                elapsed_ms
            );

            if self.config.always_validate {
                for state in groups.iter_mut().flat_map(|g| g.transfers.iter_mut()) {
                    state.validate_destinations(self.config.byte_offset, self.config.validate_direct, policy)?;
                }
            }
            iteration += 1;
        }
        Ok((timed_iterations, total_cpu_ms))
    }

    fn build_report(
        &self,
        test_id: usize,
        groups: &[ExecutorGroup],
        timed_iterations: usize,
        total_cpu_ms: f64,
        source_valid: bool,
        destinations_valid: bool,
    ) -> TestReport {
        let average = |total: f64| {
            if timed_iterations == 0 {
                0.0
            } else {
                total / timed_iterations as f64
            }
        };

        let mut transfer_stats = Vec::new();
        let mut executor_stats = Vec::new();
        let mut max_device_ms = 0.0f64;

        for group in groups {
            for t in &group.transfers {
                let duration_ms = average(t.transfer_ms);
                let gbps = bandwidth_gbps(t.num_bytes, duration_ms);
                let iterations = if self.config.show_iterations {
                    Some(IterationStats::new(t.samples.clone(), duration_ms, gbps))
                } else {
                    None
                };
                transfer_stats.push(TransferStats {
                    index: t.index,
                    srcs: domains_to_string(&t.spec.srcs),
                    executor: t.spec.executor,
                    dsts: domains_to_string(&t.spec.dsts),
                    num_bytes: t.num_bytes,
                    num_sub_execs: t.spec.num_sub_execs,
                    bandwidth_gbps: gbps,
                    duration_ms,
                    valid: t.valid,
                    iterations,
                });
            }

            let duration_ms = average(group.executor_time_ms());
            max_device_ms = max_device_ms.max(duration_ms);
            // Per-executor totals are only meaningful when Transfers share a launch
            if !self.config.use_single_stream {
                continue;
            }
            let num_bytes = group.total_bytes();
            executor_stats.push(ExecutorStats {
                executor: group
                    .transfers
                    .first()
                    .map(|t| t.spec.executor)
                    .unwrap_or(group.executor),
                bandwidth_gbps: bandwidth_gbps(num_bytes, duration_ms),
                duration_ms,
                num_bytes,
                num_sub_execs: group.total_sub_execs,
                transfers: group.transfers.iter().map(|t| t.index).collect(),
            });
        }
        transfer_stats.sort_by_key(|t| t.index);

        let num_bytes: usize = groups.iter().map(|g| g.total_bytes()).sum();
        let cpu_ms = average(total_cpu_ms);
        TestReport {
            test_id,
            transfers: transfer_stats,
            executors: executor_stats,
            aggregate: AggregateStats {
                bandwidth_gbps: bandwidth_gbps(num_bytes, cpu_ms),
                duration_ms: cpu_ms,
                num_bytes,
                max_device_ms,
                overhead_ms: cpu_ms - max_device_ms,
                timed_iterations,
            },
            source_valid,
            destinations_valid,
        }
    }
}

/// Grid of one launch on `executor`.
///
/// With an XCC filter, kernel grids span every XCC of the executor device so
/// each block can reach the XCC its destination prefers.
fn launch_config(config: &BenchConfig, executor: Executor, num_blocks: usize) -> LaunchConfig {
    let num_xccs = match &config.xcc_filter {
        Some(filter) if executor.kind == ExecutorKind::DeviceKernel => filter.xcc_count(executor.index),
        _ => 1,
    };
    LaunchConfig {
        num_blocks,
        block_size: config.block_size,
        num_xccs: num_xccs as u32,
    }
}

fn domains_to_string(domains: &[MemoryDomain]) -> String {
    if domains.is_empty() {
        return "N".to_string();
    }
    domains.iter().map(|d| d.to_string()).collect()
}

/// Build an engine for `platform` and run one test
pub fn execute_transfers(
    platform: Arc<dyn Platform>,
    config: BenchConfig,
    test_id: usize,
    num_elements: usize,
    transfers: &[TransferSpec],
) -> BenchResult<TestReport> {
    TransferEngine::new(platform, config)?.execute_transfers(test_id, num_elements, transfers)
}
