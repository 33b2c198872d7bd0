//! Executor dispatch
//!
//! One iteration runs every (executor, stream) pair on its own scoped thread
//! and joins them all before returning. Kernel executors launch their blocks
//! on a device stream, DMA executors queue a single copy or fill, and host
//! executors fan out one thread per sub-executor on the executor's NUMA node.

use super::config::BenchConfig;
use super::group::{used_compute_units, ExecutorGroup, TransferState};
use crate::backend::{DeviceStream, LaunchConfig, Platform};
use crate::error::{BenchError, BenchResult};
use crate::kernels::{reduce_block, BlockParams, FILL_BYTE};
use crate::memory::MemoryBlock;
use crate::transfer::ExecutorKind;
use std::any::Any;
use std::mem::size_of;
use std::thread;
use std::time::Instant;

/// Read-only state shared by every executor thread
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub platform: &'a dyn Platform,
    pub config: &'a BenchConfig,
}

/// Run one iteration of every group. Negative iterations are warmups.
pub fn run_iteration(ctx: DispatchContext<'_>, groups: &mut [ExecutorGroup], iteration: isize) -> BenchResult<()> {
    thread::scope(|scope| {
        let mut handles = Vec::new();

        for group in groups.iter_mut() {
            let ExecutorGroup {
                executor,
                transfers,
                streams,
                params,
                combined,
                launch,
                wall_clock_khz,
                kernel_time_ms,
                ..
            } = group;
            let device = executor.index;
            let launch = *launch;

            if *combined {
                let wall_clock_khz = *wall_clock_khz;
                let params = params.as_ref();
                handles.push(scope.spawn(move || {
                    let stream = streams
                        .first_mut()
                        .ok_or_else(|| BenchError::InternalError("combined group without a stream".to_string()))?;
                    let params = require_params(params)?;
                    run_combined_kernel(
                        ctx,
                        device,
                        transfers,
                        &mut **stream,
                        params,
                        launch,
                        wall_clock_khz,
                        kernel_time_ms,
                        iteration,
                    )
                }));
                continue;
            }

            if !executor.kind.is_device() {
                for transfer in transfers.iter_mut() {
                    handles.push(scope.spawn(move || run_host(ctx, device, transfer, iteration)));
                }
                continue;
            }

            let is_kernel = executor.kind == ExecutorKind::DeviceKernel;
            let params = params.as_ref();
            for (transfer, stream) in transfers.iter_mut().zip(streams.iter_mut()) {
                handles.push(scope.spawn(move || {
                    if is_kernel {
                        run_kernel(ctx, device, transfer, &mut **stream, require_params(params)?, launch, iteration)
                    } else {
                        run_dma(ctx, device, transfer, &mut **stream, iteration)
                    }
                }));
            }
        }

        let mut result = Ok(());
        for handle in handles {
            let outcome = handle
                .join()
                .unwrap_or_else(|panic| Err(BenchError::WorkerPanicked(panic_message(panic.as_ref()))));
            if let Err(e) = outcome {
                tracing::error!("run_iteration: executor failed in iteration {}: {}", iteration, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    })
}

fn require_params(params: Option<&MemoryBlock>) -> BenchResult<&MemoryBlock> {
    params.ok_or_else(|| BenchError::InternalError("kernel executor without a parameter buffer".to_string()))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn params_ptr(params: &MemoryBlock, slot: usize) -> *mut BlockParams {
    params.as_ptr().wrapping_add(slot * size_of::<BlockParams>()) as *mut BlockParams
}

/// All Transfers of a kernel executor in one grid
#[allow(clippy::too_many_arguments)]
fn run_combined_kernel(
    ctx: DispatchContext<'_>,
    device: usize,
    transfers: &mut [TransferState],
    stream: &mut dyn DeviceStream,
    params: &MemoryBlock,
    launch: LaunchConfig,
    wall_clock_khz: f64,
    kernel_time_ms: &mut f64,
    iteration: isize,
) -> BenchResult<()> {
    ctx.platform.bind_device(device)?;

    // SAFETY: the buffer holds `num_blocks` records whose pointers reference
    // blocks owned by `transfers`, alive for the whole call
    unsafe { stream.launch_transfer_kernel(params_ptr(params, 0), launch)? };
    stream.synchronize()?;

    if iteration < 0 {
        return Ok(());
    }

    let launch_ms = stream.last_elapsed_ms()?;
    let records: Vec<BlockParams> = params.read_vec(0, launch.num_blocks)?;
    let show = ctx.config.show_iterations;

    for transfer in transfers.iter_mut() {
        let mine: Vec<BlockParams> = transfer.slots.iter().map(|&s| records[s]).collect();
        let min_start = mine.iter().map(|r| r.start_cycle).min().unwrap_or(0);
        let max_stop = mine.iter().map(|r| r.stop_cycle).max().unwrap_or(0);
        let cycles = max_stop - min_start;
        if cycles < 0 {
            tracing::debug!(
                "run_combined_kernel: {} stop cycle precedes start cycle by {}",
                transfer.label(),
                -cycles
            );
        }
        let ms = cycles.max(0) as f64 / wall_clock_khz;

        let cus = if show { used_compute_units(ctx.platform, &mine) } else { Vec::new() };
        transfer.absorb_records(&mine);
        transfer.record(iteration, ms, cus, show);
    }
    *kernel_time_ms += launch_ms;

    tracing::trace!(
        "run_combined_kernel: device {} iteration {} launch {:.3} ms",
        device,
        iteration,
        launch_ms
    );
    Ok(())
}

/// One Transfer's blocks on its own stream
fn run_kernel(
    ctx: DispatchContext<'_>,
    device: usize,
    transfer: &mut TransferState,
    stream: &mut dyn DeviceStream,
    params: &MemoryBlock,
    launch: LaunchConfig,
    iteration: isize,
) -> BenchResult<()> {
    ctx.platform.bind_device(device)?;

    let first = transfer.slots.first().copied().unwrap_or(0);
    let launch = LaunchConfig {
        num_blocks: transfer.units.len(),
        ..launch
    };
    // SAFETY: this Transfer's records are contiguous from `first` and only
    // this thread launches them
    unsafe { stream.launch_transfer_kernel(params_ptr(params, first), launch)? };
    stream.synchronize()?;

    if iteration < 0 {
        return Ok(());
    }

    let ms = stream.last_elapsed_ms()?;
    let show = ctx.config.show_iterations;
    let cus = if show {
        let records: Vec<BlockParams> = params.read_vec(first * size_of::<BlockParams>(), launch.num_blocks)?;
        transfer.absorb_records(&records);
        used_compute_units(ctx.platform, &records)
    } else {
        Vec::new()
    };
    transfer.record(iteration, ms, cus, show);
    Ok(())
}

/// Copy engine fill or copy of one Transfer
fn run_dma(
    ctx: DispatchContext<'_>,
    device: usize,
    transfer: &mut TransferState,
    stream: &mut dyn DeviceStream,
    iteration: isize,
) -> BenchResult<()> {
    ctx.platform.bind_device(device)?;

    let offset = ctx.config.byte_offset;
    let bytes = transfer.num_bytes;
    let dst = transfer
        .dst_mem
        .first()
        .ok_or_else(|| BenchError::InternalError(format!("{} has no destination", transfer.label())))?
        .as_ptr()
        .wrapping_add(offset);

    // SAFETY: both blocks hold `offset + bytes` bytes and outlive the sync below
    unsafe {
        match transfer.src_mem.first() {
            Some(src) => stream.copy_async(dst, src.as_ptr().wrapping_add(offset), bytes)?,
            None => stream.fill_async(dst, FILL_BYTE, bytes)?,
        }
    }
    stream.synchronize()?;

    if iteration >= 0 {
        let ms = stream.last_elapsed_ms()?;
        transfer.record(iteration, ms, Vec::new(), ctx.config.show_iterations);
    }
    Ok(())
}

/// Host threads pinned to NUMA node `node`, one per sub-executor
fn run_host(ctx: DispatchContext<'_>, node: usize, transfer: &mut TransferState, iteration: isize) -> BenchResult<()> {
    ctx.platform.bind_thread_to_numa(node)?;

    let start = Instant::now();
    thread::scope(|scope| {
        for params in transfer.block_params.iter().copied() {
            // SAFETY: units cover disjoint ranges of buffers owned by `transfer`
            scope.spawn(move || unsafe { reduce_block(&params) });
        }
    });
    let ms = start.elapsed().as_secs_f64() * 1000.0;

    transfer.record(iteration, ms, Vec::new(), ctx.config.show_iterations);
    Ok(())
}
