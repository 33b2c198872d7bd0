//! End-to-end engine tests on the emulated platform
//!
//! Covers the executor kinds, combined launches, iteration limits, the error
//! categories raised before and after allocation, and validation failures.

mod common;

use common::{
    host_platform, platform_with, quick_config, reference_value, serial, Faults, FreedBlock, InstrumentedPlatform,
};
use std::sync::Arc;
use transferbench::engine::{IndexRemap, XccFilter};
use transferbench::kernels::FILL_VALUE;
use transferbench::{
    execute_transfers, BenchConfig, BlockOrder, ErrorCategory, Executor, HostPlatformConfig, IterationLimit,
    MemoryDomain, MemoryKind, Platform, TransferEngine, TransferSpec,
};

const MIB: usize = 1 << 20;

fn gpu(i: usize) -> MemoryDomain {
    MemoryDomain::device(i)
}

#[test]
#[serial]
fn test_kernel_round_trip_small() -> anyhow::Result<()> {
    let engine = TransferEngine::new(host_platform(2), quick_config())?;
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 2);

    let report = engine.execute_transfers(0, 1024, &[t])?;

    assert!(report.is_valid());
    assert_eq!(report.transfers.len(), 1);
    assert_eq!(report.transfers[0].num_bytes, 4096);
    assert_eq!(report.transfers[0].srcs, "G0");
    assert_eq!(report.transfers[0].dsts, "G1");
    assert_eq!(report.aggregate.timed_iterations, 3);
    Ok(())
}

#[test]
#[serial]
fn test_kernel_one_mib_four_sub_executors() -> anyhow::Result<()> {
    let config = BenchConfig::new()
        .with_warmups(10)
        .with_iterations(IterationLimit::Count(10));
    let engine = TransferEngine::new(host_platform(2), config)?;
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 4);

    let report = engine.execute_transfers(1, MIB / 4, &[t])?;

    let stats = &report.transfers[0];
    assert!(stats.valid);
    assert_eq!(stats.num_bytes, MIB);
    assert_eq!(stats.num_sub_execs, 4);
    assert!(stats.bandwidth_gbps.is_finite());
    assert!(stats.bandwidth_gbps > 0.0);
    assert_eq!(report.aggregate.timed_iterations, 10);
    assert!(report.aggregate.duration_ms > 0.0);
    Ok(())
}

#[test]
#[serial]
fn test_two_source_sum() -> anyhow::Result<()> {
    let t = TransferSpec::new(vec![gpu(0), gpu(1)], Executor::kernel(0), vec![gpu(0)], 3);
    let report = execute_transfers(host_platform(2), quick_config(), 0, 4096, &[t])?;

    assert!(report.destinations_valid);
    assert_eq!(report.transfers[0].srcs, "G0G1");
    Ok(())
}

#[test]
#[serial]
fn test_zero_source_fill_with_kernel_and_dma() -> anyhow::Result<()> {
    let kernel_fill = TransferSpec::new(vec![], Executor::kernel(0), vec![gpu(0), gpu(1)], 2);
    let dma_fill = TransferSpec::new(vec![], Executor::dma(1), vec![gpu(1)], 1);

    let report = execute_transfers(host_platform(2), quick_config(), 0, 2048, &[kernel_fill, dma_fill])?;

    assert!(report.is_valid());
    assert_eq!(report.transfers[0].srcs, "N");
    // Separate streams per Transfer: no per-executor totals
    assert!(report.executors.is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_source_only_read() -> anyhow::Result<()> {
    let t = TransferSpec::new(vec![gpu(1)], Executor::kernel(0), vec![], 4);
    let report = execute_transfers(host_platform(2), quick_config(), 0, 4096, &[t])?;

    assert!(report.is_valid());
    assert_eq!(report.transfers[0].dsts, "N");
    Ok(())
}

#[test]
#[serial]
fn test_dma_copy() -> anyhow::Result<()> {
    let t = TransferSpec::copy(gpu(0), Executor::dma(0), gpu(1), 1);
    let config = quick_config().with_single_stream(true);
    let report = execute_transfers(host_platform(2), config, 0, 8192, &[t])?;

    assert!(report.is_valid());
    assert_eq!(report.executors[0].executor, Executor::dma(0));
    Ok(())
}

#[test]
#[serial]
fn test_host_executor() -> anyhow::Result<()> {
    let t = TransferSpec::copy(gpu(0), Executor::host(0), gpu(1), 4);
    let config = quick_config().with_single_stream(true);
    let report = execute_transfers(host_platform(2), config, 0, 16384, &[t])?;

    assert!(report.is_valid());
    assert_eq!(report.executors[0].executor, Executor::host(0));
    assert!(report.executors[0].duration_ms >= 0.0);
    Ok(())
}

#[test]
#[serial]
fn test_block_order_does_not_change_results() -> anyhow::Result<()> {
    let n = 10_000;
    let size = n * 4;
    let transfers = vec![
        TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 3),
        TransferSpec::copy(gpu(1), Executor::kernel(0), gpu(0), 5),
        TransferSpec::new(vec![gpu(0)], Executor::kernel(0), vec![gpu(0), gpu(1)], 2),
    ];
    let expected: Vec<f32> = (0..n).map(|i| reference_value(0, i)).collect();

    let mut first: Option<Vec<FreedBlock>> = None;
    for order in [BlockOrder::Sequential, BlockOrder::Interleaved, BlockOrder::Random] {
        let platform = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new().with_devices(2)));
        let config = quick_config()
            .with_single_stream(true)
            .with_block_order(order)
            .with_random_seed(7);
        let report = execute_transfers(platform.clone(), config, 0, n, &transfers)?;

        assert!(report.is_valid(), "{} order produced invalid output", order);
        assert_eq!(report.executors.len(), 1);
        assert_eq!(report.executors[0].num_sub_execs, 10);
        assert_eq!(report.executors[0].transfers, vec![0, 1, 2]);

        // Three sources and four destinations, all holding source pattern 0
        let mut blocks = platform.freed_blocks(MemoryKind::Device, 0, size);
        blocks.extend(platform.freed_blocks(MemoryKind::Device, 1, size));
        assert_eq!(blocks.len(), 7);
        for block in &blocks {
            assert_eq!(block.f32s(0, n), expected, "{} order: device {}", order, block.index);
        }

        match &first {
            None => first = Some(blocks),
            Some(reference) => {
                for (a, b) in reference.iter().zip(&blocks) {
                    assert_eq!(a.bytes, b.bytes, "{} order changed device {} contents", order, b.index);
                }
            }
        }
    }
    Ok(())
}

#[test]
#[serial]
fn test_combined_executor_time_covers_transfers() -> anyhow::Result<()> {
    let transfers = vec![
        TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 4),
        TransferSpec::copy(gpu(1), Executor::kernel(0), gpu(0), 4),
    ];
    let config = quick_config().with_single_stream(true);
    let report = execute_transfers(host_platform(2), config, 0, 1 << 16, &transfers)?;

    let exe = &report.executors[0];
    for t in &report.transfers {
        assert!(exe.duration_ms + 1e-6 >= t.duration_ms);
    }
    assert!(report.aggregate.max_device_ms >= exe.duration_ms);
    Ok(())
}

#[test]
#[serial]
fn test_show_iterations_keeps_samples() -> anyhow::Result<()> {
    let config = quick_config().with_show_iterations(true);
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 4);
    let report = execute_transfers(host_platform(2), config, 0, 4096, &[t])?;

    let iterations = report.transfers[0].iterations.as_ref().expect("per-iteration stats");
    assert_eq!(iterations.samples.len(), 3);
    assert!(iterations
        .samples
        .windows(2)
        .all(|w| w[0].duration_ms <= w[1].duration_ms));
    assert!(iterations.std_dev_ms >= 0.0);
    assert!(!iterations.samples[0].compute_units.is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_duration_limit_runs_at_least_once() -> anyhow::Result<()> {
    let config = BenchConfig::new()
        .with_warmups(0)
        .with_iterations(IterationLimit::Duration(0.0));
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 1);
    let report = execute_transfers(host_platform(2), config, 0, 1024, &[t])?;

    assert!(report.aggregate.timed_iterations >= 1);
    Ok(())
}

#[test]
#[serial]
fn test_report_serializes_to_json() -> anyhow::Result<()> {
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 2);
    let report = execute_transfers(host_platform(2), quick_config(), 3, 1024, &[t])?;

    let json = serde_json::to_value(&report)?;
    assert_eq!(json["test_id"], 3);
    assert_eq!(json["transfers"][0]["executor"], "G0");
    assert!(json["transfers"][0].get("iterations").is_none());
    Ok(())
}

#[test]
fn test_empty_transfer_list_is_configuration_error() {
    let err = execute_transfers(host_platform(1), quick_config(), 0, 1024, &[]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_dma_with_two_sources_rejected_before_allocation() {
    let t = TransferSpec::new(vec![gpu(0), gpu(1)], Executor::dma(0), vec![gpu(1)], 1);
    let err = execute_transfers(host_platform(2), quick_config(), 0, 1024, &[t]).unwrap_err();

    assert!(err.is_configuration_error());
}

#[test]
fn test_out_of_range_device_rejected() {
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(5), 1);
    let err = execute_transfers(host_platform(2), quick_config(), 0, 1024, &[t]).unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_too_many_sources_rejected() {
    let srcs = vec![gpu(0); 17];
    let t = TransferSpec::new(srcs, Executor::kernel(0), vec![gpu(1)], 1);
    let err = execute_transfers(host_platform(2), quick_config(), 0, 1024, &[t]).unwrap_err();

    assert!(err.is_configuration_error());
}

#[test]
fn test_denied_peer_access_is_accessibility_error() {
    let platform = platform_with(HostPlatformConfig::new().with_devices(2).with_denied_peer(0, 1));
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 1);
    let err = execute_transfers(platform, quick_config(), 0, 1024, &[t]).unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Accessibility);
}

#[test]
fn test_unsupported_fine_grained_memory_is_allocation_error() {
    let platform = platform_with(HostPlatformConfig::new().with_devices(2).with_fine_grained(false));
    let fine = MemoryDomain::new(MemoryKind::DeviceFine, 1);
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), fine, 1);
    let err = execute_transfers(platform, quick_config(), 0, 1024, &[t]).unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Allocation);
}

#[test]
#[serial]
fn test_remap_reverses_devices() -> anyhow::Result<()> {
    let platform = host_platform(2);
    let remap = IndexRemap::new(platform.numa_nodes(), vec![1, 0]);
    let config = quick_config().with_single_stream(true);
    let engine = TransferEngine::new(Arc::clone(&platform), config)?.with_remap(remap);
    let t = TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 2);

    let report = engine.execute_transfers(0, 1024, &[t])?;

    // Logical names are reported even though physical devices were swapped
    assert_eq!(report.transfers[0].srcs, "G0");
    assert_eq!(report.executors[0].executor, Executor::kernel(0));
    assert!(report.is_valid());
    Ok(())
}

fn lossy_platform() -> Arc<dyn Platform> {
    let faults = Faults {
        drop_fills: true,
        ..Faults::default()
    };
    Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new()).with_faults(faults))
}

#[test]
#[serial]
fn test_dropped_fill_is_validation_error() {
    let t = TransferSpec::new(vec![], Executor::dma(0), vec![gpu(0)], 1);
    let err = execute_transfers(lossy_platform(), quick_config(), 0, 1024, &[t]).unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Validation);
}

#[test]
#[serial]
fn test_continue_on_error_marks_transfer_invalid() -> anyhow::Result<()> {
    let transfers = vec![
        TransferSpec::new(vec![], Executor::dma(0), vec![gpu(0)], 1),
        TransferSpec::copy(gpu(0), Executor::kernel(1), gpu(1), 2),
    ];
    let config = quick_config().with_continue_on_error(true);
    let report = execute_transfers(lossy_platform(), config, 0, 1024, &transfers)?;

    assert!(!report.is_valid());
    assert!(!report.transfers[0].valid);
    assert!(report.transfers[1].valid);
    assert!(report.source_valid);
    Ok(())
}

#[test]
#[serial]
fn test_byte_offset_applies_to_every_executor() -> anyhow::Result<()> {
    let n = 1024;
    let offset = 256;
    let size = n * 4 + offset;
    let platform = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new().with_devices(4)));
    let transfers = vec![
        TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 2),
        TransferSpec::copy(gpu(0), Executor::dma(0), gpu(2), 1),
        TransferSpec::copy(gpu(0), Executor::host(0), gpu(3), 2),
    ];
    let config = quick_config().with_byte_offset(offset);

    let report = execute_transfers(platform.clone(), config, 0, n, &transfers)?;

    assert!(report.is_valid());
    assert!(report.transfers.iter().all(|t| t.num_bytes == n * 4));
    let expected: Vec<f32> = (0..n).map(|i| reference_value(0, i)).collect();
    for device in 1..4 {
        let dst = platform.freed_block(MemoryKind::Device, device, size);
        assert!(dst.bytes[..offset].iter().all(|&b| b == 0), "device {} prefix written", device);
        assert_eq!(dst.f32s(offset, n), expected, "device {}", device);
    }
    let srcs = platform.freed_blocks(MemoryKind::Device, 0, size);
    assert_eq!(srcs.len(), 3);
    for src in &srcs {
        assert!(src.bytes[..offset].iter().all(|&b| b == 0));
        assert_eq!(src.f32s(offset, n), expected);
    }
    Ok(())
}

#[test]
#[serial]
fn test_preferred_xcc_follows_single_device_destination() -> anyhow::Result<()> {
    let n = 4096;
    let platform = Arc::new(InstrumentedPlatform::new(
        HostPlatformConfig::new().with_devices(4).with_xccs_per_device(4),
    ));
    let filter = XccFilter::from_platform(platform.as_ref());
    assert_eq!(filter.xcc_count(0), 4);
    let config = quick_config().with_xcc_filter(filter).with_show_iterations(true);
    let transfers = vec![
        TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(3), 4),
        // Two destinations: no hint, blocks spread over XCCs
        TransferSpec::new(vec![gpu(0)], Executor::kernel(0), vec![gpu(1), gpu(2)], 2),
    ];

    let report = execute_transfers(platform.clone(), config, 0, n, &transfers)?;

    assert!(report.is_valid());
    let hinted = report.transfers[0].iterations.as_ref().expect("per-iteration stats");
    assert_eq!(hinted.xccs, vec![3]);
    for sample in &hinted.samples {
        assert!(sample.compute_units.iter().all(|cu| cu.xcc == 3));
    }
    let spread = report.transfers[1].iterations.as_ref().expect("per-iteration stats");
    assert_eq!(spread.xccs, vec![0, 1]);

    let expected: Vec<f32> = (0..n).map(|i| reference_value(0, i)).collect();
    for device in 1..4 {
        assert_eq!(platform.freed_block(MemoryKind::Device, device, n * 4).f32s(0, n), expected);
    }
    Ok(())
}

#[test]
#[serial]
fn test_always_validate_catches_corrupted_iteration() -> anyhow::Result<()> {
    let n = 2048;
    // Warmup is the first copy; the first timed iteration writes zeros
    let faults = Faults {
        zero_copy_on_call: Some(2),
        ..Faults::default()
    };
    let t = TransferSpec::copy(gpu(0), Executor::dma(0), gpu(1), 1);

    // Later iterations repair the destination, so only the final state is checked
    let platform = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new()).with_faults(faults));
    let report = execute_transfers(platform.clone(), quick_config(), 0, n, &[t.clone()])?;
    assert!(report.is_valid());
    let expected: Vec<f32> = (0..n).map(|i| reference_value(0, i)).collect();
    assert_eq!(platform.freed_block(MemoryKind::Device, 1, n * 4).f32s(0, n), expected);

    let platform = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new()).with_faults(faults));
    let config = quick_config().with_always_validate(true);
    let err = execute_transfers(platform, config, 0, n, &[t]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    Ok(())
}

#[test]
#[serial]
fn test_fill_pattern_replaces_reference_data() -> anyhow::Result<()> {
    let n = 1000;
    let pattern = vec![1.5f32, -2.0, 4.0];
    let platform = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new().with_devices(3)));
    let t = TransferSpec::new(vec![gpu(0), gpu(1)], Executor::kernel(0), vec![gpu(2)], 3);
    let config = quick_config().with_fill_pattern(pattern.clone());

    let report = execute_transfers(platform.clone(), config, 0, n, &[t])?;

    assert!(report.is_valid());
    // Every source carries the pattern, so the sum doubles it
    let expected: Vec<f32> = (0..n).map(|i| 2.0 * pattern[i % 3]).collect();
    assert_eq!(platform.freed_block(MemoryKind::Device, 2, n * 4).f32s(0, n), expected);
    let src: Vec<f32> = (0..n).map(|i| pattern[i % 3]).collect();
    assert_eq!(platform.freed_block(MemoryKind::Device, 1, n * 4).f32s(0, n), src);
    Ok(())
}

#[test]
#[serial]
fn test_validate_direct_reads_host_destination_in_place() -> anyhow::Result<()> {
    let n = 4096;
    let host = MemoryDomain::host(0);
    let t = TransferSpec::copy(gpu(0), Executor::dma(0), host, 1);

    let copied = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new()));
    execute_transfers(copied.clone(), quick_config(), 0, n, &[t.clone()])?;

    let direct = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new()));
    let config = quick_config().with_validate_direct(true);
    let report = execute_transfers(direct.clone(), config, 0, n, &[t])?;

    assert!(report.is_valid());
    // The final destination check skips the platform copy
    assert_eq!(copied.copy_count() - direct.copy_count(), 1);
    let node = direct.numa_nodes()[0];
    let expected: Vec<f32> = (0..n).map(|i| reference_value(0, i)).collect();
    assert_eq!(direct.freed_block(MemoryKind::HostPinned, node, n * 4).f32s(0, n), expected);

    // Reading in place still sees a destination that was never written
    let fill = TransferSpec::new(vec![], Executor::dma(0), vec![host], 1);
    let config = quick_config().with_validate_direct(true);
    let err = execute_transfers(lossy_platform(), config, 0, n, &[fill]).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    Ok(())
}

#[test]
#[serial]
fn test_pcie_index_orders_devices_by_bus_id() -> anyhow::Result<()> {
    let n = 2048;
    // Physical device 1 sits on the lower bus, so it becomes logical GPU 0
    let bus_ids = ["0000:20:00.0", "0000:10:00.0"];
    let fill = TransferSpec::new(vec![], Executor::kernel(0), vec![gpu(1)], 2);

    let platform = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new().with_devices(2)).with_bus_ids(&bus_ids));
    let config = quick_config().with_pcie_index(true);
    let report = execute_transfers(platform.clone(), config, 0, n, &[fill.clone()])?;

    assert!(report.is_valid());
    assert_eq!(report.transfers[0].dsts, "G1");
    let dst = platform.freed_block(MemoryKind::Device, 0, n * 4);
    assert!(dst.f32s(0, n).iter().all(|&v| v == FILL_VALUE));
    assert!(platform.freed_blocks(MemoryKind::Device, 1, n * 4).is_empty());

    // Runtime order keeps logical and physical indices equal
    let platform = Arc::new(InstrumentedPlatform::new(HostPlatformConfig::new().with_devices(2)).with_bus_ids(&bus_ids));
    execute_transfers(platform.clone(), quick_config(), 0, n, &[fill])?;
    assert_eq!(platform.freed_blocks(MemoryKind::Device, 1, n * 4).len(), 1);
    assert!(platform.freed_blocks(MemoryKind::Device, 0, n * 4).is_empty());
    Ok(())
}

#[test]
#[serial]
fn test_executor_stats_only_for_single_stream() -> anyhow::Result<()> {
    let transfers = vec![
        TransferSpec::copy(gpu(0), Executor::kernel(0), gpu(1), 2),
        TransferSpec::copy(gpu(1), Executor::dma(1), gpu(0), 1),
    ];

    let report = execute_transfers(host_platform(2), quick_config(), 0, 1024, &transfers)?;
    assert!(report.executors.is_empty());
    assert!(report.aggregate.max_device_ms >= 0.0);

    let config = quick_config().with_single_stream(true);
    let report = execute_transfers(host_platform(2), config, 0, 1024, &transfers)?;
    assert_eq!(report.executors.len(), 2);
    Ok(())
}
