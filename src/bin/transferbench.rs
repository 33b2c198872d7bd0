use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use transferbench::engine::{BenchConfig, BlockOrder, IterationLimit, TestReport, TransferEngine, XccFilter};
use transferbench::logging::{self, LogLevel, LoggingConfig};
use transferbench::transfer::{parse_domain_list, Executor, TransferSpec, ELEMENT_BYTES};
use transferbench::{HostPlatform, HostPlatformConfig, Platform};

#[derive(Parser, Debug)]
#[command(name = "transferbench", version)]
#[command(about = "Measure memory copy bandwidth between NUMA nodes and GPUs", long_about = None)]
struct Cli {
    /// Use the HIP runtime instead of emulated devices
    #[arg(long, global = true)]
    hip: bool,

    /// Number of emulated devices
    #[arg(long, global = true, default_value_t = 2)]
    devices: usize,

    /// Log level (error, warn, info, debug, trace); overrides TRANSFERBENCH_LOG_LEVEL
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one Transfer and report its bandwidth
    Run {
        /// Source memory, e.g. G0, C1G0 or N for none
        #[arg(long, default_value = "G0")]
        src: String,
        /// Executor, e.g. G0 (kernel), D0 (copy engine) or C0 (host threads)
        #[arg(long, default_value = "G0")]
        exe: String,
        /// Destination memory, e.g. G1 or N for none
        #[arg(long, default_value = "G1")]
        dst: String,
        /// Sub-executors (blocks or threads)
        #[arg(long, default_value_t = 4)]
        sub_execs: usize,
        /// Bytes per buffer, with optional K/M/G suffix
        #[arg(long, default_value = "64M")]
        bytes: String,
        /// Untimed warmup iterations
        #[arg(long, default_value_t = 3)]
        warmups: usize,
        /// Timed iterations; negative values run for that many seconds
        #[arg(long, default_value_t = 10, allow_hyphen_values = true)]
        iterations: i64,
        /// Launch all kernel Transfers of an executor together
        #[arg(long)]
        single_stream: bool,
        /// Block placement in single-stream mode: sequential, interleaved or random
        #[arg(long, default_value = "sequential")]
        block_order: String,
        /// Seed for random block placement
        #[arg(long)]
        seed: Option<u64>,
        /// Bytes skipped at the start of every buffer
        #[arg(long, default_value_t = 0)]
        byte_offset: usize,
        /// Spread destinations over XCCs
        #[arg(long)]
        xcc_round_robin: bool,
        /// Keep per-iteration timings
        #[arg(long)]
        show_iterations: bool,
        /// Report mismatches instead of failing
        #[arg(long)]
        continue_on_error: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the NUMA nodes and devices the engine sees
    Topology,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match &cli.log_level {
        Some(level) => {
            let level: LogLevel = level.parse()?;
            logging::init_with_config(&LoggingConfig::from_env().with_level(level));
        }
        None => logging::init_logging_default(),
    }
    let platform = build_platform(cli.hip, cli.devices)?;

    match cli.command {
        Commands::Topology => {
            println!("platform: {}", platform.name());
            println!("NUMA nodes: {:?}", platform.numa_nodes());
            let bus_ids = platform.pci_bus_ids()?;
            for (d, bus) in bus_ids.iter().enumerate() {
                println!(
                    "GPU {:02}: bus {} | {} XCC | {:.0} kHz wall clock",
                    d,
                    bus,
                    platform.xcc_count(d),
                    platform.wall_clock_khz(d)?
                );
            }
        }
        Commands::Run {
            src,
            exe,
            dst,
            sub_execs,
            bytes,
            warmups,
            iterations,
            single_stream,
            block_order,
            seed,
            byte_offset,
            xcc_round_robin,
            show_iterations,
            continue_on_error,
            json,
        } => {
            let num_bytes = parse_bytes(&bytes)?;
            if num_bytes % ELEMENT_BYTES != 0 {
                bail!("--bytes must be a multiple of {}", ELEMENT_BYTES);
            }
            let executor: Executor = exe.parse().context("invalid --exe")?;
            let transfer = TransferSpec::new(
                parse_domain_list(&src).context("invalid --src")?,
                executor,
                parse_domain_list(&dst).context("invalid --dst")?,
                sub_execs,
            );

            let mut config = BenchConfig::new()
                .with_warmups(warmups)
                .with_iterations(IterationLimit::from_signed(iterations))
                .with_single_stream(single_stream)
                .with_block_order(block_order.parse::<BlockOrder>()?)
                .with_byte_offset(byte_offset)
                .with_show_iterations(show_iterations)
                .with_continue_on_error(continue_on_error);
            if let Some(seed) = seed {
                config = config.with_random_seed(seed);
            }
            if xcc_round_robin {
                config = config.with_xcc_filter(XccFilter::from_platform(platform.as_ref()));
            }

            let engine = TransferEngine::new(Arc::clone(&platform), config)?;
            let report = engine.execute_transfers(0, num_bytes / ELEMENT_BYTES, &[transfer])?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if !report.is_valid() {
                bail!("validation failed");
            }
        }
    }
    Ok(())
}

fn build_platform(hip: bool, devices: usize) -> anyhow::Result<Arc<dyn Platform>> {
    if hip {
        #[cfg(feature = "rocm")]
        {
            return Ok(Arc::new(transferbench::HipPlatform::new()?));
        }
        #[cfg(not(feature = "rocm"))]
        bail!("--hip requires building with the `rocm` feature");
    }
    Ok(Arc::new(HostPlatform::new(HostPlatformConfig::new().with_devices(devices))?))
}

/// "64M" -> 67108864
fn parse_bytes(s: &str) -> anyhow::Result<usize> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1usize << 10),
        Some('M') => (&s[..s.len() - 1], 1 << 20),
        Some('G') => (&s[..s.len() - 1], 1 << 30),
        _ => (s, 1),
    };
    let value: usize = digits.parse().with_context(|| format!("invalid byte count '{}'", s))?;
    value
        .checked_mul(multiplier)
        .with_context(|| format!("byte count '{}' overflows", s))
}

fn print_report(report: &TestReport) {
    println!("Test {}:", report.test_id);
    for exe in &report.executors {
        println!(
            " Executor: {:>4} | {:7.3} GB/s | {:8.3} ms | {:12} bytes",
            exe.executor.to_string(),
            exe.bandwidth_gbps,
            exe.duration_ms,
            exe.num_bytes
        );
    }
    for t in &report.transfers {
        println!(
            "     Transfer {:02}  | {:7.3} GB/s | {:8.3} ms | {:12} bytes | {} -> {}:{:03} -> {}{}",
            t.index,
            t.bandwidth_gbps,
            t.duration_ms,
            t.num_bytes,
            t.srcs,
            t.executor,
            t.num_sub_execs,
            t.dsts,
            if t.valid { "" } else { " (INVALID)" }
        );
        if let Some(iters) = &t.iterations {
            for s in &iters.samples {
                let cus: Vec<String> = s.compute_units.iter().map(|c| format!("{:02}:{:02}", c.xcc, c.cu)).collect();
                println!(
                    "      Iter {:03}    | {:7.3} GB/s | {:8.3} ms | {}",
                    s.iteration,
                    s.bandwidth_gbps,
                    s.duration_ms,
                    cus.join(" ")
                );
            }
            println!(
                "      StandardDev | {:7.3} GB/s | {:8.3} ms | XCCs: {:?}",
                iters.std_dev_gbps, iters.std_dev_ms, iters.xccs
            );
        }
    }
    let agg = &report.aggregate;
    println!(
        " Aggregate (CPU)  | {:7.3} GB/s | {:8.3} ms | {:12} bytes | Overhead: {:.3} ms",
        agg.bandwidth_gbps, agg.duration_ms, agg.num_bytes, agg.overhead_ms
    );
}
