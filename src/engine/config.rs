//! Configuration for a measurement session
//!
//! [`BenchConfig`] controls iteration counts, buffer layout, how kernel
//! blocks are scheduled, validation behavior and locality hints.

use crate::backend::Platform;
use crate::error::BenchResult;
use crate::transfer::ELEMENT_BYTES;
use std::fmt;
use std::str::FromStr;

/// When the timed loop stops
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IterationLimit {
    /// Run exactly this many timed iterations
    Count(usize),
    /// Run until cumulative timed wall-clock exceeds this many seconds
    Duration(f64),
}

impl IterationLimit {
    /// Signed form used on the command line: positive is a count, negative a
    /// duration in seconds.
    pub fn from_signed(value: i64) -> Self {
        if value < 0 {
            IterationLimit::Duration(value.unsigned_abs() as f64)
        } else {
            IterationLimit::Count(value as usize)
        }
    }
}

/// Placement of sub-executor units in a combined kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockOrder {
    /// All units of Transfer 0, then Transfer 1, ...
    #[default]
    Sequential,
    /// One unit of each Transfer in turn
    Interleaved,
    /// Seeded random permutation
    Random,
}

impl fmt::Display for BlockOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockOrder::Sequential => write!(f, "sequential"),
            BlockOrder::Interleaved => write!(f, "interleaved"),
            BlockOrder::Random => write!(f, "random"),
        }
    }
}

impl FromStr for BlockOrder {
    type Err = crate::error::BenchError;

    fn from_str(s: &str) -> BenchResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "0" | "sequential" => Ok(BlockOrder::Sequential),
            "1" | "interleaved" => Ok(BlockOrder::Interleaved),
            "2" | "random" => Ok(BlockOrder::Random),
            other => Err(crate::config_error!("unknown block order '{}'", other)),
        }
    }
}

/// Preferred XCC per (executor device, destination device)
///
/// Kernel grids of a device are launched over all of its XCCs; each block
/// runs only on the XCC its destination prefers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XccFilter {
    /// `table[executor_device][destination_device]`, physical indices
    pub table: Vec<Vec<i32>>,
    /// XCCs of every executor device, physical indices
    pub xccs_per_device: Vec<usize>,
}

impl XccFilter {
    pub fn new(table: Vec<Vec<i32>>, xccs_per_device: Vec<usize>) -> Self {
        Self { table, xccs_per_device }
    }

    /// Default layout: on executor `e`, destination `d` prefers XCC
    /// `d % xccs_per_device[e]`
    pub fn round_robin(xccs_per_device: &[usize]) -> Self {
        let num_devices = xccs_per_device.len();
        let table = xccs_per_device
            .iter()
            .map(|&xccs| {
                let xccs = xccs.max(1) as i32;
                (0..num_devices).map(|d| d as i32 % xccs).collect()
            })
            .collect();
        Self::new(table, xccs_per_device.to_vec())
    }

    /// Round robin over the XCC counts the platform reports
    pub fn from_platform(platform: &dyn Platform) -> Self {
        let xccs: Vec<usize> = (0..platform.device_count()).map(|d| platform.xcc_count(d)).collect();
        tracing::debug!("XccFilter::from_platform: XCCs per device {:?}", xccs);
        Self::round_robin(&xccs)
    }

    /// Grid width of kernel launches on `device`
    pub fn xcc_count(&self, device: usize) -> usize {
        self.xccs_per_device.get(device).copied().unwrap_or(1).max(1)
    }

    pub fn preferred(&self, executor_device: usize, dst_device: usize) -> Option<i32> {
        self.table
            .get(executor_device)
            .and_then(|row| row.get(dst_device))
            .copied()
            .filter(|&x| x >= 0)
    }

    /// Every preferred XCC must exist on its executor device
    pub fn validate(&self) -> BenchResult<()> {
        for (exe, row) in self.table.iter().enumerate() {
            let xccs = self.xcc_count(exe);
            if let Some(&xcc) = row.iter().find(|&&x| x >= 0 && x as usize >= xccs) {
                return Err(crate::config_error!(
                    "XCC filter prefers XCC {} on device {} with {} XCCs",
                    xcc,
                    exe,
                    xccs
                ));
            }
        }
        Ok(())
    }
}

/// Configuration of a measurement session
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Untimed iterations before measurement
    pub num_warmups: usize,

    /// Timed iteration limit
    pub iterations: IterationLimit,

    /// Bytes skipped at the start of every buffer
    pub byte_offset: usize,

    /// Sub-executor chunk granularity in bytes
    pub block_bytes: usize,

    /// Threads per kernel block
    pub block_size: u32,

    /// Launch all Transfers of a kernel executor as one grid
    pub use_single_stream: bool,

    /// Unit placement for single-stream launches
    pub block_order: BlockOrder,

    /// Seed for [`BlockOrder::Random`] (None = entropy)
    pub random_seed: Option<u64>,

    /// Validate destinations after every iteration
    pub always_validate: bool,

    /// Record mismatches instead of failing
    pub continue_on_error: bool,

    /// Read host-visible destinations in place instead of copying
    pub validate_direct: bool,

    /// Keep per-iteration timings and compute unit usage
    pub show_iterations: bool,

    /// Repeating source pattern replacing the default one
    pub fill_pattern: Option<Vec<f32>>,

    /// Preferred XCC hints for single-destination kernel Transfers
    pub xcc_filter: Option<XccFilter>,

    /// Number devices by ascending PCIe bus id
    pub use_pcie_index: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            num_warmups: 3,
            iterations: IterationLimit::Count(10),
            byte_offset: 0,
            block_bytes: 256,
            block_size: 256,
            use_single_stream: false,
            block_order: BlockOrder::Sequential,
            random_seed: None,
            always_validate: false,
            continue_on_error: false,
            validate_direct: false,
            show_iterations: false,
            fill_pattern: None,
            xcc_filter: None,
            use_pcie_index: false,
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_warmups(mut self, num_warmups: usize) -> Self {
        self.num_warmups = num_warmups;
        self
    }

    pub fn with_iterations(mut self, iterations: IterationLimit) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_byte_offset(mut self, byte_offset: usize) -> Self {
        self.byte_offset = byte_offset;
        self
    }

    pub fn with_block_bytes(mut self, block_bytes: usize) -> Self {
        self.block_bytes = block_bytes;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_single_stream(mut self, use_single_stream: bool) -> Self {
        self.use_single_stream = use_single_stream;
        self
    }

    pub fn with_block_order(mut self, block_order: BlockOrder) -> Self {
        self.block_order = block_order;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_always_validate(mut self, always_validate: bool) -> Self {
        self.always_validate = always_validate;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_validate_direct(mut self, validate_direct: bool) -> Self {
        self.validate_direct = validate_direct;
        self
    }

    pub fn with_show_iterations(mut self, show_iterations: bool) -> Self {
        self.show_iterations = show_iterations;
        self
    }

    pub fn with_fill_pattern(mut self, pattern: Vec<f32>) -> Self {
        self.fill_pattern = Some(pattern);
        self
    }

    pub fn with_xcc_filter(mut self, filter: XccFilter) -> Self {
        self.xcc_filter = Some(filter);
        self
    }

    pub fn with_pcie_index(mut self, use_pcie_index: bool) -> Self {
        self.use_pcie_index = use_pcie_index;
        self
    }

    /// Elements per sub-executor granule
    pub fn block_elements(&self) -> usize {
        self.block_bytes / ELEMENT_BYTES
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.byte_offset % ELEMENT_BYTES != 0 {
            return Err(crate::config_error!(
                "byte_offset must be a multiple of {} (got {})",
                ELEMENT_BYTES,
                self.byte_offset
            ));
        }
        if self.block_bytes == 0 || self.block_bytes % ELEMENT_BYTES != 0 {
            return Err(crate::config_error!(
                "block_bytes must be a non-zero multiple of {} (got {})",
                ELEMENT_BYTES,
                self.block_bytes
            ));
        }
        if self.block_size == 0 || self.block_size > 1024 || self.block_size % 64 != 0 {
            return Err(crate::config_error!(
                "block_size must be a multiple of 64 between 64 and 1024 (got {})",
                self.block_size
            ));
        }
        match self.iterations {
            IterationLimit::Count(0) => {
                return Err(crate::config_error!("at least one timed iteration is required"))
            }
            IterationLimit::Duration(secs) if !secs.is_finite() || secs < 0.0 => {
                return Err(crate::config_error!("invalid iteration duration {}", secs))
            }
            _ => {}
        }
        if let Some(pattern) = &self.fill_pattern {
            if pattern.is_empty() {
                return Err(crate::config_error!("fill pattern must not be empty"));
            }
        }
        if let Some(filter) = &self.xcc_filter {
            filter.validate()?;
        }
        Ok(())
    }
}
