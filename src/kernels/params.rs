//! Per-block kernel parameters
//!
//! Layout must stay in sync with `struct BlockParams` in `kernels/transfer.hip`.

use std::ptr;

/// Maximum number of sources a single Transfer may read
pub const MAX_SRCS: usize = 16;

/// Maximum number of destinations a single Transfer may write
pub const MAX_DSTS: usize = 16;

/// Byte written by fills (Transfers without sources)
pub const FILL_BYTE: u8 = 75;

/// `FILL_BYTE` repeated in every byte of an `f32`
pub const FILL_VALUE: f32 = 13_323_083.0;

/// Marker for "run on any XCC"
pub const NO_PREFERRED_XCC: i32 = -1;

/// Work description of one kernel block (one sub-executor)
///
/// Inputs are written by the host before the first launch. The timing and
/// placement outputs are written by the executing block only.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockParams {
    /// Number of f32 elements this block processes
    pub n: u64,
    pub num_srcs: i32,
    pub num_dsts: i32,
    pub src: [*const f32; MAX_SRCS],
    pub dst: [*mut f32; MAX_DSTS],
    pub preferred_xcc: i32,

    // Outputs
    pub xcc_id: i32,
    pub hw_id: u32,
    pub _pad: u32,
    pub start_cycle: i64,
    pub stop_cycle: i64,
}

// Pointers are device or host addresses owned by the Transfer's memory blocks.
unsafe impl Send for BlockParams {}
unsafe impl Sync for BlockParams {}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            n: 0,
            num_srcs: 0,
            num_dsts: 0,
            src: [ptr::null(); MAX_SRCS],
            dst: [ptr::null_mut(); MAX_DSTS],
            preferred_xcc: NO_PREFERRED_XCC,
            xcc_id: 0,
            hw_id: 0,
            _pad: 0,
            start_cycle: 0,
            stop_cycle: 0,
        }
    }
}

impl BlockParams {
    /// Build the inputs of a block from element pointers that already include
    /// the block's offset.
    pub fn new(n: usize, srcs: &[*const f32], dsts: &[*mut f32], preferred_xcc: Option<i32>) -> Self {
        debug_assert!(srcs.len() <= MAX_SRCS && dsts.len() <= MAX_DSTS);

        let mut params = BlockParams {
            n: n as u64,
            num_srcs: srcs.len() as i32,
            num_dsts: dsts.len() as i32,
            preferred_xcc: preferred_xcc.unwrap_or(NO_PREFERRED_XCC),
            ..Default::default()
        };
        params.src[..srcs.len()].copy_from_slice(srcs);
        params.dst[..dsts.len()].copy_from_slice(dsts);
        params
    }

    pub fn srcs(&self) -> &[*const f32] {
        &self.src[..(self.num_srcs.max(0) as usize).min(MAX_SRCS)]
    }

    pub fn dsts(&self) -> &[*mut f32] {
        &self.dst[..(self.num_dsts.max(0) as usize).min(MAX_DSTS)]
    }

    /// Cycle delta of this block, clamped at zero
    pub fn elapsed_cycles(&self) -> i64 {
        (self.stop_cycle - self.start_cycle).max(0)
    }
}
