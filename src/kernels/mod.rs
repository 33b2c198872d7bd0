//! Transfer kernels
//!
//! - `params`: the `#[repr(C)]` per-block parameter record shared with `kernels/transfer.hip`
//! - `reduce`: host implementation of the copy/reduce kernel, used by host executors and
//!   by emulated device grids

pub mod params;
pub mod reduce;

pub use params::{BlockParams, FILL_BYTE, FILL_VALUE, MAX_DSTS, MAX_SRCS, NO_PREFERRED_XCC};
pub use reduce::{reduce_block, reduce_range};
