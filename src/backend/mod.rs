//! Platform backends
//!
//! The engine talks to memory, devices and the OS through [`Platform`] and
//! [`DeviceStream`]:
//! - `host_backend`: devices emulated in host memory, kernels run on a rayon pool
//! - `hip_backend` (feature `rocm`): AMD GPUs through the HIP runtime
//! - `numa`: Linux NUMA policy, page placement and affinity helpers shared by both

pub mod host_backend;
pub mod numa;

#[cfg(feature = "rocm")]
pub mod hip_backend;

pub use host_backend::{HostPlatform, HostPlatformConfig};

#[cfg(feature = "rocm")]
pub use hip_backend::HipPlatform;

use crate::error::BenchResult;
use crate::kernels::BlockParams;
use crate::transfer::MemoryKind;
use std::fmt;
use std::ptr::NonNull;

/// Grid shape of one transfer kernel launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// One block per parameter record
    pub num_blocks: usize,
    /// Threads per block
    pub block_size: u32,
    /// Grid width; blocks off their preferred XCC exit immediately
    pub num_xccs: u32,
}

/// Memory, device and OS services used by the engine
///
/// All indices are physical. Implementations must be usable from every
/// executor thread at once.
pub trait Platform: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Number of accelerator devices
    fn device_count(&self) -> usize;

    /// NUMA nodes memory may be placed on, ascending
    fn numa_nodes(&self) -> Vec<usize> {
        numa::allowed_nodes()
    }

    /// PCIe bus id of every device, indexed by device
    fn pci_bus_ids(&self) -> BenchResult<Vec<String>>;

    /// Whether memory of `kind` can be allocated on device/node `index`
    fn supports_memory(&self, kind: MemoryKind, index: usize) -> bool;

    /// Allocate `bytes` of `kind` memory on `index`.
    ///
    /// Device memory is returned zeroed. Host memory is returned untouched so
    /// the caller controls first-touch placement.
    fn allocate(&self, kind: MemoryKind, index: usize, bytes: usize) -> BenchResult<NonNull<u8>>;

    /// Release memory obtained from [`Platform::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` with the same `kind` and `bytes` and
    /// must not be used afterwards.
    unsafe fn deallocate(&self, kind: MemoryKind, ptr: NonNull<u8>, bytes: usize) -> BenchResult<()>;

    /// Blocking copy between any two allocations (or host slices).
    ///
    /// # Safety
    ///
    /// Both ranges must be valid for `bytes` and must not overlap.
    unsafe fn copy(&self, dst: *mut u8, src: *const u8, bytes: usize) -> BenchResult<()>;

    /// Whether `device` can map memory of `peer`
    fn can_access_peer(&self, device: usize, peer: usize) -> BenchResult<bool>;

    /// Let `device` access memory of `peer`. Enabling twice succeeds.
    fn enable_peer_access(&self, device: usize, peer: usize) -> BenchResult<()>;

    /// Make `device` current for the calling thread
    fn bind_device(&self, device: usize) -> BenchResult<()>;

    /// Restrict the calling thread to the CPUs of NUMA node `node`
    fn bind_thread_to_numa(&self, node: usize) -> BenchResult<()> {
        numa::run_on_node(node)
    }

    /// New in-order work queue on `device`
    fn create_stream(&self, device: usize) -> BenchResult<Box<dyn DeviceStream>>;

    /// Frequency of the cycle counter written into [`BlockParams`], in kHz
    fn wall_clock_khz(&self, device: usize) -> BenchResult<f64>;

    /// Number of XCDs (accelerator complex dies) of `device`
    fn xcc_count(&self, _device: usize) -> usize {
        1
    }

    /// Compute unit id encoded in a raw hardware id
    fn compute_unit_id(&self, hw_id: u32) -> u32 {
        hw_id
    }
}

/// In-order work queue of one device
///
/// Each operation is bracketed by start/stop markers; after
/// [`DeviceStream::synchronize`] the marker delta of the last operation is
/// available from [`DeviceStream::last_elapsed_ms`].
pub trait DeviceStream: Send + fmt::Debug {
    fn device(&self) -> usize;

    /// Launch the transfer kernel over `launch.num_blocks` parameter records.
    ///
    /// # Safety
    ///
    /// `params` must point to `launch.num_blocks` records in memory visible to
    /// the device, whose pointers stay valid until the stream is synchronized.
    unsafe fn launch_transfer_kernel(&mut self, params: *mut BlockParams, launch: LaunchConfig) -> BenchResult<()>;

    /// Asynchronous copy engine transfer.
    ///
    /// # Safety
    ///
    /// Both ranges must be valid for `bytes` until the stream is synchronized.
    unsafe fn copy_async(&mut self, dst: *mut u8, src: *const u8, bytes: usize) -> BenchResult<()>;

    /// Asynchronous copy engine fill.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for `bytes` until the stream is synchronized.
    unsafe fn fill_async(&mut self, dst: *mut u8, value: u8, bytes: usize) -> BenchResult<()>;

    /// Wait for all queued work
    fn synchronize(&mut self) -> BenchResult<()>;

    /// Milliseconds between the markers of the last operation
    fn last_elapsed_ms(&self) -> BenchResult<f64>;
}
