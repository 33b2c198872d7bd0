//! [`Platform`] implementation on the HIP runtime

use std::alloc::{self, Layout};
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::device;
use super::device_context::ensure_device;
use super::error::HipError;
use super::event::HipEvent;
use super::ffi;
use super::memory;
use super::module::{HipKernel, HipModule, TRANSFER_KERNEL_NAME};
use super::stream::HipStream;
use crate::backend::{numa, DeviceStream, LaunchConfig, Platform};
use crate::error::{BenchError, BenchResult};
use crate::kernels::BlockParams;
use crate::transfer::MemoryKind;

/// Transfer kernel loaded into one device's context
#[derive(Debug)]
struct TransferKernel {
    kernel: HipKernel,
    _module: HipModule,
}

/// AMD GPUs through the HIP runtime
#[derive(Debug)]
pub struct HipPlatform {
    device_count: usize,
    fine_grained: Vec<bool>,
    xccs: Vec<usize>,
    kernels: Vec<OnceCell<Arc<TransferKernel>>>,
    page_size: usize,
}

impl HipPlatform {
    pub fn new() -> BenchResult<Self> {
        let device_count = device::init()?;
        let fine_grained = (0..device_count).map(device::supports_fine_grained).collect();
        let xccs: Vec<usize> = (0..device_count).map(device::xcc_count).collect();
        tracing::info!("HipPlatform::new: {} devices, XCCs {:?}", device_count, xccs);

        Ok(Self {
            device_count,
            fine_grained,
            xccs,
            kernels: (0..device_count).map(|_| OnceCell::new()).collect(),
            page_size: numa::page_size(),
        })
    }

    fn check_device(&self, device: usize) -> BenchResult<()> {
        if device >= self.device_count {
            return Err(BenchError::IndexOutOfRange {
                what: "GPU",
                index: device,
                count: self.device_count,
            });
        }
        Ok(())
    }

    fn transfer_kernel(&self, device: usize) -> BenchResult<Arc<TransferKernel>> {
        self.check_device(device)?;
        let kernel = self.kernels[device].get_or_try_init(|| -> BenchResult<Arc<TransferKernel>> {
            ensure_device(device as i32)?;
            let module = HipModule::load_transfer_kernel()?;
            let kernel = HipKernel::from_module(&module, TRANSFER_KERNEL_NAME)?;
            tracing::debug!("HipPlatform::transfer_kernel: loaded on device {}", device);
            Ok(Arc::new(TransferKernel {
                kernel,
                _module: module,
            }))
        })?;
        Ok(Arc::clone(kernel))
    }

    fn unpinned_layout(&self, bytes: usize) -> BenchResult<Layout> {
        Layout::from_size_align(bytes, self.page_size)
            .map_err(|e| BenchError::AllocationFailed(format!("Invalid layout for {} bytes: {}", bytes, e)))
    }
}

impl Platform for HipPlatform {
    fn name(&self) -> &str {
        "hip"
    }

    fn device_count(&self) -> usize {
        self.device_count
    }

    fn pci_bus_ids(&self) -> BenchResult<Vec<String>> {
        (0..self.device_count)
            .map(|d| device::pci_bus_id(d).map_err(BenchError::from))
            .collect()
    }

    fn supports_memory(&self, kind: MemoryKind, index: usize) -> bool {
        match kind {
            MemoryKind::HostPinned | MemoryKind::HostFine | MemoryKind::HostUnpinned => true,
            MemoryKind::Device => index < self.device_count,
            MemoryKind::DeviceFine => self.fine_grained.get(index).copied().unwrap_or(false),
        }
    }

    fn allocate(&self, kind: MemoryKind, index: usize, bytes: usize) -> BenchResult<NonNull<u8>> {
        if bytes == 0 {
            return Err(BenchError::ZeroSizeAllocation);
        }
        match kind {
            MemoryKind::HostUnpinned => {
                let layout = self.unpinned_layout(bytes)?;
                // SAFETY: layout has non-zero size
                NonNull::new(unsafe { alloc::alloc(layout) })
                    .ok_or_else(|| BenchError::AllocationFailed(format!("Out of memory allocating {} bytes", bytes)))
            }
            MemoryKind::HostPinned | MemoryKind::HostFine => Ok(memory::host_malloc(kind, bytes)?),
            MemoryKind::Device | MemoryKind::DeviceFine => {
                self.check_device(index)?;
                ensure_device(index as i32)?;
                Ok(memory::device_malloc(kind, bytes)?)
            }
        }
    }

    unsafe fn deallocate(&self, kind: MemoryKind, ptr: NonNull<u8>, bytes: usize) -> BenchResult<()> {
        if kind == MemoryKind::HostUnpinned {
            alloc::dealloc(ptr.as_ptr(), self.unpinned_layout(bytes)?);
            return Ok(());
        }
        Ok(memory::free(kind, ptr)?)
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8, bytes: usize) -> BenchResult<()> {
        Ok(memory::copy(dst, src, bytes)?)
    }

    fn can_access_peer(&self, device: usize, peer: usize) -> BenchResult<bool> {
        self.check_device(device)?;
        self.check_device(peer)?;
        Ok(device::can_access_peer(device, peer)?)
    }

    fn enable_peer_access(&self, device: usize, peer: usize) -> BenchResult<()> {
        if !self.can_access_peer(device, peer)? {
            return Err(BenchError::PeerAccessUnavailable { device, peer });
        }
        ensure_device(device as i32)?;
        Ok(device::enable_peer_access(peer)?)
    }

    fn bind_device(&self, device: usize) -> BenchResult<()> {
        self.check_device(device)?;
        Ok(ensure_device(device as i32)?)
    }

    fn create_stream(&self, device: usize) -> BenchResult<Box<dyn DeviceStream>> {
        let kernel = self.transfer_kernel(device)?;
        ensure_device(device as i32)?;
        Ok(Box::new(HipTimedStream {
            device,
            kernel,
            start: HipEvent::new()?,
            stop: HipEvent::new()?,
            stream: HipStream::new()?,
        }))
    }

    fn wall_clock_khz(&self, device: usize) -> BenchResult<f64> {
        self.check_device(device)?;
        Ok(device::wall_clock_khz(device)?)
    }

    fn xcc_count(&self, device: usize) -> usize {
        self.xccs.get(device).copied().unwrap_or(1)
    }

    fn compute_unit_id(&self, hw_id: u32) -> u32 {
        device::compute_unit_id(hw_id)
    }
}

/// HIP stream with start/stop events around every operation
#[derive(Debug)]
pub struct HipTimedStream {
    device: usize,
    kernel: Arc<TransferKernel>,
    start: HipEvent,
    stop: HipEvent,
    stream: HipStream,
}

impl HipTimedStream {
    fn bracket<F: FnOnce(*mut c_void) -> i32>(&mut self, call: &str, op: F) -> BenchResult<()> {
        ensure_device(self.device as i32)?;
        self.start.record(&self.stream)?;
        let result = op(self.stream.as_ptr());
        if result != ffi::HIP_SUCCESS {
            let message = format!("{} on device {}: {}", call, self.device, device::get_error_string(result));
            return Err(if call == "hipModuleLaunchKernel" {
                BenchError::KernelLaunchFailed(message)
            } else {
                BenchError::from(HipError::DeviceError(message))
            });
        }
        self.stop.record(&self.stream)?;
        Ok(())
    }
}

impl DeviceStream for HipTimedStream {
    fn device(&self) -> usize {
        self.device
    }

    unsafe fn launch_transfer_kernel(&mut self, params: *mut BlockParams, launch: LaunchConfig) -> BenchResult<()> {
        let func = self.kernel.kernel.as_ptr();
        let mut arg = params;
        let mut args = [&mut arg as *mut *mut BlockParams as *mut c_void];
        self.bracket("hipModuleLaunchKernel", |stream| {
            ffi::hipModuleLaunchKernel(
                func,
                launch.num_xccs.max(1),
                launch.num_blocks as u32,
                1,
                launch.block_size,
                1,
                1,
                0,
                stream,
                args.as_mut_ptr(),
                ptr::null_mut(),
            )
        })
    }

    unsafe fn copy_async(&mut self, dst: *mut u8, src: *const u8, bytes: usize) -> BenchResult<()> {
        self.bracket("hipMemcpyAsync", |stream| {
            ffi::hipMemcpyAsync(
                dst as *mut c_void,
                src as *const c_void,
                bytes,
                ffi::HIP_MEMCPY_DEFAULT,
                stream,
            )
        })
    }

    unsafe fn fill_async(&mut self, dst: *mut u8, value: u8, bytes: usize) -> BenchResult<()> {
        self.bracket("hipMemsetAsync", |stream| {
            ffi::hipMemsetAsync(dst as *mut c_void, value as i32, bytes, stream)
        })
    }

    fn synchronize(&mut self) -> BenchResult<()> {
        Ok(self.stream.synchronize()?)
    }

    fn last_elapsed_ms(&self) -> BenchResult<f64> {
        Ok(self.start.elapsed_time(&self.stop)? as f64)
    }
}
