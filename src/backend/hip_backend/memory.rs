//! HIP allocation of host and device memory
//!
//! Host kinds go through `hipHostMalloc` with `hipHostMallocNumaUser`, so the
//! calling thread's NUMA policy decides placement. Device kinds are zeroed and
//! the device synchronized before the pointer is handed out.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use super::device::get_error_string;
use super::error::{HipError, HipResult};
use super::ffi;
use crate::transfer::MemoryKind;

fn allocated(result: i32, raw: *mut c_void, call: &str, bytes: usize) -> HipResult<NonNull<u8>> {
    if result != ffi::HIP_SUCCESS {
        tracing::error!("{} failed with code {} for {} bytes", call, result, bytes);
        return Err(HipError::MemoryAllocationFailed(format!(
            "{} failed for {} bytes: {}",
            call,
            bytes,
            get_error_string(result)
        )));
    }
    NonNull::new(raw as *mut u8)
        .ok_or_else(|| HipError::MemoryAllocationFailed(format!("{} returned null pointer for {} bytes", call, bytes)))
}

/// Pinned host memory, coherent for `HostFine` and non-coherent for `HostPinned`
pub fn host_malloc(kind: MemoryKind, bytes: usize) -> HipResult<NonNull<u8>> {
    let coherence = match kind {
        MemoryKind::HostFine => ffi::HIP_HOST_MALLOC_COHERENT,
        _ => ffi::HIP_HOST_MALLOC_NON_COHERENT,
    };
    let mut raw: *mut c_void = ptr::null_mut();
    let result = unsafe { ffi::hipHostMalloc(&mut raw, bytes, ffi::HIP_HOST_MALLOC_NUMA_USER | coherence) };
    allocated(result, raw, "hipHostMalloc", bytes)
}

/// Zeroed device memory on the calling thread's current device
pub fn device_malloc(kind: MemoryKind, bytes: usize) -> HipResult<NonNull<u8>> {
    let mut raw: *mut c_void = ptr::null_mut();
    let ptr = if kind == MemoryKind::DeviceFine {
        let result = unsafe { ffi::hipExtMallocWithFlags(&mut raw, bytes, ffi::HIP_DEVICE_MALLOC_FINEGRAINED) };
        allocated(result, raw, "hipExtMallocWithFlags", bytes)?
    } else {
        let result = unsafe { ffi::hipMalloc(&mut raw, bytes) };
        allocated(result, raw, "hipMalloc", bytes)?
    };

    let zeroed = unsafe { ffi::hipMemset(ptr.as_ptr() as *mut c_void, 0, bytes) };
    let synced = if zeroed == ffi::HIP_SUCCESS {
        unsafe { ffi::hipDeviceSynchronize() }
    } else {
        zeroed
    };
    if synced != ffi::HIP_SUCCESS {
        // SAFETY: freshly allocated above and not shared
        unsafe { ffi::hipFree(ptr.as_ptr() as *mut c_void) };
        return Err(HipError::MemoryAllocationFailed(format!(
            "Failed to zero {} bytes of device memory: {}",
            bytes,
            get_error_string(synced)
        )));
    }
    Ok(ptr)
}

/// Release memory from [`host_malloc`] or [`device_malloc`]
///
/// # Safety
///
/// `ptr` must come from the allocator matching `kind` and not be used again.
pub unsafe fn free(kind: MemoryKind, ptr: NonNull<u8>) -> HipResult<()> {
    let (result, call) = if kind.is_device() {
        (ffi::hipFree(ptr.as_ptr() as *mut c_void), "hipFree")
    } else {
        (ffi::hipHostFree(ptr.as_ptr() as *mut c_void), "hipHostFree")
    };
    if result != ffi::HIP_SUCCESS {
        return Err(HipError::DeviceError(format!("{} failed: {}", call, get_error_string(result))));
    }
    Ok(())
}

/// Blocking copy in any direction
///
/// # Safety
///
/// Both ranges must be valid for `bytes`.
pub unsafe fn copy(dst: *mut u8, src: *const u8, bytes: usize) -> HipResult<()> {
    let result = ffi::hipMemcpy(
        dst as *mut c_void,
        src as *const c_void,
        bytes,
        ffi::HIP_MEMCPY_DEFAULT,
    );
    if result != ffi::HIP_SUCCESS {
        return Err(HipError::MemoryCopyFailed(format!(
            "hipMemcpy of {} bytes failed: {}",
            bytes,
            get_error_string(result)
        )));
    }
    Ok(())
}
