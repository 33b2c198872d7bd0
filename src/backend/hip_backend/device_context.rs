//! Per-thread device selection
//!
//! hipSetDevice() only affects the calling thread, so every executor thread
//! selects its device before touching streams or memory. The last selection
//! is cached to skip redundant runtime calls.

use std::cell::Cell;
use std::thread_local;

use super::device::get_error_string;
use super::error::{HipError, HipResult};
use super::ffi;

thread_local! {
    static THREAD_DEVICE_ID: Cell<i32> = Cell::new(-1);
}

/// Get the current HIP device for this thread
pub fn get_thread_device() -> HipResult<i32> {
    THREAD_DEVICE_ID.with(|cell| {
        let cached = cell.get();
        if cached >= 0 {
            return Ok(cached);
        }

        let mut device: i32 = -1;
        let result = unsafe { ffi::hipGetDevice(&mut device) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipGetDevice failed: {}",
                get_error_string(result)
            )));
        }

        cell.set(device);
        Ok(device)
    })
}

/// Make `expected_device` current for the calling thread
pub fn ensure_device(expected_device: i32) -> HipResult<()> {
    let current = get_thread_device()?;
    if current != expected_device {
        tracing::trace!(
            "ensure_device: switching thread from device {} to {}",
            current,
            expected_device
        );

        let result = unsafe { ffi::hipSetDevice(expected_device) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "hipSetDevice({}) failed: {}",
                expected_device,
                get_error_string(result)
            )));
        }

        THREAD_DEVICE_ID.with(|cell| cell.set(expected_device));
    }
    Ok(())
}
