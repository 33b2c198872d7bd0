//! HIP stream wrapper

use std::ptr;

use super::device::get_error_string;
use super::error::{HipError, HipResult};
use super::ffi;

// SAFETY: HipStream only holds a runtime handle; the engine drives each
// stream from one thread at a time.
// NOTE: HipStream does NOT implement Clone, cloning the handle would destroy
// it twice.
unsafe impl Send for HipStream {}
unsafe impl Sync for HipStream {}

/// HIP stream wrapper
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
}

impl HipStream {
    /// Create a stream on the calling thread's current device
    pub fn new() -> HipResult<Self> {
        let mut stream: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "Failed to create HIP stream: {}",
                get_error_string(result)
            )));
        }
        if stream.is_null() {
            return Err(HipError::DeviceError("hipStreamCreate returned null pointer".to_string()));
        }

        tracing::debug!("HipStream::new: created stream {:?}", stream);
        Ok(HipStream { stream })
    }

    pub fn synchronize(&self) -> HipResult<()> {
        let result = unsafe { ffi::hipStreamSynchronize(self.stream) };
        if result != ffi::HIP_SUCCESS {
            Err(HipError::DeviceError(format!(
                "Stream synchronization failed: {}",
                get_error_string(result)
            )))
        } else {
            Ok(())
        }
    }

    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            tracing::trace!("HipStream::drop: destroying stream {:?}", self.stream);
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
