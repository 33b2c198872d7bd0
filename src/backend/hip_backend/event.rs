//! HIP timing event wrapper

use std::ptr;

use super::device::get_error_string;
use super::error::{HipError, HipResult};
use super::ffi;
use super::stream::HipStream;

// SAFETY: HipEvent only holds a runtime handle.
// NOTE: HipEvent does NOT implement Clone, cloning the handle would destroy
// it twice.
unsafe impl Send for HipEvent {}
unsafe impl Sync for HipEvent {}

/// HIP event with timing enabled
#[derive(Debug)]
pub struct HipEvent {
    event: *mut std::ffi::c_void,
}

impl HipEvent {
    pub fn new() -> HipResult<Self> {
        let mut event: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipEventCreate(&mut event) };
        if result != ffi::HIP_SUCCESS {
            return Err(HipError::DeviceError(format!(
                "Failed to create HIP event: {}",
                get_error_string(result)
            )));
        }
        if event.is_null() {
            return Err(HipError::DeviceError("hipEventCreate returned null pointer".to_string()));
        }
        Ok(HipEvent { event })
    }

    /// Record this event in the given stream
    pub fn record(&self, stream: &HipStream) -> HipResult<()> {
        let result = unsafe { ffi::hipEventRecord(self.event, stream.as_ptr()) };
        if result != ffi::HIP_SUCCESS {
            Err(HipError::DeviceError(format!(
                "Event record failed: {}",
                get_error_string(result)
            )))
        } else {
            Ok(())
        }
    }

    /// Milliseconds between `self` (start) and `end`.
    ///
    /// Both events must have completed.
    pub fn elapsed_time(&self, end: &HipEvent) -> HipResult<f32> {
        let mut ms: f32 = 0.0;
        let result = unsafe { ffi::hipEventElapsedTime(&mut ms, self.event, end.event) };
        if result != ffi::HIP_SUCCESS {
            Err(HipError::DeviceError(format!(
                "Failed to get elapsed time: {}",
                get_error_string(result)
            )))
        } else {
            Ok(ms)
        }
    }
}

impl Drop for HipEvent {
    fn drop(&mut self) {
        if !self.event.is_null() {
            tracing::trace!("HipEvent::drop: Destroying HIP event");
            unsafe {
                ffi::hipEventDestroy(self.event);
            }
        }
    }
}
