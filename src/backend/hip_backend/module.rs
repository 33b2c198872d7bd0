//! HIP module and kernel wrapper
//!
//! The transfer kernel is compiled by `build.rs` into a code object whose path
//! is baked in through `TRANSFER_KERNEL_HSACO`.

use std::ffi::CString;
use std::ptr;

use super::device::get_error_string;
use super::error::{HipError, HipResult};
use super::ffi;

/// Entry point of `kernels/transfer.hip`
pub const TRANSFER_KERNEL_NAME: &str = "transfer_kernel";

// SAFETY: HipModule only holds a runtime handle
unsafe impl Send for HipModule {}
unsafe impl Sync for HipModule {}

/// HIP module wrapper
#[derive(Debug)]
pub struct HipModule {
    module: *mut std::ffi::c_void,
}

impl HipModule {
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.module
    }

    /// Load a code object image into the current device's context
    pub fn load_from_data(data: &[u8]) -> HipResult<Self> {
        let mut module: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipModuleLoadData(&mut module, data.as_ptr() as *const std::ffi::c_void) };

        if result != ffi::HIP_SUCCESS {
            let error_msg = get_error_string(result);
            return Err(HipError::KernelLoadFailed(format!(
                "Failed to load module from data: {}",
                error_msg
            )));
        }

        Ok(HipModule { module })
    }

    /// Load the transfer kernel code object built by `build.rs`
    pub fn load_transfer_kernel() -> HipResult<Self> {
        let path = option_env!("TRANSFER_KERNEL_HSACO").ok_or_else(|| {
            HipError::KernelLoadFailed("transfer kernel was not compiled (hipcc unavailable at build time)".to_string())
        })?;
        let image = std::fs::read(path)
            .map_err(|e| HipError::KernelLoadFailed(format!("Failed to read '{}': {}", path, e)))?;
        tracing::debug!("HipModule::load_transfer_kernel: {} bytes from {}", image.len(), path);
        Self::load_from_data(&image)
    }
}

impl Drop for HipModule {
    fn drop(&mut self) {
        if !self.module.is_null() {
            unsafe {
                ffi::hipModuleUnload(self.module);
            }
        }
    }
}

// SAFETY: HipKernel only holds a function handle owned by its module
unsafe impl Send for HipKernel {}
unsafe impl Sync for HipKernel {}

/// HIP kernel wrapper
#[derive(Debug)]
pub struct HipKernel {
    func: *mut std::ffi::c_void,
}

impl HipKernel {
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.func
    }

    /// Get kernel function from module
    pub fn from_module(module: &HipModule, kernel_name: &str) -> HipResult<Self> {
        let kernel_name_cstr = CString::new(kernel_name)
            .map_err(|e| HipError::KernelLoadFailed(format!("Invalid kernel name: {}", e)))?;

        let mut func: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipModuleGetFunction(&mut func, module.as_ptr(), kernel_name_cstr.as_ptr()) };

        if result != ffi::HIP_SUCCESS {
            let error_msg = get_error_string(result);
            return Err(HipError::KernelLoadFailed(format!(
                "Failed to get kernel '{}': {}",
                kernel_name, error_msg
            )));
        }

        Ok(HipKernel { func })
    }
}
