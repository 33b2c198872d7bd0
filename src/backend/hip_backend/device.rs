//! HIP device queries

use std::ffi::CStr;

use super::error::{HipError, HipResult};
use super::ffi;

/// Get HIP error string from error code
pub fn get_error_string(error: i32) -> String {
    unsafe {
        let error_ptr = ffi::hipGetErrorString(error);
        if error_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(error_ptr).to_string_lossy().into_owned()
        }
    }
}

/// Map a HIP status to a device error naming the failed call
pub(super) fn check(result: i32, call: &str) -> HipResult<()> {
    if result == ffi::HIP_SUCCESS {
        Ok(())
    } else {
        Err(HipError::DeviceError(format!("{} failed: {}", call, get_error_string(result))))
    }
}

/// Initialize the runtime and count devices
pub fn init() -> HipResult<usize> {
    let result = unsafe { ffi::hipInit(0) };
    if result != ffi::HIP_SUCCESS {
        return Err(HipError::InitializationFailed(get_error_string(result)));
    }

    let mut count: i32 = 0;
    check(unsafe { ffi::hipGetDeviceCount(&mut count) }, "hipGetDeviceCount")?;
    if count <= 0 {
        return Err(HipError::DeviceNotFound);
    }
    tracing::debug!("device::init: {} HIP devices", count);
    Ok(count as usize)
}

pub fn attribute(device: usize, attr: i32) -> HipResult<i32> {
    let mut value: i32 = 0;
    check(
        unsafe { ffi::hipDeviceGetAttribute(&mut value, attr, device as i32) },
        "hipDeviceGetAttribute",
    )?;
    Ok(value)
}

/// Wall clock rate in kHz
pub fn wall_clock_khz(device: usize) -> HipResult<f64> {
    Ok(attribute(device, ffi::HIP_DEVICE_ATTRIBUTE_WALL_CLOCK_RATE)? as f64)
}

pub fn supports_fine_grained(device: usize) -> bool {
    attribute(device, ffi::HIP_DEVICE_ATTRIBUTE_FINE_GRAIN_SUPPORT).map_or(false, |v| v != 0)
}

/// XCDs of `device`; runtimes without the attribute report one
pub fn xcc_count(device: usize) -> usize {
    match attribute(device, ffi::HIP_DEVICE_ATTRIBUTE_NUMBER_OF_XCCS) {
        Ok(n) if n > 0 => n as usize,
        Ok(n) => {
            tracing::debug!("device::xcc_count: device {} reports {} XCCs, using 1", device, n);
            1
        }
        Err(e) => {
            tracing::debug!("device::xcc_count: attribute unavailable on device {}: {}", device, e);
            1
        }
    }
}

pub fn pci_bus_id(device: usize) -> HipResult<String> {
    let mut buf = [0i8; 64];
    check(
        unsafe { ffi::hipDeviceGetPCIBusId(buf.as_mut_ptr(), buf.len() as i32, device as i32) },
        "hipDeviceGetPCIBusId",
    )?;
    // SAFETY: the runtime writes a NUL-terminated string into `buf`
    Ok(unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned())
}

pub fn can_access_peer(device: usize, peer: usize) -> HipResult<bool> {
    let mut can_access: i32 = 0;
    check(
        unsafe { ffi::hipDeviceCanAccessPeer(&mut can_access, device as i32, peer as i32) },
        "hipDeviceCanAccessPeer",
    )?;
    Ok(can_access != 0)
}

/// Enable access from the current device to `peer`; "already enabled" succeeds
pub fn enable_peer_access(peer: usize) -> HipResult<()> {
    let result = unsafe { ffi::hipDeviceEnablePeerAccess(peer as i32, 0) };
    if result == ffi::HIP_ERROR_PEER_ACCESS_ALREADY_ENABLED {
        return Ok(());
    }
    check(result, "hipDeviceEnablePeerAccess")
}

/// Compute unit id packed in the `HW_ID` hardware register
pub fn compute_unit_id(hw_id: u32) -> u32 {
    let sh_id = (hw_id >> 12) & 0x1;
    let cu_id = (hw_id >> 8) & 0xF;
    let se_id = (hw_id >> 13) & 0x3;
    (sh_id << 5) + (cu_id << 2) + se_id
}
