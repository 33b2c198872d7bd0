//! HIP FFI bindings
//!
//! Only the runtime entry points used by the transfer backend are declared.

use std::ffi::c_void;

#[link(name = "amdhip64")]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipGetDevice(deviceId: *mut i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipDeviceGetAttribute(value: *mut i32, attr: i32, deviceId: i32) -> i32;
    pub fn hipDeviceGetPCIBusId(pciBusId: *mut i8, len: i32, deviceId: i32) -> i32;
    pub fn hipDeviceCanAccessPeer(canAccess: *mut i32, deviceId: i32, peerDeviceId: i32) -> i32;
    pub fn hipDeviceEnablePeerAccess(peerDeviceId: i32, flags: u32) -> i32;
    pub fn hipDeviceSynchronize() -> i32;

    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipExtMallocWithFlags(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipHostMalloc(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipHostFree(ptr: *mut c_void) -> i32;
    pub fn hipMemset(dst: *mut c_void, value: i32, count: usize) -> i32;
    pub fn hipMemcpy(dst: *mut c_void, src: *const c_void, count: usize, kind: i32) -> i32;
    pub fn hipMemcpyAsync(dst: *mut c_void, src: *const c_void, count: usize, kind: i32, stream: *mut c_void) -> i32;
    pub fn hipMemsetAsync(dst: *mut c_void, value: i32, count: usize, stream: *mut c_void) -> i32;

    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
    pub fn hipEventCreate(event: *mut *mut c_void) -> i32;
    pub fn hipEventDestroy(event: *mut c_void) -> i32;
    pub fn hipEventRecord(event: *mut c_void, stream: *mut c_void) -> i32;
    pub fn hipEventElapsedTime(ms: *mut f32, start: *mut c_void, end: *mut c_void) -> i32;

    pub fn hipModuleLoadData(module: *mut *mut c_void, image: *const c_void) -> i32;
    pub fn hipModuleUnload(module: *mut c_void) -> i32;
    pub fn hipModuleGetFunction(func: *mut *mut c_void, module: *mut c_void, name: *const i8) -> i32;
    pub fn hipModuleLaunchKernel(
        func: *mut c_void,
        gridDimX: u32,
        gridDimY: u32,
        gridDimZ: u32,
        blockDimX: u32,
        blockDimY: u32,
        blockDimZ: u32,
        sharedMemBytes: u32,
        stream: *mut c_void,
        kernelParams: *mut *mut c_void,
        extra: *mut *mut c_void,
    ) -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
}

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// `hipErrorPeerAccessAlreadyEnabled`
pub const HIP_ERROR_PEER_ACCESS_ALREADY_ENABLED: i32 = 704;

/// `hipMemcpyDefault`: direction inferred from the pointers
pub const HIP_MEMCPY_DEFAULT: i32 = 4;

// hipDeviceAttribute_t
pub const HIP_DEVICE_ATTRIBUTE_FINE_GRAIN_SUPPORT: i32 = 10016;
pub const HIP_DEVICE_ATTRIBUTE_WALL_CLOCK_RATE: i32 = 10017;
pub const HIP_DEVICE_ATTRIBUTE_NUMBER_OF_XCCS: i32 = 10018;

// hipHostMalloc flags
pub const HIP_HOST_MALLOC_NUMA_USER: u32 = 0x2000_0000;
pub const HIP_HOST_MALLOC_COHERENT: u32 = 0x4000_0000;
pub const HIP_HOST_MALLOC_NON_COHERENT: u32 = 0x8000_0000;

/// `hipDeviceMallocFinegrained`
pub const HIP_DEVICE_MALLOC_FINEGRAINED: u32 = 0x1;
