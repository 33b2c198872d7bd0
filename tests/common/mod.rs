//! Common fixtures for engine tests
//!
//! Every test runs against the emulated [`HostPlatform`], so nothing here needs
//! a GPU. Tests that time iterations run `#[serial]` to keep the kernel pool
//! to themselves.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use transferbench::backend::{DeviceStream, LaunchConfig};
use transferbench::kernels::BlockParams;
use transferbench::{
    BenchConfig, BenchResult, HostPlatform, HostPlatformConfig, IterationLimit, MemoryKind, Platform,
};

pub use serial_test::serial;

/// Emulated platform with `devices` devices and default capabilities
pub fn host_platform(devices: usize) -> Arc<dyn Platform> {
    platform_with(HostPlatformConfig::new().with_devices(devices))
}

pub fn platform_with(config: HostPlatformConfig) -> Arc<dyn Platform> {
    Arc::new(HostPlatform::new(config).expect("emulated platform"))
}

/// Small, fast run: one warmup and three timed iterations
pub fn quick_config() -> BenchConfig {
    BenchConfig::new()
        .with_warmups(1)
        .with_iterations(IterationLimit::Count(3))
}

/// Element `i` of source `s` in the default reference pattern, computed
/// independently of the crate
pub fn reference_value(s: usize, i: usize) -> f32 {
    let base = (i % 383) * 517 % 383 + 31;
    (base * (s + 1)) as f32
}

/// Faults injected into the copy engines of an [`InstrumentedPlatform`]
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Fills complete without writing anything
    pub drop_fills: bool,
    /// The n-th copy of every stream (1-based) writes zeros instead of the source
    pub zero_copy_on_call: Option<usize>,
}

/// Contents of a block at the moment it was released
#[derive(Debug, Clone)]
pub struct FreedBlock {
    pub kind: MemoryKind,
    pub index: usize,
    pub bytes: Vec<u8>,
}

impl FreedBlock {
    pub fn f32s(&self, byte_offset: usize, len: usize) -> Vec<f32> {
        self.bytes[byte_offset..byte_offset + len * 4]
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Emulated platform that keeps a snapshot of every released block, counts
/// platform copies and optionally misbehaves
#[derive(Debug)]
pub struct InstrumentedPlatform {
    inner: HostPlatform,
    faults: Faults,
    bus_ids: Option<Vec<String>>,
    /// Address -> NUMA node or device of every live allocation
    live: Mutex<HashMap<usize, usize>>,
    freed: Mutex<Vec<FreedBlock>>,
    copies: AtomicUsize,
}

impl InstrumentedPlatform {
    pub fn new(config: HostPlatformConfig) -> Self {
        Self {
            inner: HostPlatform::new(config).expect("emulated platform"),
            faults: Faults::default(),
            bus_ids: None,
            live: Mutex::new(HashMap::new()),
            freed: Mutex::new(Vec::new()),
            copies: AtomicUsize::new(0),
        }
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Report these PCIe bus ids instead of the ascending defaults
    pub fn with_bus_ids(mut self, ids: &[&str]) -> Self {
        self.bus_ids = Some(ids.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Released blocks of `kind` on `index` that were exactly `size` bytes
    pub fn freed_blocks(&self, kind: MemoryKind, index: usize, size: usize) -> Vec<FreedBlock> {
        self.freed
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.kind == kind && b.index == index && b.bytes.len() == size)
            .cloned()
            .collect()
    }

    /// The single released block matching `kind`, `index` and `size`
    pub fn freed_block(&self, kind: MemoryKind, index: usize, size: usize) -> FreedBlock {
        let mut blocks = self.freed_blocks(kind, index, size);
        assert_eq!(blocks.len(), 1, "expected one {:?}[{}] block of {} bytes", kind, index, size);
        blocks.remove(0)
    }

    /// Number of blocking platform copies so far
    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FaultyStream {
    inner: Box<dyn DeviceStream>,
    faults: Faults,
    copies: usize,
}

impl DeviceStream for FaultyStream {
    fn device(&self) -> usize {
        self.inner.device()
    }

    unsafe fn launch_transfer_kernel(&mut self, params: *mut BlockParams, launch: LaunchConfig) -> BenchResult<()> {
        self.inner.launch_transfer_kernel(params, launch)
    }

    unsafe fn copy_async(&mut self, dst: *mut u8, src: *const u8, bytes: usize) -> BenchResult<()> {
        self.copies += 1;
        if self.faults.zero_copy_on_call == Some(self.copies) {
            return self.inner.fill_async(dst, 0, bytes);
        }
        self.inner.copy_async(dst, src, bytes)
    }

    unsafe fn fill_async(&mut self, dst: *mut u8, value: u8, bytes: usize) -> BenchResult<()> {
        if self.faults.drop_fills {
            return Ok(());
        }
        self.inner.fill_async(dst, value, bytes)
    }

    fn synchronize(&mut self) -> BenchResult<()> {
        self.inner.synchronize()
    }

    fn last_elapsed_ms(&self) -> BenchResult<f64> {
        self.inner.last_elapsed_ms()
    }
}

impl Platform for InstrumentedPlatform {
    fn name(&self) -> &str {
        "instrumented"
    }

    fn device_count(&self) -> usize {
        self.inner.device_count()
    }

    fn pci_bus_ids(&self) -> BenchResult<Vec<String>> {
        match &self.bus_ids {
            Some(ids) => Ok(ids.clone()),
            None => self.inner.pci_bus_ids(),
        }
    }

    fn supports_memory(&self, kind: MemoryKind, index: usize) -> bool {
        self.inner.supports_memory(kind, index)
    }

    fn allocate(&self, kind: MemoryKind, index: usize, bytes: usize) -> BenchResult<NonNull<u8>> {
        let ptr = self.inner.allocate(kind, index, bytes)?;
        self.live.lock().unwrap().insert(ptr.as_ptr() as usize, index);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, kind: MemoryKind, ptr: NonNull<u8>, bytes: usize) -> BenchResult<()> {
        if let Some(index) = self.live.lock().unwrap().remove(&(ptr.as_ptr() as usize)) {
            // Emulated device memory is host memory, so it can be read in place
            self.freed.lock().unwrap().push(FreedBlock {
                kind,
                index,
                bytes: std::slice::from_raw_parts(ptr.as_ptr(), bytes).to_vec(),
            });
        }
        self.inner.deallocate(kind, ptr, bytes)
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8, bytes: usize) -> BenchResult<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(dst, src, bytes)
    }

    fn can_access_peer(&self, device: usize, peer: usize) -> BenchResult<bool> {
        self.inner.can_access_peer(device, peer)
    }

    fn enable_peer_access(&self, device: usize, peer: usize) -> BenchResult<()> {
        self.inner.enable_peer_access(device, peer)
    }

    fn bind_device(&self, device: usize) -> BenchResult<()> {
        self.inner.bind_device(device)
    }

    fn create_stream(&self, device: usize) -> BenchResult<Box<dyn DeviceStream>> {
        Ok(Box::new(FaultyStream {
            inner: self.inner.create_stream(device)?,
            faults: self.faults,
            copies: 0,
        }))
    }

    fn wall_clock_khz(&self, device: usize) -> BenchResult<f64> {
        self.inner.wall_clock_khz(device)
    }

    fn xcc_count(&self, device: usize) -> usize {
        self.inner.xcc_count(device)
    }
}
