//! Host platform with emulated accelerator devices
//!
//! Device memory is page-aligned host memory, kernel grids run one rayon task
//! per block, copy engines are synchronous memcpy/memset, and the block cycle
//! counter is a nanosecond clock. Host NUMA placement and affinity are real.

mod stream;

pub use stream::HostStream;

use super::{numa, DeviceStream, Platform};
use crate::error::{BenchError, BenchResult};
use crate::transfer::MemoryKind;
use std::alloc::{self, Layout};
use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Cycle counter frequency of emulated devices (1 GHz, one cycle per ns)
pub const HOST_WALL_CLOCK_KHZ: f64 = 1_000_000.0;

/// Emulated platform configuration
#[derive(Debug, Clone)]
pub struct HostPlatformConfig {
    /// Number of emulated devices
    pub num_devices: usize,
    /// Whether fine-grained device memory ('F') is available
    pub fine_grained: bool,
    /// Ordered (device, peer) pairs that cannot access each other
    pub denied_peers: Vec<(usize, usize)>,
    /// XCDs per emulated device
    pub xccs_per_device: usize,
    /// Worker threads running kernel blocks (None = rayon default)
    pub kernel_threads: Option<usize>,
}

impl Default for HostPlatformConfig {
    fn default() -> Self {
        Self {
            num_devices: 2,
            fine_grained: true,
            denied_peers: Vec::new(),
            xccs_per_device: 1,
            kernel_threads: None,
        }
    }
}

impl HostPlatformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(mut self, num_devices: usize) -> Self {
        self.num_devices = num_devices;
        self
    }

    pub fn with_fine_grained(mut self, fine_grained: bool) -> Self {
        self.fine_grained = fine_grained;
        self
    }

    pub fn with_denied_peer(mut self, device: usize, peer: usize) -> Self {
        self.denied_peers.push((device, peer));
        self
    }

    pub fn with_xccs_per_device(mut self, xccs: usize) -> Self {
        self.xccs_per_device = xccs.max(1);
        self
    }

    pub fn with_kernel_threads(mut self, threads: usize) -> Self {
        self.kernel_threads = Some(threads);
        self
    }
}

/// Emulated accelerator platform
#[derive(Debug)]
pub struct HostPlatform {
    config: HostPlatformConfig,
    pool: Arc<rayon::ThreadPool>,
    enabled_peers: Mutex<HashSet<(usize, usize)>>,
    epoch: Instant,
    page_size: usize,
}

impl HostPlatform {
    pub fn new(config: HostPlatformConfig) -> BenchResult<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("emu-cu-{}", i));
        if let Some(threads) = config.kernel_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| BenchError::InternalError(format!("Failed to build kernel pool: {}", e)))?;

        tracing::debug!(
            "HostPlatform::new: {} emulated devices, {} kernel threads",
            config.num_devices,
            pool.current_num_threads()
        );

        Ok(Self {
            config,
            pool: Arc::new(pool),
            enabled_peers: Mutex::new(HashSet::new()),
            epoch: Instant::now(),
            page_size: numa::page_size(),
        })
    }

    pub fn with_defaults() -> BenchResult<Self> {
        Self::new(HostPlatformConfig::default())
    }

    pub fn config(&self) -> &HostPlatformConfig {
        &self.config
    }

    /// Whether peer access from `device` to `peer` has been enabled
    pub fn peer_access_enabled(&self, device: usize, peer: usize) -> bool {
        self.enabled_peers
            .lock()
            .map(|set| set.contains(&(device, peer)))
            .unwrap_or(false)
    }

    fn layout(&self, bytes: usize) -> BenchResult<Layout> {
        Layout::from_size_align(bytes, self.page_size)
            .map_err(|e| BenchError::AllocationFailed(format!("Invalid layout for {} bytes: {}", bytes, e)))
    }

    fn check_device(&self, device: usize) -> BenchResult<()> {
        if device >= self.config.num_devices {
            return Err(BenchError::IndexOutOfRange {
                what: "GPU",
                index: device,
                count: self.config.num_devices,
            });
        }
        Ok(())
    }
}

impl Platform for HostPlatform {
    fn name(&self) -> &str {
        "host"
    }

    fn device_count(&self) -> usize {
        self.config.num_devices
    }

    fn pci_bus_ids(&self) -> BenchResult<Vec<String>> {
        Ok((0..self.config.num_devices)
            .map(|i| format!("0000:{:02x}:00.0", 0x10 + i))
            .collect())
    }

    fn supports_memory(&self, kind: MemoryKind, index: usize) -> bool {
        match kind {
            MemoryKind::HostPinned | MemoryKind::HostFine | MemoryKind::HostUnpinned => true,
            MemoryKind::Device => index < self.config.num_devices,
            MemoryKind::DeviceFine => self.config.fine_grained && index < self.config.num_devices,
        }
    }

    fn allocate(&self, kind: MemoryKind, index: usize, bytes: usize) -> BenchResult<NonNull<u8>> {
        if bytes == 0 {
            return Err(BenchError::ZeroSizeAllocation);
        }
        if kind.is_device() {
            self.check_device(index)?;
        }
        let layout = self.layout(bytes)?;

        // SAFETY: layout has non-zero size
        let raw = unsafe {
            if kind.is_device() {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| BenchError::AllocationFailed(format!("Out of memory allocating {} bytes", bytes)))?;

        if matches!(kind, MemoryKind::HostPinned | MemoryKind::HostFine) && !numa::lock_pages(ptr.as_ptr(), bytes) {
            tracing::debug!("HostPlatform::allocate: mlock refused for {} bytes, memory stays pageable", bytes);
        }

        tracing::trace!("HostPlatform::allocate: {:?}[{}] {} bytes at {:p}", kind, index, bytes, ptr);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, kind: MemoryKind, ptr: NonNull<u8>, bytes: usize) -> BenchResult<()> {
        if matches!(kind, MemoryKind::HostPinned | MemoryKind::HostFine) {
            numa::unlock_pages(ptr.as_ptr(), bytes);
        }
        let layout = self.layout(bytes)?;
        alloc::dealloc(ptr.as_ptr(), layout);
        Ok(())
    }

    unsafe fn copy(&self, dst: *mut u8, src: *const u8, bytes: usize) -> BenchResult<()> {
        std::ptr::copy_nonoverlapping(src, dst, bytes);
        Ok(())
    }

    fn can_access_peer(&self, device: usize, peer: usize) -> BenchResult<bool> {
        self.check_device(device)?;
        self.check_device(peer)?;
        Ok(device != peer && !self.config.denied_peers.contains(&(device, peer)))
    }

    fn enable_peer_access(&self, device: usize, peer: usize) -> BenchResult<()> {
        if !self.can_access_peer(device, peer)? {
            return Err(BenchError::PeerAccessUnavailable { device, peer });
        }
        let newly_enabled = self.enabled_peers.lock()?.insert((device, peer));
        if !newly_enabled {
            tracing::trace!("HostPlatform::enable_peer_access: {} -> {} already enabled", device, peer);
        }
        Ok(())
    }

    fn bind_device(&self, device: usize) -> BenchResult<()> {
        self.check_device(device)
    }

    fn create_stream(&self, device: usize) -> BenchResult<Box<dyn DeviceStream>> {
        self.check_device(device)?;
        Ok(Box::new(HostStream::new(
            device,
            Arc::clone(&self.pool),
            self.epoch,
            self.config.xccs_per_device,
        )))
    }

    fn wall_clock_khz(&self, device: usize) -> BenchResult<f64> {
        self.check_device(device)?;
        Ok(HOST_WALL_CLOCK_KHZ)
    }

    fn xcc_count(&self, _device: usize) -> usize {
        self.config.xccs_per_device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> HostPlatform {
        HostPlatform::new(HostPlatformConfig::new().with_devices(3).with_kernel_threads(2)).unwrap()
    }

    #[test]
    fn test_device_memory_is_zeroed_and_aligned() {
        let p = platform();
        let ptr = p.allocate(MemoryKind::Device, 1, 8192).unwrap();
        assert_eq!(ptr.as_ptr() as usize % numa::page_size(), 0);
        let data = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 8192) };
        assert!(data.iter().all(|&b| b == 0));
        unsafe { p.deallocate(MemoryKind::Device, ptr, 8192).unwrap() };
    }

    #[test]
    fn test_allocate_rejects_zero_and_bad_device() {
        let p = platform();
        assert!(matches!(
            p.allocate(MemoryKind::Device, 0, 0),
            Err(BenchError::ZeroSizeAllocation)
        ));
        assert!(matches!(
            p.allocate(MemoryKind::DeviceFine, 3, 64),
            Err(BenchError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_fine_grained_support_is_configurable() {
        let p = HostPlatform::new(HostPlatformConfig::new().with_fine_grained(false)).unwrap();
        assert!(!p.supports_memory(MemoryKind::DeviceFine, 0));
        assert!(p.supports_memory(MemoryKind::Device, 0));
        assert!(p.supports_memory(MemoryKind::HostUnpinned, 0));
    }

    #[test]
    fn test_peer_access_matrix() {
        let p = HostPlatform::new(HostPlatformConfig::new().with_devices(2).with_denied_peer(1, 0)).unwrap();
        assert!(p.can_access_peer(0, 1).unwrap());
        assert!(!p.can_access_peer(1, 0).unwrap());
        assert!(!p.can_access_peer(0, 0).unwrap());

        p.enable_peer_access(0, 1).unwrap();
        p.enable_peer_access(0, 1).unwrap();
        assert!(p.peer_access_enabled(0, 1));
        assert!(matches!(
            p.enable_peer_access(1, 0),
            Err(BenchError::PeerAccessUnavailable { device: 1, peer: 0 })
        ));
    }

    #[test]
    fn test_pci_bus_ids_unique() {
        let ids = platform().pci_bus_ids().unwrap();
        assert_eq!(ids.len(), 3);
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 3);
    }
}
