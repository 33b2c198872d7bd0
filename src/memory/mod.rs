//! Memory resource management
//!
//! [`MemoryManager`] allocates typed memory on a NUMA node or device through
//! the active [`Platform`] and hands out [`MemoryBlock`] handles. A block
//! releases its memory through the allocator matching its kind when dropped,
//! so every exit path of a measurement session frees what it acquired.
//!
//! Host allocations are placed explicitly: the calling thread prefers the
//! target node while the block is allocated and first touched, then every
//! page is checked to be resident on that node.

use crate::backend::{numa, Platform};
use crate::error::{BenchError, BenchResult};
use crate::transfer::MemoryKind;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::Arc;

/// Owned allocation on one NUMA node or device
///
/// Not `Clone`: exactly one handle frees the memory.
#[derive(Debug)]
pub struct MemoryBlock {
    platform: Arc<dyn Platform>,
    kind: MemoryKind,
    index: usize,
    ptr: NonNull<u8>,
    size: usize,
}

// SAFETY: the block owns its allocation; concurrent access to the contents is
// coordinated by the engine (disjoint ranges per sub-executor, barriers per
// iteration).
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

impl MemoryBlock {
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// Physical NUMA node or device index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Pointer to the f32 element starting at `byte_offset`
    pub fn f32_ptr(&self, byte_offset: usize) -> *mut f32 {
        debug_assert!(byte_offset <= self.size);
        self.ptr.as_ptr().wrapping_add(byte_offset) as *mut f32
    }

    fn check_range(&self, byte_offset: usize, bytes: usize) -> BenchResult<()> {
        match byte_offset.checked_add(bytes) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(BenchError::InternalError(format!(
                "Access of {} bytes at offset {} exceeds block of {} bytes",
                bytes, byte_offset, self.size
            ))),
        }
    }

    /// Copy `data` into the block at `byte_offset`
    pub fn write_slice<T: Copy>(&self, byte_offset: usize, data: &[T]) -> BenchResult<()> {
        let bytes = std::mem::size_of_val(data);
        self.check_range(byte_offset, bytes)?;
        // SAFETY: range checked above; host slice and block never overlap
        unsafe {
            self.platform
                .copy(self.as_ptr().add(byte_offset), data.as_ptr() as *const u8, bytes)
        }
    }

    /// Copy `len` elements starting at `byte_offset` out of the block
    pub fn read_vec<T: Copy + Default>(&self, byte_offset: usize, len: usize) -> BenchResult<Vec<T>> {
        let bytes = len * size_of::<T>();
        self.check_range(byte_offset, bytes)?;
        let mut out = vec![T::default(); len];
        // SAFETY: range checked above; `out` holds exactly `bytes`
        unsafe {
            self.platform
                .copy(out.as_mut_ptr() as *mut u8, self.as_ptr().add(byte_offset), bytes)?;
        }
        Ok(out)
    }

    /// Read f32 elements, directly through the pointer when the memory is
    /// host-visible and `direct` is set, otherwise through a platform copy.
    pub fn read_f32(&self, byte_offset: usize, len: usize, direct: bool) -> BenchResult<Vec<f32>> {
        let host_visible = self.kind.is_host() || self.kind == MemoryKind::DeviceFine;
        if direct && host_visible {
            self.check_range(byte_offset, len * size_of::<f32>())?;
            // SAFETY: range checked; host-visible memory may be read in place
            let slice = unsafe { std::slice::from_raw_parts(self.f32_ptr(byte_offset), len) };
            return Ok(slice.to_vec());
        }
        self.read_vec(byte_offset, len)
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        tracing::trace!(
            "MemoryBlock::drop: freeing {} bytes of {:?}[{}]",
            self.size,
            self.kind,
            self.index
        );
        // SAFETY: ptr/size/kind come from the matching allocate call
        if let Err(e) = unsafe { self.platform.deallocate(self.kind, self.ptr, self.size) } {
            tracing::warn!("MemoryBlock::drop: failed to free {:?}[{}]: {}", self.kind, self.index, e);
        }
    }
}

/// Allocates and releases Transfer memory, and opens peer access
#[derive(Debug, Clone)]
pub struct MemoryManager {
    platform: Arc<dyn Platform>,
}

impl MemoryManager {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Allocate `bytes` of `kind` memory on physical node/device `index`.
    ///
    /// The returned memory is zeroed. Host memory is verified to reside on
    /// node `index`.
    pub fn allocate(&self, kind: MemoryKind, index: usize, bytes: usize) -> BenchResult<MemoryBlock> {
        if bytes == 0 {
            return Err(BenchError::ZeroSizeAllocation);
        }
        if !self.platform.supports_memory(kind, index) {
            return Err(BenchError::UnsupportedMemory(format!(
                "{:?} memory is not available on {} {} of platform '{}'",
                kind,
                if kind.is_host() { "NUMA node" } else { "device" },
                index,
                self.platform.name()
            )));
        }

        if kind.is_device() {
            let ptr = self.platform.allocate(kind, index, bytes)?;
            tracing::debug!("MemoryManager::allocate: {} bytes of {:?} on device {}", bytes, kind, index);
            return Ok(self.wrap(kind, index, ptr, bytes));
        }

        let policy = numa::prefer_node(index);
        let ptr = self.platform.allocate(kind, index, bytes)?;
        let block = self.wrap(kind, index, ptr, bytes);

        // First touch places the pages under the preferred-node policy
        // SAFETY: fresh allocation of `bytes` bytes
        unsafe { std::ptr::write_bytes(block.as_ptr(), 0, bytes) };
        numa::check_pages(block.as_ptr(), bytes, index)?;
        let applied = policy.applied();
        drop(policy);

        tracing::debug!(
            "MemoryManager::allocate: {} bytes of {:?} on NUMA node {} (policy applied: {})",
            bytes,
            kind,
            index,
            applied
        );
        Ok(block)
    }

    /// Release a block. `None` only logs a warning.
    pub fn free(&self, block: Option<MemoryBlock>) {
        match block {
            Some(block) => drop(block),
            None => tracing::warn!("MemoryManager::free: attempted to free null pointer"),
        }
    }

    /// Allow executor `device` to access memory on device `peer`.
    ///
    /// A no-op for the same device; enabling an already enabled pair succeeds.
    pub fn enable_access(&self, device: usize, peer: usize) -> BenchResult<()> {
        if device == peer {
            return Ok(());
        }
        if !self.platform.can_access_peer(device, peer)? {
            tracing::error!("Unable to enable peer access from device {} to device {}", device, peer);
            return Err(BenchError::PeerAccessUnavailable { device, peer });
        }
        self.platform.enable_peer_access(device, peer)?;
        tracing::debug!("MemoryManager::enable_access: device {} -> device {}", device, peer);
        Ok(())
    }

    fn wrap(&self, kind: MemoryKind, index: usize, ptr: NonNull<u8>, size: usize) -> MemoryBlock {
        MemoryBlock {
            platform: Arc::clone(&self.platform),
            kind,
            index,
            ptr,
            size,
        }
    }
}
