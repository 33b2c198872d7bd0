//! Emulated device stream
//!
//! Operations complete before they return, so `synchronize` has nothing to
//! wait for. Kernel blocks record their own start/stop cycles from the
//! platform clock like hardware blocks do.

use crate::backend::{DeviceStream, LaunchConfig};
use crate::error::BenchResult;
use crate::kernels::{reduce_block, BlockParams, NO_PREFERRED_XCC};
use std::sync::Arc;
use std::time::Instant;

/// Raw parameter record handed to one pool task
struct BlockSlot(*mut BlockParams);

// Each slot is touched by exactly one task.
unsafe impl Send for BlockSlot {}

#[derive(Debug)]
pub struct HostStream {
    device: usize,
    pool: Arc<rayon::ThreadPool>,
    epoch: Instant,
    num_xccs: usize,
    last_ms: f64,
}

impl HostStream {
    pub(super) fn new(device: usize, pool: Arc<rayon::ThreadPool>, epoch: Instant, num_xccs: usize) -> Self {
        Self {
            device,
            pool,
            epoch,
            num_xccs: num_xccs.max(1),
            last_ms: 0.0,
        }
    }

    fn timed<F: FnOnce()>(&mut self, op: F) {
        let start = Instant::now();
        op();
        self.last_ms = start.elapsed().as_secs_f64() * 1000.0;
    }
}

/// Nanoseconds since `epoch`, the emulated cycle counter
fn cycles_since(epoch: Instant) -> i64 {
    epoch.elapsed().as_nanos() as i64
}

impl DeviceStream for HostStream {
    fn device(&self) -> usize {
        self.device
    }

    unsafe fn launch_transfer_kernel(&mut self, params: *mut BlockParams, launch: LaunchConfig) -> BenchResult<()> {
        let epoch = self.epoch;
        let num_xccs = self.num_xccs as i32;
        let pool = Arc::clone(&self.pool);

        tracing::trace!(
            "HostStream::launch_transfer_kernel: device {} grid {}x{}",
            self.device,
            launch.num_xccs,
            launch.num_blocks
        );

        let base = BlockSlot(params);
        self.timed(|| {
            pool.scope(|s| {
                let base = base;
                for b in 0..launch.num_blocks {
                    let slot = BlockSlot(base.0.add(b));
                    s.spawn(move |_| {
                        let slot = slot;
                        // SAFETY: one task per record; caller keeps records and buffers alive
                        let p = &mut *slot.0;
                        let start = cycles_since(epoch);
                        reduce_block(p);
                        p.xcc_id = if p.preferred_xcc != NO_PREFERRED_XCC {
                            p.preferred_xcc
                        } else {
                            b as i32 % num_xccs
                        };
                        p.hw_id = rayon::current_thread_index().unwrap_or(0) as u32;
                        p.start_cycle = start;
                        p.stop_cycle = cycles_since(epoch);
                    });
                }
            });
        });
        Ok(())
    }

    unsafe fn copy_async(&mut self, dst: *mut u8, src: *const u8, bytes: usize) -> BenchResult<()> {
        self.timed(|| std::ptr::copy_nonoverlapping(src, dst, bytes));
        Ok(())
    }

    unsafe fn fill_async(&mut self, dst: *mut u8, value: u8, bytes: usize) -> BenchResult<()> {
        self.timed(|| std::ptr::write_bytes(dst, value, bytes));
        Ok(())
    }

    fn synchronize(&mut self) -> BenchResult<()> {
        Ok(())
    }

    fn last_elapsed_ms(&self) -> BenchResult<f64> {
        Ok(self.last_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::FILL_VALUE;

    fn stream() -> HostStream {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        HostStream::new(0, Arc::new(pool), Instant::now(), 2)
    }

    #[test]
    fn test_kernel_launch_records_cycles() {
        let src: Vec<f32> = (0..512).map(|i| i as f32).collect();
        let mut dst = vec![0.0f32; 512];
        let mut params = vec![
            BlockParams::new(256, &[src.as_ptr()], &[dst.as_mut_ptr()], None),
            unsafe { BlockParams::new(256, &[src.as_ptr().add(256)], &[dst.as_mut_ptr().add(256)], Some(1)) },
        ];

        let mut s = stream();
        let launch = LaunchConfig {
            num_blocks: 2,
            block_size: 256,
            num_xccs: 2,
        };
        unsafe { s.launch_transfer_kernel(params.as_mut_ptr(), launch).unwrap() };
        s.synchronize().unwrap();

        assert_eq!(dst, src);
        for p in &params {
            assert!(p.stop_cycle >= p.start_cycle);
            assert!(p.start_cycle >= 0);
        }
        assert_eq!(params[0].xcc_id, 0);
        assert_eq!(params[1].xcc_id, 1);
        assert!(s.last_elapsed_ms().unwrap() >= 0.0);
    }

    #[test]
    fn test_copy_and_fill() {
        let src = vec![7.0f32; 64];
        let mut dst = vec![0.0f32; 64];
        let mut s = stream();
        unsafe {
            s.copy_async(dst.as_mut_ptr() as *mut u8, src.as_ptr() as *const u8, 64 * 4).unwrap();
        }
        assert_eq!(dst, src);

        unsafe {
            s.fill_async(dst.as_mut_ptr() as *mut u8, crate::kernels::FILL_BYTE, 64 * 4).unwrap();
        }
        assert!(dst.iter().all(|&v| v == FILL_VALUE));
    }
}
